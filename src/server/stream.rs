use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::routes::ServerContext;
use crate::round::RoundEvent;
use crate::stream::Subscription;

const LOG_TARGET: &str = "gem_roulette::server::stream";

/// Idle heartbeat; also bounds how long a dead connection lingers before
/// the transport notices and drops the stream.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Attach an SSE subscriber: a `round_current` snapshot first, then every
/// round event until the client disconnects or its queue overflows. The
/// subscription guard is owned by the response stream, so dropping the
/// stream detaches the subscriber from the hub immediately.
pub async fn stream_rounds(
    ctx: Arc<ServerContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (snapshot, subscription) = ctx.engine.subscribe();
    let Subscription {
        id,
        receiver,
        guard,
    } = subscription;
    debug!(
        target: LOG_TARGET,
        subscriber = %id,
        round = snapshot.round_number,
        "stream subscriber attached"
    );

    let initial = RoundEvent::RoundCurrent(snapshot);
    let events = stream::once(std::future::ready(initial)).chain(ReceiverStream::new(receiver));

    let sse = events.map(move |event| {
        let _held = &guard;
        let name = event.event_name();
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|err| json!({ "error": err.to_string() }).to_string());
        Ok::<Event, Infallible>(Event::default().event(name).data(data))
    });

    Sse::new(sse).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text(":"),
    )
}
