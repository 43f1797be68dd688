use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Path;
use axum::middleware;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::Stream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use super::auth::{AuthedPlayer, TokenResolver};
use super::dto::{
    ClientSeedRequest, ClientSeedResponse, PlaceBetRequest, PlaceBetResponse, SpinResponse,
};
use super::error::ApiError;
use super::stream::stream_rounds;
use crate::book::BetKind;
use crate::ledger::RoundNumber;
use crate::round::{EngineError, PlayerRoundResults, RoundEngine, RoundSnapshot};

const LOG_TARGET: &str = "gem_roulette::server::routes";

#[derive(Clone)]
pub struct ServerContext {
    pub engine: Arc<RoundEngine>,
    pub auth: Arc<dyn TokenResolver>,
}

pub struct RouletteServer {
    router: Router,
}

impl RouletteServer {
    pub fn new(engine: Arc<RoundEngine>, auth: Arc<dyn TokenResolver>) -> Self {
        let context = Arc::new(ServerContext { engine, auth });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/round/bet", post(place_bet))
            .route("/round/spin", post(trigger_spin))
            .route("/round/current", get(current_round))
            .route("/round/stream", get(round_stream))
            .route("/round/client-seed", post(set_client_seed))
            .route("/round/:round_number/results", get(round_results))
            .layer(Extension(context))
            .layer(middleware::from_fn(super::logging::trace_requests))
            .layer(cors);

        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn place_bet(
    Extension(ctx): Extension<Arc<ServerContext>>,
    AuthedPlayer(player): AuthedPlayer,
    Json(payload): Json<PlaceBetRequest>,
) -> Result<Json<PlaceBetResponse>, ApiError> {
    let kind = BetKind::from_wire(&payload.kind, &payload.selection).ok_or_else(|| {
        ApiError::bad_selection(format!(
            "unrecognized bet kind/selection: {} / {}",
            payload.kind, payload.selection
        ))
    })?;

    let deadline = ctx.engine.config().bet_request_deadline;
    let engine = Arc::clone(&ctx.engine);
    let round_number = payload.round_number;
    let stake = payload.stake;
    let bettor = player.clone();

    // Detached task: client cancellation must not strand a debit between
    // the ledger write and the bet-book commit.
    let submission = tokio::spawn(async move {
        engine.place_bet(bettor, round_number, kind, stake).await
    });

    match tokio::time::timeout(deadline, submission).await {
        Ok(Ok(Ok(receipt))) => Ok(Json(PlaceBetResponse {
            success: true,
            bet_id: Some(receipt.bet_id),
            new_balance: Some(receipt.new_balance),
        })),
        Ok(Ok(Err(err))) => Err(err.into()),
        Ok(Err(join_err)) => Err(ApiError::internal(format!(
            "bet submission task failed: {join_err}"
        ))),
        Err(_) => {
            // Deadline elapsed. The bet is accepted from the engine's
            // perspective; the caller observes settlement on the stream.
            warn!(
                target: LOG_TARGET,
                %player,
                round = round_number,
                "bet request deadline elapsed; responding without receipt"
            );
            Ok(Json(PlaceBetResponse {
                success: true,
                bet_id: None,
                new_balance: None,
            }))
        }
    }
}

async fn trigger_spin(
    Extension(ctx): Extension<Arc<ServerContext>>,
    AuthedPlayer(player): AuthedPlayer,
) -> Result<Json<SpinResponse>, ApiError> {
    let fired = ctx.engine.trigger_spin().await.map_err(ApiError::from)?;
    if fired {
        info!(target: LOG_TARGET, %player, "spin triggered");
    }
    Ok(Json(SpinResponse { success: true }))
}

async fn current_round(
    Extension(ctx): Extension<Arc<ServerContext>>,
) -> Json<RoundSnapshot> {
    Json(ctx.engine.current_snapshot())
}

async fn round_stream(
    Extension(ctx): Extension<Arc<ServerContext>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stream_rounds(ctx).await
}

async fn set_client_seed(
    Extension(ctx): Extension<Arc<ServerContext>>,
    AuthedPlayer(player): AuthedPlayer,
    Json(payload): Json<ClientSeedRequest>,
) -> Result<Json<ClientSeedResponse>, ApiError> {
    let applies_to_round = ctx
        .engine
        .set_client_seed(&player, payload.seed)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ClientSeedResponse {
        success: true,
        applies_to_round,
    }))
}

async fn round_results(
    Extension(ctx): Extension<Arc<ServerContext>>,
    AuthedPlayer(player): AuthedPlayer,
    Path(round_number): Path<RoundNumber>,
) -> Result<Json<PlayerRoundResults>, ApiError> {
    match ctx.engine.round_results(round_number, &player).await {
        Ok(results) => Ok(Json(results)),
        Err(EngineError::UnknownRound(round)) => Err(ApiError::RoundNotFound(round)),
        Err(err) => Err(err.into()),
    }
}
