use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::auth::{DemoTokenResolver, TokenResolver};
use super::routes::RouletteServer;
use crate::config::EngineConfig;
use crate::fairness::CommitRevealRng;
use crate::ledger::{InMemoryTransactionLog, JsonlTransactionLog, Ledger, TransactionLog};
use crate::round::{
    AuditStore, InMemoryAuditStore, JsonlAuditStore, RoundEngine, RoundEngineConfig,
};
use crate::stream::EventHub;

const LOG_TARGET: &str = "gem_roulette::server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    pub engine: EngineConfig,
    /// Append-only ledger transaction log. In-memory when unset.
    pub ledger_log: Option<PathBuf>,
    /// Round audit log; seeds the round counter on restart. In-memory when
    /// unset.
    pub audit_log: Option<PathBuf>,
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let txn_log: Arc<dyn TransactionLog> = match &config.ledger_log {
        Some(path) => Arc::new(JsonlTransactionLog::open(path).await?),
        None => {
            warn!(
                target: LOG_TARGET,
                "no ledger log path configured; balances will not survive restart"
            );
            Arc::new(InMemoryTransactionLog::new())
        }
    };
    let ledger = Arc::new(
        Ledger::restore(txn_log, config.engine.initial_balance)
            .await
            .context("failed to restore ledger from transaction log")?,
    );

    let audit: Arc<dyn AuditStore> = match &config.audit_log {
        Some(path) => Arc::new(JsonlAuditStore::open(path).await?),
        None => Arc::new(InMemoryAuditStore::new()),
    };

    let hub = Arc::new(EventHub::new(config.engine.subscriber_queue_depth));
    let shutdown = CancellationToken::new();

    let (engine, scheduler) = RoundEngine::spawn(RoundEngineConfig {
        engine: config.engine.clone(),
        ledger,
        audit,
        hub,
        rng: Arc::new(CommitRevealRng),
        shutdown: shutdown.clone(),
    })
    .await
    .context("failed to spawn round scheduler")?;

    let auth: Arc<dyn TokenResolver> = Arc::new(DemoTokenResolver);
    let server = RouletteServer::new(engine, auth);
    let make_service = server.into_router().into_make_service();

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target: LOG_TARGET,
        %local_addr,
        betting_secs = config.engine.betting_duration.as_secs(),
        "gem roulette server listening"
    );

    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server exited with error")?;

    // The scheduler finishes the current round through RESULTS before the
    // process exits.
    shutdown.cancel();
    scheduler.await.context("round scheduler panicked")?;
    info!(target: LOG_TARGET, "shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target: LOG_TARGET,
            error = %err,
            "failed to install ctrl-c handler"
        );
    }
    info!(target: LOG_TARGET, "shutdown signal received");
    shutdown.cancel();
}
