use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use gem_roulette::server::{run_server, ServerConfig};
use gem_roulette::EngineConfig;

const DEFAULT_BIND: &str = "127.0.0.1:4000";

#[derive(Debug, Parser)]
#[command(name = "gem_roulette_server")]
#[command(about = "Launch the GEM roulette round engine", long_about = None)]
struct Args {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "ROULETTE_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Append-only ledger transaction log (JSONL). In-memory if omitted.
    #[arg(long, env = "ROULETTE_LEDGER_LOG")]
    ledger_log: Option<PathBuf>,

    /// Round audit log (JSONL); preserves the round counter across
    /// restarts. In-memory if omitted.
    #[arg(long, env = "ROULETTE_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    #[arg(long, env = "ROULETTE_BETTING_DURATION_SECONDS", default_value_t = 15)]
    betting_duration_seconds: u64,

    #[arg(long, env = "ROULETTE_SPINNING_DURATION_SECONDS", default_value_t = 5)]
    spinning_duration_seconds: u64,

    #[arg(long, env = "ROULETTE_RESULTS_DURATION_SECONDS", default_value_t = 3)]
    results_duration_seconds: u64,

    #[arg(long, env = "ROULETTE_MIN_STAKE", default_value_t = 10)]
    min_stake: u64,

    #[arg(long, env = "ROULETTE_MAX_STAKE", default_value_t = 10_000)]
    max_stake: u64,

    /// Balance minted for a player on first touch.
    #[arg(long, env = "ROULETTE_INITIAL_BALANCE", default_value_t = 5_000)]
    initial_balance: u64,

    #[arg(long, env = "ROULETTE_SUBSCRIBER_QUEUE_DEPTH", default_value_t = 64)]
    subscriber_queue_depth: usize,

    #[arg(long, env = "ROULETTE_BET_DEADLINE_SECONDS", default_value_t = 5)]
    bet_request_deadline_seconds: u64,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "ROULETTE_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json);
    let config = build_config(args).context("failed to build server config")?;
    run_server(config).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }
}

fn build_config(args: Args) -> Result<ServerConfig> {
    if args.min_stake == 0 || args.min_stake > args.max_stake {
        anyhow::bail!(
            "invalid stake bounds: min {} max {}",
            args.min_stake,
            args.max_stake
        );
    }
    if args.betting_duration_seconds == 0 {
        anyhow::bail!("betting duration must be at least one second");
    }

    let engine = EngineConfig {
        betting_duration: Duration::from_secs(args.betting_duration_seconds),
        spinning_duration: Duration::from_secs(args.spinning_duration_seconds),
        results_duration: Duration::from_secs(args.results_duration_seconds),
        min_stake: args.min_stake,
        max_stake: args.max_stake,
        initial_balance: args.initial_balance,
        subscriber_queue_depth: args.subscriber_queue_depth,
        bet_request_deadline: Duration::from_secs(args.bet_request_deadline_seconds),
    };

    Ok(ServerConfig {
        bind: args.bind,
        engine,
        ledger_log: args.ledger_log,
        audit_log: args.audit_log,
    })
}
