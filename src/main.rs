//! cas-dispatcher entry point: parses configuration, builds the engine
//! registry, and serves the wire adapter's `axum::Router`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use cas_dispatcher::config::Cli;
use cas_dispatcher::dispatcher::Dispatcher;
use cas_dispatcher::engine::gap::GapEngine;
use cas_dispatcher::engine::maxima::MaximaEngine;
use cas_dispatcher::engine::octave::OctaveEngine;
use cas_dispatcher::engine::symbolic::SymbolicEngine;
use cas_dispatcher::engine::wolfram::WolframEngine;
use cas_dispatcher::engine::Engine;
use cas_dispatcher::wire::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(&cli.log_level);

    let engines = build_registry(&cli);
    let dispatcher = Arc::new(Dispatcher::new(engines, cli.default_engine.as_deref()));

    let state = Arc::new(AppState {
        dispatcher,
        service_name: "cas-dispatcher",
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
    });

    let app = wire::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(service = "cas-dispatcher", port = cli.port, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Construct every engine inside a guarded region (§4.5 "Registry
/// initialization"): a construction panic is caught, logged, and the
/// engine is omitted rather than aborting startup. The registry otherwise
/// includes every engine regardless of current availability — availability
/// is a runtime property surfaced via `/engines`, not a startup gate.
fn build_registry(cli: &Cli) -> Vec<(String, Arc<dyn Engine>)> {
    let candidates: Vec<(&str, Box<dyn FnOnce() -> Arc<dyn Engine>>)> = vec![
        (
            "symbolic",
            Box::new({
                let interpreter = cli.symbolic_interpreter.clone();
                let timeout = Duration::from_secs(cli.symbolic_timeout);
                move || Arc::new(SymbolicEngine::new(interpreter, timeout)) as Arc<dyn Engine>
            }),
        ),
        (
            "maxima",
            Box::new({
                let path = cli.maxima_path.clone();
                let timeout = Duration::from_secs(cli.maxima_timeout);
                move || Arc::new(MaximaEngine::new(path, timeout)) as Arc<dyn Engine>
            }),
        ),
        (
            "octave",
            Box::new({
                let path = cli.octave_path.clone();
                let timeout = Duration::from_secs(cli.octave_timeout);
                move || Arc::new(OctaveEngine::new(path, timeout)) as Arc<dyn Engine>
            }),
        ),
        (
            "gap",
            Box::new({
                let path = cli.gap_path.clone();
                let timeout = Duration::from_secs(cli.gap_timeout);
                move || Arc::new(GapEngine::new(path, timeout)) as Arc<dyn Engine>
            }),
        ),
        (
            "wolfram",
            Box::new({
                let app_id = cli.wolframalpha_appid.clone();
                let timeout = Duration::from_secs(cli.wolframalpha_timeout);
                move || Arc::new(WolframEngine::new(app_id, timeout)) as Arc<dyn Engine>
            }),
        ),
    ];

    let mut registered = Vec::with_capacity(candidates.len());
    for (name, construct) in candidates {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(construct)) {
            Ok(engine) => {
                if !engine.is_available() {
                    tracing::warn!(
                        engine = name,
                        reason = engine.availability_reason().unwrap_or_default(),
                        "engine registered but not currently available"
                    );
                }
                registered.push((name.to_string(), engine));
            }
            Err(_) => {
                tracing::warn!(engine = name, "engine construction failed, skipping");
            }
        }
    }
    registered
}
