//! relay-replay: replay a scenario of page transport calls through the body
//! hand-off hooks against a stand-in native host. One JSON line per request.

mod config;
mod native;
mod replay;
mod scenario;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use relay_core::RelayContext;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::native::NativeHost;

#[derive(Parser, Debug)]
#[command(name = "relay-replay")]
#[command(author, version, about = "Replay transport calls through the request body hand-off")]
struct Args {
    /// Scenario file (JSON)
    #[arg(short, long, required_unless_present = "example_scenario")]
    scenario: Option<PathBuf>,

    /// Configuration file path (TOML)
    #[arg(short, long, env = "BODYRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print an example scenario and exit.
    #[arg(long)]
    example_scenario: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    // Logs go to stderr; stdout carries the report lines.
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if args.example_scenario {
        println!("{}", scenario::EXAMPLE_SCENARIO);
        return Ok(());
    }

    let cfg = config::load(args.config.as_deref())?;
    let path = args.scenario.context("--scenario is required")?;
    let scenario = scenario::load(&path)?;

    let host = Arc::new(NativeHost::new(
        &cfg.hook.bridge_module,
        &cfg.hook.bridge_method,
        Duration::from_millis(cfg.ack_delay_ms),
    ));
    let href = scenario.document_href.unwrap_or(cfg.document_href);
    let ctx = RelayContext::new(cfg.hook, host.clone(), href);
    info!(
        requests = scenario.requests.len(),
        relay_mode = ?ctx.config().relay_mode,
        "replaying scenario"
    );

    let runs = scenario
        .requests
        .into_iter()
        .enumerate()
        .map(|(i, step)| replay::run_step(i, step, ctx.clone(), host.clone()));
    for report in join_all(runs).await {
        let report = report?;
        println!("{}", serde_json::to_string(&report)?);
    }

    let dropped = ctx.shutdown();
    info!(dropped, unclaimed = host.cached(), "done");
    Ok(())
}
