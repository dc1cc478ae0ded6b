//! # snapsync Agent
//!
//! Demo peer for the snapsync replication engine: wraps a local object,
//! mutates it continuously, and logs the synchronization envelopes the
//! scheduler produces each interval.

use anyhow::{Context, Result};
use serde_json::json;
use snapsync_agent::{Session, SessionConfig};
use snapsync_core::{accept_all, Fields, Role};
use snapsync_proto::topics;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting snapsync agent");

    let role = match std::env::var("SNAPSYNC_ROLE") {
        Ok(name) => name.parse::<Role>().context("Invalid SNAPSYNC_ROLE")?,
        Err(_) => Role::Authoritative,
    };
    let config = SessionConfig::from_env().context("Invalid configuration")?;
    let interval = config.interval;

    let session = Session::new(role, config);

    let mut fields = Fields::new();
    fields.insert("x".to_string(), json!(0));
    fields.insert("y".to_string(), json!(0));
    let ball = session.wrap("ball", fields, accept_all);

    session.on(topics::SYNC, |args| {
        if let Some(envelope) = args.first() {
            tracing::info!(%envelope, "sync");
        }
    });

    session.ticker().start();
    tracing::info!("Agent running, press Ctrl+C to stop");

    let mut step = 0i64;
    let mut mutate = tokio::time::interval(interval * 3);
    loop {
        tokio::select! {
            _ = mutate.tick() => {
                step += 1;
                ball.set("x", json!(step));
                ball.set("y", json!(-step * 2));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    session.ticker().stop();
    tracing::info!("Agent stopped");
    Ok(())
}
