// src/main.rs

//! Process entry point: argument parsing, logging setup, and handing
//! off to the agent loop.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use deadman::Config;
use deadman::capability::CapabilityRegistry;
use deadman::agent::Agent;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_app() -> Result<i32> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("deadman {VERSION}");
        return Ok(0);
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("deadman.toml");

    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load configuration from \"{config_path}\""))?;

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    let registry = build_registry(&config.plugins)
        .context("failed to resolve configured capability providers")?;

    let agent = Agent::new(registry, config.tick_time)
        .map_err(|e| anyhow!("failed to construct agent: {e}"))?;

    let exit_code = agent.run().await;
    if exit_code != 0 {
        error!(exit_code, "agent exited non-zero");
    }
    Ok(exit_code)
}

/// Resolves the `deadman.plugins` name list to concrete capability
/// providers. Real providers (a ZooKeeper-backed `DcsAdapter`, a
/// PostgreSQL `DatabaseControl`, cloud node-identity/conn-info
/// publishers) are out of this core's scope; this resolver only wires
/// up the in-memory fakes under the `testing` feature, which is enough
/// to exercise the agent loop end to end without a real cluster.
fn build_registry(plugins: &[String]) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    for name in plugins {
        match name.as_str() {
            #[cfg(feature = "testing")]
            "fake-dcs" => registry.dcs = Some(Arc::new(deadman::testing::FakeDcs::default())),
            #[cfg(feature = "testing")]
            "fake-db" => {
                registry.database = Some(Arc::new(deadman::testing::FakeDatabase::new(
                    "dbid-demo",
                    deadman::capability::database::ReplicationRole::None,
                )))
            }
            #[cfg(feature = "testing")]
            "fake-identity" => {
                registry.identity = Some(Arc::new(deadman::testing::FakeIdentity::new(
                    &hostname_fallback(),
                )))
            }
            #[cfg(feature = "testing")]
            "fake-process-control" => {
                registry.process_control = Some(Arc::new(deadman::testing::FakeProcessControl::default()))
            }
            #[cfg(feature = "testing")]
            "fake-replica-ranker" => {
                registry.replica_ranker = Some(Arc::new(deadman::testing::FakeReplicaRanker))
            }
            other => {
                return Err(anyhow!(
                    "unknown capability provider \"{other}\" (real DCS/database/identity providers are not bundled with this core)"
                ));
            }
        }
    }

    registry
        .validate()
        .map_err(|e| anyhow!("capability registry validation failed: {e}"))?;
    Ok(registry)
}

#[cfg_attr(not(feature = "testing"), allow(dead_code))]
fn hostname_fallback() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
