// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tracing_subscriber::EnvFilter;
use ultrathink::config;
use ultrathink::engine;
use ultrathink::proxy;

use std::net::SocketAddr;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[command(
    name = "ultrathink",
    about = "OpenAI-compatible proxy that injects a reasoning instruction and repairs textual tool calls"
)]
struct Cli {
    /// Path to the ultrathink.yaml config file
    #[arg(long, default_value = "ultrathink.yaml", env = "ULTRATHINK_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = proxy::BIND_ADDR.1, env = "ULTRATHINK_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(log_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::from((proxy::BIND_ADDR.0, cli.port));
    tracing::info!(%addr, "ultrathink starting");

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => std::sync::Arc::new(c),
        Err(e) => {
            tracing::error!(source = %config::ConfigSource::describe(&source), "failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        enabled = config.enabled,
        mode = config.injection.mode.as_str(),
        models = ?config.gate.models,
        upstream = %config.upstream.base_url,
        sanitize = config.sanitize.enabled,
        failure_patterns = config.injection.failure_patterns.len(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let upstream: std::sync::Arc<dyn proxy::UpstreamClient> =
        std::sync::Arc::new(engine::build_engine_client(config));

    let app = proxy::build_router(upstream);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "ultrathink listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` when it is set and valid, `info` otherwise.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
