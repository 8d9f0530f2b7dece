//! # nutritrack
//!
//! Personal nutrition tracker: food log, weigh-ins and daily goals behind a session gate.
//!
//! ## Architecture
//!
//! - **Backend**: hosted auth + row store over HTTP, or an in-process stand-in for local use
//! - **Session**: per-request clients seeded from cookies; refreshed tokens are written back
//! - **Gate**: Axum middleware that redirects anonymous visitors away from protected paths
//! - **HTTP**: server-rendered pages and a JSON API, with rate limiting, request IDs, and
//!   graceful shutdown

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

mod backend;
mod config;
mod context;
mod guard;
mod http;
mod nutrition;
mod routes;
mod seed;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::serve;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::http::HttpBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::{Backend, BackendKind};
use crate::config::{AppConfig, BackendConfig, Cli};
use crate::http::{router, AppState};
use crate::routes::RouteTable;
use crate::seed::load_seed_users;
use crate::session::{ClientFactory, CookiePolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().context("failed to initialize logging")?;

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli).context("failed to load configuration")?;
    let backend = build_backend(&config)?;
    info!(
        bind = %config.bind,
        backend = ?backend.kind,
        cookie_secure = config.cookie_secure,
        public_paths = ?config.public_paths,
        request_timeout = ?config.request_timeout,
        "configuration loaded"
    );

    let clients = ClientFactory::new(
        backend,
        CookiePolicy {
            secure: config.cookie_secure,
        },
    );
    let routes = RouteTable::with_extra_prefixes(&config.public_paths);
    let app = router(AppState::new(clients, routes));

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    if config.bind.ip().is_loopback() {
        warn!(
            bind = %config.bind,
            "binding to loopback; use --bind 0.0.0.0:3000 for LAN access"
        );
    }

    let shutdown = tokio::signal::ctrl_c();
    info!(bind = %config.bind, "nutritrack listening");

    serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
        info!("shutting down gracefully");
    })
    .await
    .context("server exited with error")
}

/// Initialize tracing subscriber with `RUST_LOG` env filter (default: `info`).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn build_backend(config: &AppConfig) -> anyhow::Result<Backend> {
    match &config.backend {
        BackendConfig::Remote { url, api_key } => {
            let remote = HttpBackend::new(url.clone(), api_key.clone(), config.request_timeout)
                .context("failed to build backend HTTP client")?;
            info!(url = %url, "using hosted backend");
            Ok(Backend::new(BackendKind::Remote, Arc::new(remote)))
        }
        BackendConfig::Memory {
            seed_users,
            session_ttl,
        } => {
            let users = load_seed_users(seed_users.as_deref())
                .context("failed to load seed users file")?;
            let memory = MemoryBackend::new(*session_ttl).with_users(users);
            warn!(
                users = memory.user_count(),
                session_ttl = ?session_ttl,
                "using in-memory backend; accounts and records are lost on restart"
            );
            Ok(Backend::new(BackendKind::Memory, Arc::new(memory)))
        }
    }
}
