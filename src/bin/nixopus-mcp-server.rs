// ABOUTME: Nixopus MCP tool server binary speaking JSON-RPC on stdin/stdout
// ABOUTME: Wires Postgres, the two-tier cache, SuperTokens, the audit sink and the built-in tools
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Nixopus MCP Server Binary
//!
//! Configuration comes from the environment (see `ServerConfig::from_env`);
//! a few settings can be overridden on the command line. Logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nixopus_mcp_server::audit::AuditSink;
use nixopus_mcp_server::authz::AccessCache;
use nixopus_mcp_server::cache::TieredCache;
use nixopus_mcp_server::config::ServerConfig;
use nixopus_mcp_server::database::PostgresStore;
use nixopus_mcp_server::identity::supertokens::SuperTokensSessionStore;
use nixopus_mcp_server::identity::IdentityResolver;
use nixopus_mcp_server::logging::LogFormat;
use nixopus_mcp_server::mcp::{McpServer, Services, ToolDispatcher};
use nixopus_mcp_server::tools::registry::ToolRegistry;
use nixopus_mcp_server::tools::{register_builtin_tools, BuiltinBackends};

#[derive(Parser)]
#[command(name = "nixopus-mcp-server")]
#[command(about = "Nixopus MCP tool server - authenticated, authorized and audited tools over stdio")]
struct Args {
    /// Override `DATABASE_URL`
    #[arg(long)]
    database_url: Option<String>,

    /// Override `REDIS_URL`
    #[arg(long)]
    redis_url: Option<String>,

    /// Log format: json, pretty or compact
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Create the audit table if it is missing, then continue
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env().context("failed to load configuration")?;
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }
    if let Some(redis_url) = args.redis_url {
        config.cache.redis_url = Some(redis_url);
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    config.logging.init()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Nixopus MCP server"
    );

    let store = Arc::new(PostgresStore::connect(&config.database_url).await?);
    if args.migrate {
        store.migrate().await?;
        info!("Audit schema ready");
    }

    let cache = TieredCache::from_config(config.cache.clone()).await;
    if let Err(e) = cache.health_check().await {
        warn!(error = %e, "Cache health check failed");
    }

    let sessions = Arc::new(
        SuperTokensSessionStore::new(config.session.clone())
            .context("failed to build session store client")?,
    );
    let identity = IdentityResolver::new(sessions, store.clone(), cache.clone());
    let access = AccessCache::new(store.clone(), cache);
    let audit = AuditSink::start(store.clone(), config.audit.clone());

    let services = Services::new(Arc::new(identity), Arc::new(access), store, audit.clone());
    let mut registry = ToolRegistry::new(services);
    register_builtin_tools(&mut registry, BuiltinBackends::from_config(&config))
        .context("tool registration failed")?;
    registry.log_summary();

    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(registry),
        config.dispatch.clone(),
    ));
    let server = McpServer::new(dispatcher, audit.clone());

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_stop.cancel();
    });

    let served = server.serve_stdio(stop).await;
    audit.shutdown().await;

    if let Err(e) = served {
        error!(error = %e, "MCP server stopped with an error");
        return Err(e.into());
    }
    info!("MCP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
