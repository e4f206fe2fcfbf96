//! Prescreen 配置服务
//!
//! 下发规则（GET /api/rules）、写入评估日志（POST /api/data）、推送规则变更（GET /api/events）。
//!
//! 启动: cargo run --bin prescreen-server [config.toml]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use prescreen::config::{load_config, AppConfig};
use prescreen::server::{router, AppState, LogStore, RulesStore};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prescreen::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let rules = Arc::new(
        RulesStore::open(&cfg.server.rules_path, &cfg.rules.delay_key, &cfg.rules.first_rule)
            .with_context(|| format!("Failed to load rules from {}", cfg.server.rules_path.display()))?,
    );
    let logs = Arc::new(
        LogStore::open(&cfg.server.db_path, &cfg.server.table)
            .with_context(|| format!("Failed to open log store {}", cfg.server.db_path.display()))?,
    );

    let cancel = CancellationToken::new();
    rules
        .clone()
        .spawn_watcher(Duration::from_millis(cfg.server.watch_debounce_ms), cancel.clone())
        .context("Failed to watch rules file")?;

    let state = Arc::new(AppState {
        rules,
        logs,
        require_uid_cookie: cfg.server.require_uid_cookie,
    });
    let app = router(state);

    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", cfg.server.bind_addr))?;
    tracing::info!("Prescreen server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
