//! Prescreen 控制台客户端
//!
//! 入口：初始化日志、从配置服务拉取规则图、创建会话编排器，并运行 TUI 主循环。
//! 用法：prescreen [config.toml]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use prescreen::assessment::HttpProber;
use prescreen::config::{load_config, AppConfig, SessionIdMode};
use prescreen::core::{create_session, SessionSettings};
use prescreen::provider::{ConfigProvider, HttpConfigProvider, SessionIdPolicy, SessionLogger};
use prescreen::ui::run_console;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prescreen::observability::init_stderr();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let policy = match cfg.client.session_id {
        SessionIdMode::PerEvent => SessionIdPolicy::PerEvent,
        SessionIdMode::Sticky => SessionIdPolicy::sticky_from_file(&cfg.client.uid_file)
            .with_context(|| format!("Failed to prepare uid file {}", cfg.client.uid_file.display()))?,
    };

    let mut provider = HttpConfigProvider::new(
        &cfg.client.api_base_url,
        &cfg.rules.delay_key,
        &cfg.rules.first_rule,
        cfg.client.probe_timeout_secs,
    )
    .context("Failed to create config client")?;
    if let Some(uid) = policy.sticky_uid() {
        provider = provider.with_uid_cookie(uid);
    }
    let provider = Arc::new(provider);

    let graph = provider
        .get_rules()
        .await
        .with_context(|| format!("Failed to load rules from {}", cfg.client.api_base_url))?;

    let prober = HttpProber::new(&cfg.client.probe_base_url, cfg.client.probe_timeout_secs)
        .context("Failed to create prober")?;
    let dyn_provider: Arc<dyn ConfigProvider> = provider.clone();
    let logger = SessionLogger::new(dyn_provider.clone(), policy).with_retry(
        cfg.client.log_attempts,
        Duration::from_millis(cfg.client.log_retry_backoff_ms),
    );

    let cancel = CancellationToken::new();
    let updates = cfg.client.subscribe_updates.then(|| {
        provider.subscribe_updates(
            Duration::from_millis(cfg.client.log_retry_backoff_ms.max(1000)),
            cancel.clone(),
        )
    });

    let (cmd_tx, state_rx) = create_session(
        Arc::new(graph),
        SessionSettings::from_config(&cfg.rules),
        Arc::new(prober),
        Arc::new(logger),
    );

    let result = run_console(cmd_tx, state_rx, dyn_provider, updates)
        .await
        .context("Console run failed");
    cancel.cancel();
    result
}
