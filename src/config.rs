//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PRESCREEN__*` 覆盖（双下划线表示嵌套，如 `PRESCREEN__CLIENT__API_BASE_URL=http://...`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [rules] 段：首规则、延时项键名、探测与推进间隔
#[derive(Debug, Clone, Deserialize)]
pub struct RulesSection {
    #[serde(default = "default_first_rule")]
    pub first_rule: String,
    /// 规则 JSON 中延时项的键名
    #[serde(default = "default_delay_key")]
    pub delay_key: String,
    /// 图中与规则都未给出间隔时使用
    #[serde(default = "default_try_delay_ms")]
    pub default_try_delay_ms: u64,
    /// 规则完成到下一条开始之间的停顿
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,
}

fn default_first_rule() -> String {
    "FirstRule".to_string()
}

fn default_delay_key() -> String {
    "tryDelay".to_string()
}

fn default_try_delay_ms() -> u64 {
    500
}

fn default_advance_delay_ms() -> u64 {
    500
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            first_rule: default_first_rule(),
            delay_key: default_delay_key(),
            default_try_delay_ms: default_try_delay_ms(),
            advance_delay_ms: default_advance_delay_ms(),
        }
    }
}

/// 会话标识策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionIdMode {
    /// 每条日志新生成
    #[default]
    PerEvent,
    /// 持久化在 uid_file 中，跨会话沿用
    Sticky,
}

/// [client] 段：配置服务地址、探测目标、日志提交
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// 规则 port 拼接在此地址之后
    #[serde(default = "default_probe_base_url")]
    pub probe_base_url: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default)]
    pub session_id: SessionIdMode,
    #[serde(default = "default_uid_file")]
    pub uid_file: PathBuf,
    #[serde(default = "default_log_attempts")]
    pub log_attempts: u32,
    #[serde(default = "default_log_retry_backoff_ms")]
    pub log_retry_backoff_ms: u64,
    /// 订阅服务端 rules_updated 推送
    #[serde(default = "default_subscribe_updates")]
    pub subscribe_updates: bool,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_probe_base_url() -> String {
    "https://127.0.0.1".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_uid_file() -> PathBuf {
    PathBuf::from(".prescreen/uid")
}

fn default_log_attempts() -> u32 {
    3
}

fn default_log_retry_backoff_ms() -> u64 {
    1000
}

fn default_subscribe_updates() -> bool {
    true
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            probe_base_url: default_probe_base_url(),
            probe_timeout_secs: default_probe_timeout_secs(),
            session_id: SessionIdMode::default(),
            uid_file: default_uid_file(),
            log_attempts: default_log_attempts(),
            log_retry_backoff_ms: default_log_retry_backoff_ms(),
            subscribe_updates: default_subscribe_updates(),
        }
    }
}

/// [server] 段：监听地址、规则文件、日志库
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 日志表名（仅字母数字与下划线）
    #[serde(default = "default_table")]
    pub table: String,
    /// 规则文件事件静默多久后重新加载
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// 要求请求携带有效的 user_uuid cookie
    #[serde(default)]
    pub require_uid_cookie: bool,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("config/rules_config.json")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/prescreen.db")
}

fn default_table() -> String {
    "session_logs".to_string()
}

fn default_watch_debounce_ms() -> u64 {
    200
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            rules_path: default_rules_path(),
            db_path: default_db_path(),
            table: default_table(),
            watch_debounce_ms: default_watch_debounce_ms(),
            require_uid_cookie: false,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PRESCREEN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PRESCREEN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PRESCREEN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
