//! 配置提供方：规则图来源、会话日志提交

pub mod http;
pub mod logger;
pub mod memory;
pub mod traits;

pub use http::{HttpConfigProvider, RulesUpdated};
pub use logger::{LogError, SessionIdPolicy, SessionLogger};
pub use memory::InMemoryConfigProvider;
pub use traits::{ConfigProvider, ProviderError};
