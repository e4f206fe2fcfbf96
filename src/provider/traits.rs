//! 配置提供方抽象
//!
//! 规则图的来源与会话日志的去处：HTTP 服务（GET /api/rules、POST /api/data）或内存实现。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::SessionRecord;
use crate::rules::{RuleGraph, RuleGraphError};

/// 与配置提供方交互失败
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Http(String),

    /// 服务端拒绝（非 2xx），message 为响应体中的说明
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Rule graph error: {0}")]
    Rules(#[from] RuleGraphError),

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// 被服务端明确拒绝的请求（4xx）重发也不会成功
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Rejected { status, .. } if (400..500).contains(status))
    }
}

/// 配置提供方
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// 拉取最新规则图（已校验）
    async fn get_rules(&self) -> Result<RuleGraph, ProviderError>;

    /// 提交一条会话日志
    async fn log_session(&self, record: &SessionRecord) -> Result<(), ProviderError>;
}
