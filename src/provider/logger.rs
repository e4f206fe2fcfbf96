//! 会话日志提交
//!
//! 为每次日志分配会话标识（默认每条日志新生成；sticky 时沿用本地文件中的标识），
//! 组装 SessionRecord 提交给配置提供方；失败按固定间隔重试，4xx 拒绝不重试。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::{LogRequest, SessionRecord};
use crate::provider::traits::{ConfigProvider, ProviderError};

/// 会话标识分配方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdPolicy {
    /// 每条日志一个新的 v4 UUID
    PerEvent,
    /// 固定标识（跨会话关联）
    Sticky(String),
}

impl SessionIdPolicy {
    /// 从文件读取固定标识；文件不存在或内容无效时生成新标识并写回
    pub fn sticky_from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Ok(existing) = std::fs::read_to_string(path) {
            let existing = existing.trim();
            if uuid::Uuid::parse_str(existing).is_ok() && existing.len() == 36 {
                return Ok(SessionIdPolicy::Sticky(existing.to_string()));
            }
            tracing::warn!(path = %path.display(), "Ignoring invalid stored uid");
        }
        let uid = uuid::Uuid::new_v4().to_string();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &uid)?;
        Ok(SessionIdPolicy::Sticky(uid))
    }

    pub fn sticky_uid(&self) -> Option<&str> {
        match self {
            SessionIdPolicy::Sticky(uid) => Some(uid),
            SessionIdPolicy::PerEvent => None,
        }
    }
}

/// 日志最终未能提交
#[derive(Error, Debug)]
#[error("Session log {uid} not recorded after {attempts} attempt(s): {source}")]
pub struct LogError {
    pub uid: String,
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

pub struct SessionLogger {
    provider: Arc<dyn ConfigProvider>,
    policy: SessionIdPolicy,
    attempts: u32,
    backoff: Duration,
}

impl SessionLogger {
    pub fn new(provider: Arc<dyn ConfigProvider>, policy: SessionIdPolicy) -> Self {
        Self {
            provider,
            policy,
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn mint_session_id(&self) -> String {
        match &self.policy {
            SessionIdPolicy::PerEvent => uuid::Uuid::new_v4().to_string(),
            SessionIdPolicy::Sticky(uid) => uid.clone(),
        }
    }

    /// 提交一条日志，返回实际发送的记录
    pub async fn log(&self, request: LogRequest) -> Result<SessionRecord, LogError> {
        let record = SessionRecord {
            uid: self.mint_session_id(),
            sequence: request.sequence,
            action: request.action,
            result: request.result,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.log_session(&record).await {
                Ok(()) => {
                    tracing::info!(
                        uid = %record.uid,
                        action = %record.action,
                        result = %record.result,
                        "Session logged"
                    );
                    return Ok(record);
                }
                Err(e) if attempt >= self.attempts || e.is_permanent() => {
                    tracing::error!(uid = %record.uid, attempts = attempt, "Session log not recorded: {}", e);
                    return Err(LogError {
                        uid: record.uid,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(uid = %record.uid, attempt, "Session log failed, retrying: {}", e);
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, SessionResult};
    use crate::provider::memory::InMemoryConfigProvider;
    use crate::rules::RuleGraph;

    fn request() -> LogRequest {
        LogRequest {
            sequence: Vec::new(),
            action: Action::Start,
            result: SessionResult::Incomplete,
        }
    }

    #[tokio::test]
    async fn test_per_event_ids_differ() {
        let provider = Arc::new(InMemoryConfigProvider::new(RuleGraph::default()));
        let logger = SessionLogger::new(provider.clone(), SessionIdPolicy::PerEvent);
        let a = logger.log(request()).await.unwrap();
        let b = logger.log(request()).await.unwrap();
        assert_ne!(a.uid, b.uid);
        assert_eq!(a.uid.len(), 36);
        assert_eq!(provider.records().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_until_recorded() {
        let provider = Arc::new(InMemoryConfigProvider::new(RuleGraph::default()));
        provider.fail_next_logs(2);
        let logger = SessionLogger::new(provider.clone(), SessionIdPolicy::PerEvent)
            .with_retry(3, Duration::ZERO);
        assert!(logger.log(request()).await.is_ok());
        assert_eq!(provider.records().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let provider = Arc::new(InMemoryConfigProvider::new(RuleGraph::default()));
        provider.fail_next_logs(5);
        let logger = SessionLogger::new(provider.clone(), SessionIdPolicy::Sticky("fixed".to_string()))
            .with_retry(2, Duration::ZERO);
        let err = logger.log(request()).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.uid, "fixed");
        assert!(provider.records().is_empty());
    }

    #[test]
    fn test_sticky_uid_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("uid");
        let first = SessionIdPolicy::sticky_from_file(&path).unwrap();
        let second = SessionIdPolicy::sticky_from_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sticky_uid().map(str::len), Some(36));
    }
}
