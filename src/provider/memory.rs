//! 内存配置提供方（测试与离线演示）
//!
//! 持有一张规则图并记录提交的日志；可设置前 N 次提交失败以演练日志重试。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::SessionRecord;
use crate::provider::traits::{ConfigProvider, ProviderError};
use crate::rules::RuleGraph;

#[derive(Debug, Default)]
pub struct InMemoryConfigProvider {
    graph: RuleGraph,
    records: Mutex<Vec<SessionRecord>>,
    failures_left: Mutex<u32>,
}

impl InMemoryConfigProvider {
    pub fn new(graph: RuleGraph) -> Self {
        Self {
            graph,
            ..Self::default()
        }
    }

    /// 接下来 n 次 log_session 返回 500
    pub fn fail_next_logs(&self, n: u32) {
        if let Ok(mut left) = self.failures_left.lock() {
            *left = n;
        }
    }

    /// 已记录的日志
    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn get_rules(&self) -> Result<RuleGraph, ProviderError> {
        Ok(self.graph.clone())
    }

    async fn log_session(&self, record: &SessionRecord) -> Result<(), ProviderError> {
        {
            let mut left = self
                .failures_left
                .lock()
                .map_err(|_| ProviderError::Http("lock poisoned".to_string()))?;
            if *left > 0 {
                *left -= 1;
                return Err(ProviderError::Rejected {
                    status: 500,
                    message: "Error inserting data".to_string(),
                });
            }
        }
        self.records
            .lock()
            .map_err(|_| ProviderError::Http("lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
