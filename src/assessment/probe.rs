//! 探测器抽象
//!
//! 所有探测实现（HTTP / 脚本化 Mock）实现 Prober：对规则的 target 发起一次可达性检查，返回 HTTP 状态码。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 单次探测失败（网络层），不会中止规则评估
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Probe transport error: {0}")]
    Transport(String),
    #[error("Probe timed out")]
    Timeout,
    #[error("Invalid probe target: {0}")]
    InvalidTarget(String),
}

/// 探测器 trait
#[async_trait]
pub trait Prober: Send + Sync {
    /// 对 target 探测一次，返回 HTTP 状态码
    async fn probe(&self, target: &str) -> Result<u16, ProbeError>;
}

/// HTTP 探测器：GET `base_url + target`，读取响应状态码
pub struct HttpProber {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProber {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url_for(&self, target: &str) -> Result<reqwest::Url, ProbeError> {
        let raw = format!("{}{}", self.base_url, target);
        reqwest::Url::parse(&raw).map_err(|_| ProbeError::InvalidTarget(raw))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &str) -> Result<u16, ProbeError> {
        let url = self.url_for(target)?;
        match self.client.get(url).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout),
            Err(e) => Err(ProbeError::Transport(e.to_string())),
        }
    }
}
