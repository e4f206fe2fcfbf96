//! HTTP 配置提供方
//!
//! GET {base}/api/rules 拉取规则图；POST {base}/api/data 提交日志（可附带 user_uuid cookie）；
//! GET {base}/api/events 订阅服务端推送，收到 rules_updated 时通知调用方重新拉取。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::SessionRecord;
use crate::provider::traits::{ConfigProvider, ProviderError};
use crate::rules::RuleGraph;

/// 服务端错误响应体 `{ "message": ... }`
#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

/// 推送事件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RulesUpdated {
    pub version: u64,
}

pub struct HttpConfigProvider {
    client: reqwest::Client,
    base_url: String,
    delay_key: String,
    first_rule: String,
    /// sticky 会话标识时作为 user_uuid cookie 发送
    uid_cookie: Option<String>,
}

impl HttpConfigProvider {
    pub fn new(
        base_url: impl Into<String>,
        delay_key: impl Into<String>,
        first_rule: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            delay_key: delay_key.into(),
            first_rule: first_rule.into(),
            uid_cookie: None,
        })
    }

    pub fn with_uid_cookie(mut self, uid: impl Into<String>) -> Self {
        self.uid_cookie = Some(uid.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 订阅 /api/events；连接断开后按 backoff 重连，cancel 触发时结束
    pub fn subscribe_updates(
        &self,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<RulesUpdated> {
        let (tx, rx) = mpsc::unbounded_channel();
        // 长连接不使用请求超时
        let client = reqwest::Client::new();
        let url = self.endpoint("/api/events");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = read_events(&client, &url, &tx) => {
                        if let Err(e) = result {
                            tracing::warn!("Update stream closed: {}", e);
                        }
                    }
                }
                if tx.is_closed() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        });
        rx
    }
}

/// 读取一条 SSE 连接直到断开
async fn read_events(
    client: &reqwest::Client,
    url: &str,
    tx: &mpsc::UnboundedSender<RulesUpdated>,
) -> Result<(), ProviderError> {
    let mut response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ProviderError::Rejected {
            status: response.status().as_u16(),
            message: "event stream unavailable".to_string(),
        });
    }

    let mut frames = FrameBuffer::default();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ProviderError::Http(e.to_string()))?
    {
        for frame in frames.push(&chunk) {
            if let Some(update) = parse_event(&frame) {
                tracing::info!(version = update.version, "Rules updated on server");
                if tx.send(update).is_err() {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// 按字节缓存 SSE 流，只解码以 `\n\n` 结尾的整帧
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    bytes: Vec<u8>,
}

impl FrameBuffer {
    /// 追加一段字节，返回其中已完整的帧
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(end) = self.bytes.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.bytes.drain(..end + 2).collect();
            frames.push(String::from_utf8_lossy(&frame).into_owned());
        }
        frames
    }
}

/// 解析一帧 SSE；只关心 data 为 `{"type":"rules_updated",...}` 的事件
pub(crate) fn parse_event(frame: &str) -> Option<RulesUpdated> {
    let data: String = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    let value: serde_json::Value = serde_json::from_str(&data).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("rules_updated") {
        return None;
    }
    serde_json::from_value(value).ok()
}

async fn rejection(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = match response.json::<MessageBody>().await {
        Ok(body) => body.message,
        Err(_) => "no message".to_string(),
    };
    ProviderError::Rejected { status, message }
}

#[async_trait]
impl ConfigProvider for HttpConfigProvider {
    async fn get_rules(&self) -> Result<RuleGraph, ProviderError> {
        let response = self
            .client
            .get(self.endpoint("/api/rules"))
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let graph = RuleGraph::parse_validated(&text, &self.delay_key, &self.first_rule)?;
        tracing::info!(rules = graph.len(), "Loaded rule graph");
        Ok(graph)
    }

    async fn log_session(&self, record: &SessionRecord) -> Result<(), ProviderError> {
        let mut request = self.client.post(self.endpoint("/api/data")).json(record);
        if let Some(uid) = &self.uid_cookie {
            request = request.header(reqwest::header::COOKIE, format!("user_uuid={uid}"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejection(response).await)
        }
    }
}
