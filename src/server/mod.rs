//! 配置服务端：规则下发、日志写入、变更推送
//!
//! 路由：GET /api/rules、POST /api/data、GET /api/events（SSE）、POST /api/config/reload、GET /api/health。
//! 所有响应带 `Content-Security-Policy: default-src 'self'`。

pub mod log_store;
pub mod rules_store;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;

use crate::core::SessionRecord;

pub use log_store::{LogRow, LogStore, StoreError};
pub use rules_store::{LoadedRules, RulesStore};

pub const TAMPERED: &str = "Data has been tampered with, ceasing request.";
pub const BAD_BODY: &str = "Error in body";
pub const INSERT_FAILED: &str = "Error inserting data";
pub const INSERTED: &str = "Data inserted successfully";

pub struct AppState {
    pub rules: Arc<RulesStore>,
    pub logs: Arc<LogStore>,
    /// 要求 POST /api/data 携带有效的 user_uuid cookie
    pub require_uid_cookie: bool,
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn message(status: StatusCode, text: impl Into<String>) -> ApiResponse {
    (status, Json(serde_json::json!({ "message": text.into() })))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/rules", get(api_rules))
        .route("/api/data", post(api_data))
        .route("/api/events", get(api_events_sse))
        .route("/api/config/reload", post(api_config_reload))
        .route("/api/health", get(|| async { "OK" }))
        .layer(middleware::from_fn(content_security_policy))
        .with_state(state)
}

async fn content_security_policy(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}

/// GET /api/rules：返回磁盘上最新的规则配置
async fn api_rules(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    if let Err(e) = state.rules.refresh().await {
        tracing::warn!("Serving previous rules: {}", e);
    }
    Json(state.rules.current().await.raw.clone())
}

/// POST /api/data：校验后写入一行日志
async fn api_data(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<SessionRecord>, JsonRejection>,
) -> ApiResponse {
    let record = match payload {
        Ok(Json(record)) => record,
        Err(JsonRejection::JsonDataError(e)) => {
            tracing::warn!("Rejected log with unexpected shape: {}", e);
            return message(StatusCode::METHOD_NOT_ALLOWED, TAMPERED);
        }
        Err(JsonRejection::MissingJsonContentType(e)) => {
            tracing::warn!("Rejected log without JSON content type: {}", e);
            return message(StatusCode::METHOD_NOT_ALLOWED, TAMPERED);
        }
        Err(e) => {
            tracing::warn!("Rejected unreadable log body: {}", e);
            return message(StatusCode::BAD_REQUEST, BAD_BODY);
        }
    };

    let loaded = state.rules.current().await;
    let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
    let checked = (if state.require_uid_cookie {
        loaded.safe.check_cookie(cookie)
    } else {
        Ok(())
    })
    .and_then(|_| loaded.safe.check_uid(&record.uid))
    .and_then(|_| loaded.safe.check_sequence(&record.sequence));
    if let Err(e) = checked {
        let uid: String = record.uid.chars().take(64).collect();
        tracing::warn!(uid = %uid, "Tamper check failed: {}", e);
        return message(StatusCode::METHOD_NOT_ALLOWED, TAMPERED);
    }

    let sequence = match serde_json::to_string(&record.sequence) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Could not encode sequence: {}", e);
            return message(StatusCode::INTERNAL_SERVER_ERROR, INSERT_FAILED);
        }
    };
    let row = LogRow {
        uuid: record.uid.clone(),
        sequence,
        ip: urlencoding::encode(&client_ip(&headers, connect)).into_owned(),
        action: record.action.to_string(),
        result: record.result.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        user_agent: urlencoding::encode(
            headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
        )
        .into_owned(),
    };

    let logs = state.logs.clone();
    match tokio::task::spawn_blocking(move || logs.insert(&row)).await {
        Ok(Ok(())) => {
            tracing::info!(uid = %record.uid, action = %record.action, result = %record.result, "Log stored");
            message(StatusCode::OK, INSERTED)
        }
        Ok(Err(e)) => {
            tracing::error!("Log insert failed: {}", e);
            message(StatusCode::INTERNAL_SERVER_ERROR, INSERT_FAILED)
        }
        Err(e) => {
            tracing::error!("Log insert task failed: {}", e);
            message(StatusCode::INTERNAL_SERVER_ERROR, INSERT_FAILED)
        }
    }
}

/// 代理转发的地址优先，其次是连接对端
fn client_ip(headers: &HeaderMap, connect: Option<ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// GET /api/events：SSE 流，推送 rules_updated
async fn api_events_sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.rules.subscribe();
    let event_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((Ok(Event::default().data(msg)), rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// POST /api/config/reload：强制重新读取规则文件
async fn api_config_reload(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.rules.reload().await {
        Ok(version) => (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "Rules reloaded", "version": version })),
        ),
        Err(e) => message(StatusCode::UNPROCESSABLE_ENTITY, format!("Error loading rules: {e}")),
    }
}
