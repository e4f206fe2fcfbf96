//! Prescreen - 设备合规预检
//!
//! 模块划分：
//! - **assessment**: 探测器抽象、单规则探测循环、重试链、收尾判定
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态机、状态投影、激活监管、主控循环
//! - **observability**: tracing 初始化
//! - **provider**: 规则图来源与会话日志提交（HTTP / 内存）
//! - **rules**: 规则图数据模型、谓词、加载校验、防篡改取值集合
//! - **server**: 配置服务端（axum + SQLite），需启用 `server` feature
//! - **ui**: 控制台前端

pub mod assessment;
pub mod config;
pub mod core;
pub mod observability;
pub mod provider;
pub mod rules;
#[cfg(feature = "server")]
pub mod server;
pub mod ui;
