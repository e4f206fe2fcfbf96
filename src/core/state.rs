//! 会话状态定义：状态枚举、用户动作、结论、评估序列与对外快照
//!
//! 编排器内部由 SessionMachine 维护完整状态，并投影为轻量的 SessionSnapshot 供前端渲染。

use serde::{Deserialize, Serialize};

use crate::rules::{AssessedRule, RuleKey};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Retry,
    Paused,
    Completed,
    Error,
}

impl SessionStatus {
    /// 正在探测（标准或重试）
    pub fn is_fetching(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Retry)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Retry => write!(f, "retry"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// 触发本次记录的用户动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Restart,
    Retry,
    Continue,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Restart => write!(f, "restart"),
            Action::Retry => write!(f, "retry"),
            Action::Continue => write!(f, "continue"),
        }
    }
}

/// 记录到日志中的会话结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionResult {
    #[serde(rename = "completed successfully")]
    CompletedSuccessfully,
    #[serde(rename = "completed successfully with warning(s)")]
    CompletedWithWarnings,
    #[serde(rename = "completed unsuccessfully")]
    CompletedUnsuccessfully,
    #[serde(rename = "incomplete")]
    Incomplete,
}

impl SessionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionResult::CompletedSuccessfully => "completed successfully",
            SessionResult::CompletedWithWarnings => "completed successfully with warning(s)",
            SessionResult::CompletedUnsuccessfully => "completed unsuccessfully",
            SessionResult::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for SessionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 重试范围：全部违规 / 仅警告 / 仅错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryScope {
    #[default]
    All,
    Warning,
    Error,
}

/// 已完成评估的规则序列，最近的在前；相同记录不会重复追加
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleList {
    entries: Vec<AssessedRule>,
}

impl RuleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 头插；若已存在完全相同的记录则忽略并返回 false
    pub fn push_front(&mut self, assessed: AssessedRule) -> bool {
        if self.entries.contains(&assessed) {
            return false;
        }
        self.entries.insert(0, assessed);
        true
    }

    pub fn head(&self) -> Option<&AssessedRule> {
        self.entries.first()
    }

    pub fn as_slice(&self) -> &[AssessedRule] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<AssessedRule> {
        self.entries.clone()
    }

    pub fn replace(&mut self, entries: Vec<AssessedRule>) {
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<AssessedRule>> for RuleList {
    fn from(entries: Vec<AssessedRule>) -> Self {
        Self { entries }
    }
}

/// 待写入的日志（尚未分配会话标识）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub sequence: Vec<AssessedRule>,
    pub action: Action,
    pub result: SessionResult,
}

/// POST /api/data 的请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub uid: String,
    pub sequence: Vec<AssessedRule>,
    pub action: Action,
    pub result: SessionResult,
}

/// 最近一次日志提交的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LogState {
    /// 尚无日志
    None,
    Pending,
    Recorded { uid: String },
    NotRecorded { uid: String, reason: String },
}

/// 前端看到的会话投影
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub action: Option<Action>,
    /// 标准评估中的当前规则
    pub current_rule: Option<RuleKey>,
    /// 重试中的当前违规
    pub current_retry_rule: Option<RuleKey>,
    pub tries: u32,
    /// 0-100，规则完成时恰为 100
    pub progress: u8,
    pub rule_list: Vec<AssessedRule>,
    pub result: Option<SessionResult>,
    /// 若存在唯一路径通往终点规则，整次评估的预计长度
    pub end_path_length: Option<usize>,
    /// paused 时能否继续（终止规则存在通过后继）
    pub can_continue: bool,
    pub log: LogState,
    pub error_message: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            action: None,
            current_rule: None,
            current_retry_rule: None,
            tries: 0,
            progress: 0,
            rule_list: Vec::new(),
            result: None,
            end_path_length: None,
            can_continue: false,
            log: LogState::None,
            error_message: None,
        }
    }
}
