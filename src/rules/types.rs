//! 规则图数据类型
//!
//! Rule 是图中的一个检查节点；AssessedRule 是评估结束后带上 responseStatus 的记录，
//! 序列化字段名与规则配置文件保持一致（passRule / failRule / port / responseStatus）。

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub type RuleKey = String;

/// 边终止哨兵，比较时大小写不敏感
pub const END: &str = "END";

/// key 是否为终止哨兵 END（end / End 亦可）
pub fn is_end(key: &str) -> bool {
    key.eq_ignore_ascii_case(END)
}

/// 规则定义（配置文件中的一项）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// 会话内唯一标识
    pub key: RuleKey,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fail_text: String,
    /// 探测目标（端口或路径），拼接在 probe_base_url 之后
    #[serde(rename = "port", deserialize_with = "string_or_number")]
    pub target: String,
    /// 探测次数上限
    pub max_tries: u32,
    /// 规则级探测间隔；缺省时使用图级 tryDelay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub try_delay_ms: Option<u64>,
    #[serde(rename = "passRule")]
    pub pass_rule_key: RuleKey,
    #[serde(rename = "failRule")]
    pub fail_rule_key: RuleKey,
    /// 终止失败时仅记为警告
    #[serde(default)]
    pub warning: bool,
    /// 终止失败时允许用户继续（paused 而不是 error）
    #[serde(default)]
    pub continue_option: bool,
}

impl Rule {
    /// 便于测试与内存配置的构造器，标题与失败文案为空
    pub fn new(
        key: impl Into<RuleKey>,
        target: impl Into<String>,
        pass_rule_key: impl Into<RuleKey>,
        fail_rule_key: impl Into<RuleKey>,
        max_tries: u32,
    ) -> Self {
        Self {
            key: key.into(),
            title: String::new(),
            fail_text: String::new(),
            target: target.into(),
            max_tries,
            try_delay_ms: None,
            pass_rule_key: pass_rule_key.into(),
            fail_rule_key: fail_rule_key.into(),
            warning: false,
            continue_option: false,
        }
    }

    pub fn with_warning(mut self, warning: bool) -> Self {
        self.warning = warning;
        self
    }

    pub fn with_continue_option(mut self, continue_option: bool) -> Self {
        self.continue_option = continue_option;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>, fail_text: impl Into<String>) -> Self {
        self.title = title.into();
        self.fail_text = fail_text.into();
        self
    }

    pub fn with_try_delay_ms(mut self, ms: u64) -> Self {
        self.try_delay_ms = Some(ms);
        self
    }
}

/// 已完成评估的规则：规则本身 + 终止时观察到的状态码（null 表示从未观察到）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessedRule {
    #[serde(flatten)]
    pub rule: Rule,
    pub response_status: Option<u16>,
}

impl AssessedRule {
    pub fn new(rule: Rule, response_status: Option<u16>) -> Self {
        Self {
            rule,
            response_status,
        }
    }

    pub fn key(&self) -> &str {
        &self.rule.key
    }
}

/// 重试链节点：在重试开始时由违规列表合成，nextRule 不属于原始规则图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryNode {
    #[serde(flatten)]
    pub assessed: AssessedRule,
    #[serde(rename = "nextRule")]
    pub next_rule_key: Option<RuleKey>,
}

impl RetryNode {
    pub fn key(&self) -> &str {
        self.assessed.key()
    }

    pub fn rule(&self) -> &Rule {
        &self.assessed.rule
    }
}

/// 配置加载错误（缺失、格式错误、悬空边）：对会话启动是致命的
#[derive(Error, Debug)]
pub enum RuleGraphError {
    #[error("Failed to read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed rules JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed rule entry '{entry}': {reason}")]
    MalformedEntry { entry: String, reason: String },
    #[error("Entry '{entry}' declares mismatched key '{key}'")]
    KeyMismatch { entry: String, key: String },
    #[error("First rule '{0}' not found")]
    MissingFirstRule(String),
    #[error("Rule '{rule}' points to unknown rule '{target}'")]
    DanglingEdge { rule: String, target: String },
    #[error("Rule '{0}' has maxTries = 0")]
    ZeroMaxTries(String),
}

/// 端口既可能写成字符串也可能写成数字
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
