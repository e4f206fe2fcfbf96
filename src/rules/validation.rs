//! 提交数据防篡改校验
//!
//! SafeValues 在规则图加载时构建一次，并随重新加载整体替换；
//! 提交的 sequence 中每条记录的每个字段都必须出现在当前规则图的已知取值里。

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::rules::graph::RuleGraph;
use crate::rules::types::AssessedRule;

const UUID_LEN: usize = 36;
const UUID_PATTERN: &str =
    r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$";

/// 校验失败原因
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Sequence entry '{key}' has unknown {field}")]
    UnknownValue { key: String, field: &'static str },
    #[error("Sequence entry '{key}' has invalid response status {status}")]
    InvalidStatus { key: String, status: u16 },
    #[error("Malformed identifier: {0}")]
    InvalidUid(String),
    #[error("Missing user_uuid cookie")]
    MissingCookie,
}

/// 从规则图提取的合法取值集合（逐字段独立判断）
#[derive(Debug, Clone)]
pub struct SafeValues {
    keys: HashSet<String>,
    targets: HashSet<String>,
    titles: HashSet<String>,
    fail_texts: HashSet<String>,
    pass_rules: HashSet<String>,
    fail_rules: HashSet<String>,
    max_tries: HashSet<u32>,
    try_delays: HashSet<Option<u64>>,
    continue_options: HashSet<bool>,
    warnings: HashSet<bool>,
    uid_pattern: Regex,
}

impl SafeValues {
    pub fn from_graph(graph: &RuleGraph) -> Self {
        let mut values = Self {
            keys: HashSet::new(),
            targets: HashSet::new(),
            titles: HashSet::new(),
            fail_texts: HashSet::new(),
            pass_rules: HashSet::new(),
            fail_rules: HashSet::new(),
            max_tries: HashSet::new(),
            try_delays: HashSet::new(),
            continue_options: HashSet::new(),
            warnings: HashSet::new(),
            uid_pattern: uid_regex(),
        };
        for rule in graph.rules() {
            values.keys.insert(rule.key.clone());
            values.targets.insert(rule.target.clone());
            values.titles.insert(rule.title.clone());
            values.fail_texts.insert(rule.fail_text.clone());
            values.pass_rules.insert(rule.pass_rule_key.clone());
            values.fail_rules.insert(rule.fail_rule_key.clone());
            values.max_tries.insert(rule.max_tries);
            values.try_delays.insert(rule.try_delay_ms);
            values.continue_options.insert(rule.continue_option);
            values.warnings.insert(rule.warning);
        }
        values
    }

    /// 校验 sequence 中的每一条评估记录
    pub fn check_sequence(&self, sequence: &[AssessedRule]) -> Result<(), ValidationError> {
        for entry in sequence {
            self.check_entry(entry)?;
        }
        Ok(())
    }

    fn check_entry(&self, entry: &AssessedRule) -> Result<(), ValidationError> {
        let rule = &entry.rule;
        let unknown = |field| ValidationError::UnknownValue {
            key: rule.key.clone(),
            field,
        };

        if !self.keys.contains(&rule.key) {
            return Err(unknown("key"));
        }
        if !self.targets.contains(&rule.target) {
            return Err(unknown("port"));
        }
        if !self.titles.contains(&rule.title) {
            return Err(unknown("title"));
        }
        if !self.fail_texts.contains(&rule.fail_text) {
            return Err(unknown("failText"));
        }
        if !self.pass_rules.contains(&rule.pass_rule_key) {
            return Err(unknown("passRule"));
        }
        if !self.fail_rules.contains(&rule.fail_rule_key) {
            return Err(unknown("failRule"));
        }
        if !self.max_tries.contains(&rule.max_tries) {
            return Err(unknown("maxTries"));
        }
        if !self.try_delays.contains(&rule.try_delay_ms) {
            return Err(unknown("tryDelayMs"));
        }
        if !self.continue_options.contains(&rule.continue_option) {
            return Err(unknown("continueOption"));
        }
        if !self.warnings.contains(&rule.warning) {
            return Err(unknown("warning"));
        }
        match entry.response_status {
            Some(status) if !is_valid_http_status(status) => Err(ValidationError::InvalidStatus {
                key: rule.key.clone(),
                status,
            }),
            _ => Ok(()),
        }
    }

    /// 标识符：UUID v1-v5，长度 36
    pub fn check_uid(&self, uid: &str) -> Result<(), ValidationError> {
        if uid.len() == UUID_LEN && self.uid_pattern.is_match(uid) {
            Ok(())
        } else {
            Err(ValidationError::InvalidUid(uid.chars().take(64).collect()))
        }
    }

    /// 从 Cookie 头中取出 user_uuid 并校验
    pub fn check_cookie(&self, cookie_header: Option<&str>) -> Result<(), ValidationError> {
        let value = cookie_header
            .and_then(|h| user_uuid_from_cookie(h))
            .ok_or(ValidationError::MissingCookie)?;
        self.check_uid(value)
    }
}

/// 三位 1xx-5xx 状态码
pub fn is_valid_http_status(status: u16) -> bool {
    (100..=599).contains(&status)
}

/// 解析 `a=b; user_uuid=...` 形式的 Cookie 头
pub fn user_uuid_from_cookie(header: &str) -> Option<&str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("user_uuid="))
}

fn uid_regex() -> Regex {
    // 常量模式，编译失败只可能是代码错误
    Regex::new(UUID_PATTERN).unwrap_or_else(|_| unreachable!("UUID pattern is a valid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::Rule;

    fn graph() -> RuleGraph {
        RuleGraph::from_rules([
            Rule::new("FirstRule", "/first", "Second", "END", 3).with_title("First", "fix first"),
            Rule::new("Second", "/second", "END", "END", 1)
                .with_title("Second", "fix second")
                .with_warning(true),
        ])
    }

    fn entry(key: &str, status: Option<u16>) -> AssessedRule {
        AssessedRule::new(graph().get(key).unwrap().clone(), status)
    }

    #[test]
    fn test_accepts_known_sequence() {
        let safe = SafeValues::from_graph(&graph());
        let seq = vec![entry("Second", Some(200)), entry("FirstRule", None)];
        assert_eq!(safe.check_sequence(&seq), Ok(()));
    }

    #[test]
    fn test_rejects_altered_title() {
        let safe = SafeValues::from_graph(&graph());
        let mut tampered = entry("FirstRule", Some(200));
        tampered.rule.title = "Injected".to_string();
        assert_eq!(
            safe.check_sequence(&[tampered]),
            Err(ValidationError::UnknownValue {
                key: "FirstRule".into(),
                field: "title"
            })
        );
    }

    #[test]
    fn test_rejects_unknown_max_tries_and_status() {
        let safe = SafeValues::from_graph(&graph());
        let mut tampered = entry("FirstRule", Some(200));
        tampered.rule.max_tries = 99;
        assert!(matches!(
            safe.check_sequence(&[tampered]),
            Err(ValidationError::UnknownValue { field: "maxTries", .. })
        ));
        assert!(matches!(
            safe.check_sequence(&[entry("Second", Some(99))]),
            Err(ValidationError::InvalidStatus { status: 99, .. })
        ));
        assert!(matches!(
            safe.check_sequence(&[entry("Second", Some(600))]),
            Err(ValidationError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn test_rejects_forged_try_delay() {
        let safe = SafeValues::from_graph(&graph());
        let forged = AssessedRule::new(
            graph().get("Second").unwrap().clone().with_try_delay_ms(987_654_321),
            Some(200),
        );
        assert_eq!(
            safe.check_sequence(&[forged]),
            Err(ValidationError::UnknownValue {
                key: "Second".into(),
                field: "tryDelayMs"
            })
        );

        let with_delay = RuleGraph::from_rules([
            Rule::new("FirstRule", "/first", "END", "END", 3).with_try_delay_ms(250)
        ]);
        let safe = SafeValues::from_graph(&with_delay);
        let genuine = AssessedRule::new(with_delay.get("FirstRule").unwrap().clone(), None);
        assert_eq!(safe.check_sequence(&[genuine.clone()]), Ok(()));
        let mut dropped = genuine;
        dropped.rule.try_delay_ms = None;
        assert!(safe.check_sequence(&[dropped]).is_err());
    }

    #[test]
    fn test_uid_pattern() {
        let safe = SafeValues::from_graph(&graph());
        assert!(safe.check_uid("3f2b8c1e-9d4a-4c2e-8b7a-1e2d3c4b5a69").is_ok());
        assert!(safe.check_uid("3F2B8C1E-9D4A-4C2E-8B7A-1E2D3C4B5A69").is_ok());
        assert!(safe.check_uid(&uuid::Uuid::new_v4().to_string()).is_ok());
        // 版本号 0、变体位错误、长度不对
        assert!(safe.check_uid("3f2b8c1e-9d4a-0c2e-8b7a-1e2d3c4b5a69").is_err());
        assert!(safe.check_uid("3f2b8c1e-9d4a-4c2e-7b7a-1e2d3c4b5a69").is_err());
        assert!(safe.check_uid("not-a-uuid").is_err());
    }

    #[test]
    fn test_cookie() {
        let safe = SafeValues::from_graph(&graph());
        let id = uuid::Uuid::new_v4().to_string();
        let header = format!("theme=dark; user_uuid={id}");
        assert_eq!(user_uuid_from_cookie(&header), Some(id.as_str()));
        assert!(safe.check_cookie(Some(&header)).is_ok());
        assert_eq!(safe.check_cookie(None), Err(ValidationError::MissingCookie));
        assert_eq!(safe.check_cookie(Some("theme=dark")), Err(ValidationError::MissingCookie));
    }
}
