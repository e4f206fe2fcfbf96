//! 规则谓词
//!
//! 引擎中所有分支条件都通过这里的纯函数表达，不在别处直接比较字段。

use crate::rules::types::{is_end, AssessedRule, RetryNode, Rule};

fn is_success_status(status: Option<u16>) -> bool {
    matches!(status, Some(s) if (200..=299).contains(&s))
}

fn is_failure_status(status: Option<u16>) -> bool {
    match status {
        Some(s) => s > 299,
        None => true,
    }
}

/// 违规：失败（>299 或未观察到状态）且失败边为 END
pub fn is_violation(assessed: &AssessedRule) -> bool {
    is_failure_status(assessed.response_status) && is_end(&assessed.rule.fail_rule_key)
}

/// 致命违规
pub fn is_an_error(assessed: &AssessedRule) -> bool {
    is_violation(assessed) && !assessed.rule.warning
}

/// 非致命违规（警告）
pub fn is_a_warning(assessed: &AssessedRule) -> bool {
    is_violation(assessed) && assessed.rule.warning
}

/// 通过且存在后继：沿 passRule 前进
pub fn is_pass_rule(assessed: &AssessedRule) -> bool {
    !is_end(&assessed.rule.pass_rule_key) && is_success_status(assessed.response_status)
}

/// 失败且存在后继：沿 failRule 前进
pub fn is_fail_rule(assessed: &AssessedRule) -> bool {
    !is_end(&assessed.rule.fail_rule_key) && is_failure_status(assessed.response_status)
}

/// 终点规则：两条边都是 END
pub fn is_final_rule(rule: &Rule) -> bool {
    is_end(&rule.pass_rule_key) && is_end(&rule.fail_rule_key)
}

/// 重试链最后一个节点
pub fn is_retry_chain_end(node: &RetryNode) -> bool {
    node.next_rule_key.is_none()
}

/// 合规检查：失败即终止，只有一条向前的路径
pub fn is_compliance_check(rule: &Rule) -> bool {
    !is_end(&rule.pass_rule_key) && is_end(&rule.fail_rule_key)
}

/// 完全通过（状态码恰为 200）
pub fn is_clean_pass(assessed: &AssessedRule) -> bool {
    assessed.response_status == Some(200)
}

/// 失败计数：状态非 200 且失败边为 END
pub fn failed_count(rule_list: &[AssessedRule]) -> usize {
    rule_list
        .iter()
        .filter(|r| !is_clean_pass(r) && is_end(&r.rule.fail_rule_key))
        .count()
}

pub fn passed_count(rule_list: &[AssessedRule]) -> usize {
    rule_list.iter().filter(|r| is_clean_pass(r)).count()
}

pub fn warnings_count(rule_list: &[AssessedRule]) -> usize {
    rule_list
        .iter()
        .filter(|r| !is_clean_pass(r) && r.rule.warning && is_end(&r.rule.fail_rule_key))
        .count()
}

pub fn errors_count(rule_list: &[AssessedRule]) -> usize {
    rule_list
        .iter()
        .filter(|r| !is_clean_pass(r) && !r.rule.warning && is_end(&r.rule.fail_rule_key))
        .count()
}

pub fn has_unsuccessful_rules(rule_list: &[AssessedRule]) -> bool {
    rule_list.iter().any(is_violation)
}

pub fn has_error_and_warning(rule_list: &[AssessedRule]) -> bool {
    rule_list.iter().any(is_an_error) && rule_list.iter().any(is_a_warning)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessed(pass: &str, fail: &str, status: Option<u16>, warning: bool) -> AssessedRule {
        AssessedRule::new(Rule::new("R", "/r", pass, fail, 1).with_warning(warning), status)
    }

    #[test]
    fn test_violation_requires_terminal_fail_edge() {
        assert!(is_violation(&assessed("Next", "END", Some(500), false)));
        assert!(is_violation(&assessed("Next", "end", None, false)));
        assert!(!is_violation(&assessed("Next", "Other", Some(500), false)));
        assert!(!is_violation(&assessed("Next", "END", Some(204), false)));
    }

    #[test]
    fn test_error_vs_warning() {
        let err = assessed("END", "END", Some(503), false);
        let warn = assessed("END", "END", Some(503), true);
        assert!(is_an_error(&err) && !is_a_warning(&err));
        assert!(is_a_warning(&warn) && !is_an_error(&warn));
        assert!(has_error_and_warning(&[err, warn]));
    }

    #[test]
    fn test_pass_and_fail_edges() {
        assert!(is_pass_rule(&assessed("Next", "END", Some(299), false)));
        assert!(!is_pass_rule(&assessed("END", "END", Some(200), false)));
        assert!(!is_pass_rule(&assessed("Next", "END", Some(300), false)));
        assert!(is_fail_rule(&assessed("Next", "Alt", None, false)));
        assert!(is_fail_rule(&assessed("Next", "Alt", Some(404), false)));
        assert!(!is_fail_rule(&assessed("Next", "END", Some(404), false)));
        // 1xx 既不是通过也不是失败
        let informational = assessed("Next", "Alt", Some(101), false);
        assert!(!is_pass_rule(&informational) && !is_fail_rule(&informational));
    }

    #[test]
    fn test_final_and_compliance_check() {
        let final_rule = Rule::new("F", "/f", "end", "END", 1);
        let check = Rule::new("C", "/c", "F", "END", 1);
        let branch = Rule::new("B", "/b", "F", "C", 1);
        assert!(is_final_rule(&final_rule));
        assert!(!is_compliance_check(&final_rule));
        assert!(is_compliance_check(&check));
        assert!(!is_compliance_check(&branch));
        assert!(!is_final_rule(&branch));
    }

    #[test]
    fn test_counters() {
        let list = vec![
            assessed("END", "END", Some(200), false),
            assessed("X", "END", Some(500), true),
            assessed("X", "END", Some(500), false),
            assessed("X", "Y", Some(500), false),
        ];
        assert_eq!(passed_count(&list), 1);
        assert_eq!(failed_count(&list), 2);
        assert_eq!(warnings_count(&list), 1);
        assert_eq!(errors_count(&list), 1);
        assert!(has_unsuccessful_rules(&list));
        assert!(!has_unsuccessful_rules(&list[..1]));
    }

    #[test]
    fn test_retry_chain_end() {
        let mut node = RetryNode {
            assessed: assessed("END", "END", Some(500), false),
            next_rule_key: Some("Other".into()),
        };
        assert!(!is_retry_chain_end(&node));
        node.next_rule_key = None;
        assert!(is_retry_chain_end(&node));
    }
}
