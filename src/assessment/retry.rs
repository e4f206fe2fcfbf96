//! 重试链
//!
//! 从评估序列中筛出违规（按范围过滤），反转为从最早到最近的顺序，
//! 用合成的 nextRule 串成单链；重新探测只更新链上节点，链结束后按 key 合并回原序列。

use crate::core::RetryScope;
use crate::rules::{is_a_warning, is_an_error, is_retry_chain_end, is_violation, AssessedRule, RetryNode};

/// 按范围筛选违规并构建重试链（可能为空）
pub fn build_retry_chain(rule_list: &[AssessedRule], scope: RetryScope) -> Vec<RetryNode> {
    let selected: Vec<&AssessedRule> = rule_list
        .iter()
        .filter(|r| match scope {
            RetryScope::All => is_violation(r),
            RetryScope::Warning => is_a_warning(r),
            RetryScope::Error => is_an_error(r),
        })
        .collect();

    let ordered: Vec<&AssessedRule> = selected.into_iter().rev().collect();
    ordered
        .iter()
        .enumerate()
        .map(|(i, assessed)| RetryNode {
            assessed: (*assessed).clone(),
            next_rule_key: ordered.get(i + 1).map(|next| next.rule.key.clone()),
        })
        .collect()
}

/// 把重试后的状态按 key 合并回原评估序列，顺序不变
pub fn merge_retry_results(rule_list: &[AssessedRule], nodes: &[RetryNode]) -> Vec<AssessedRule> {
    rule_list
        .iter()
        .map(|assessed| {
            let mut merged = assessed.clone();
            if let Some(node) = nodes.iter().find(|n| n.key() == assessed.key()) {
                if node.assessed.response_status != assessed.response_status {
                    merged.response_status = node.assessed.response_status;
                }
            }
            merged
        })
        .collect()
}

/// 进行中的重试：链 + 游标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySession {
    nodes: Vec<RetryNode>,
    cursor: usize,
}

impl RetrySession {
    /// 链为空时返回 None
    pub fn new(nodes: Vec<RetryNode>) -> Option<Self> {
        if nodes.is_empty() {
            None
        } else {
            Some(Self { nodes, cursor: 0 })
        }
    }

    pub fn current(&self) -> Option<&RetryNode> {
        self.nodes.get(self.cursor)
    }

    /// 检测到变化时更新当前节点的状态
    pub fn record_current(&mut self, status: Option<u16>) {
        if let Some(node) = self.nodes.get_mut(self.cursor) {
            node.assessed.response_status = status;
        }
    }

    /// 沿 nextRule 前进；已在链尾时返回 false
    pub fn advance(&mut self) -> bool {
        match self.current() {
            Some(node) if !is_retry_chain_end(node) => {
                self.cursor += 1;
                self.cursor < self.nodes.len()
            }
            _ => false,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.current().map_or(true, is_retry_chain_end)
    }

    pub fn nodes(&self) -> &[RetryNode] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    fn assessed(key: &str, status: Option<u16>, warning: bool) -> AssessedRule {
        AssessedRule::new(Rule::new(key, format!("/{key}"), "Next", "END", 2).with_warning(warning), status)
    }

    /// 最近在前：C(警告) B(通过) A(错误)
    fn sample() -> Vec<AssessedRule> {
        vec![
            assessed("C", Some(503), true),
            assessed("B", Some(200), false),
            assessed("A", None, false),
        ]
    }

    #[test]
    fn test_chain_is_oldest_first_and_linked() {
        let chain = build_retry_chain(&sample(), RetryScope::All);
        let keys: Vec<&str> = chain.iter().map(|n| n.key()).collect();
        assert_eq!(keys, vec!["A", "C"]);
        assert_eq!(chain[0].next_rule_key.as_deref(), Some("C"));
        assert_eq!(chain[1].next_rule_key, None);
    }

    #[test]
    fn test_scope_filters() {
        let warnings = build_retry_chain(&sample(), RetryScope::Warning);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].key(), "C");
        let errors = build_retry_chain(&sample(), RetryScope::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key(), "A");
        assert!(build_retry_chain(&sample()[1..2], RetryScope::All).is_empty());
    }

    #[test]
    fn test_unchanged_walk_leaves_list_untouched() {
        let list = sample();
        let mut retry = RetrySession::new(build_retry_chain(&list, RetryScope::All)).unwrap();
        while retry.advance() {}
        assert!(retry.is_at_end());
        assert_eq!(merge_retry_results(&list, retry.nodes()), list);
    }

    #[test]
    fn test_merge_updates_by_key() {
        let list = sample();
        let mut retry = RetrySession::new(build_retry_chain(&list, RetryScope::All)).unwrap();
        retry.record_current(Some(200));
        assert!(retry.advance());
        assert_eq!(retry.current().unwrap().key(), "C");
        assert!(!retry.advance());

        let merged = merge_retry_results(&list, retry.nodes());
        assert_eq!(merged[2].response_status, Some(200));
        assert_eq!(merged[0].response_status, Some(503));
        assert_eq!(merged[1], list[1]);
    }

    #[test]
    fn test_empty_chain_has_no_session() {
        assert!(RetrySession::new(Vec::new()).is_none());
    }
}
