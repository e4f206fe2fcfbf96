//! 会话收尾判定
//!
//! 标准评估到达终止边、或重试链走完时，决定会话状态（completed / paused / error）与日志结论。

use crate::core::{SessionResult, SessionStatus};
use crate::rules::{has_unsuccessful_rules, is_clean_pass, is_end, is_final_rule, AssessedRule, RetryNode, RuleKey};

/// 收尾结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finalization {
    pub status: SessionStatus,
    pub result: SessionResult,
}

impl Finalization {
    fn completed(result: SessionResult) -> Self {
        Self {
            status: SessionStatus::Completed,
            result,
        }
    }

    fn incomplete(status: SessionStatus) -> Self {
        Self {
            status,
            result: SessionResult::Incomplete,
        }
    }
}

/// 重试链结束后的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEnd {
    Finalize(Finalization),
    /// 违规全部消除：自动从该规则继续标准评估
    Resume(RuleKey),
}

/// 整次评估完成时的结论：全部 200 为成功；非 200 的全部是警告为带警告成功；否则失败
pub fn classify(rule_list: &[AssessedRule]) -> SessionResult {
    if rule_list.iter().all(is_clean_pass) {
        SessionResult::CompletedSuccessfully
    } else if rule_list
        .iter()
        .filter(|r| !is_clean_pass(r))
        .all(|r| r.rule.warning)
    {
        SessionResult::CompletedWithWarnings
    } else {
        SessionResult::CompletedUnsuccessfully
    }
}

/// 标准评估在 terminal 处停止
pub fn finalize_standard(terminal: &AssessedRule, rule_list: &[AssessedRule]) -> Finalization {
    if is_final_rule(&terminal.rule) {
        Finalization::completed(classify(rule_list))
    } else if terminal.rule.continue_option {
        Finalization::incomplete(SessionStatus::Paused)
    } else {
        Finalization::incomplete(SessionStatus::Error)
    }
}

/// 重试链走完：merged 为合并后的序列，last 为最后处理的重试节点
pub fn finalize_retry(merged: &[AssessedRule], last: &RetryNode) -> RetryEnd {
    let head_is_final = merged.first().is_some_and(|head| is_final_rule(&head.rule));

    if head_is_final {
        RetryEnd::Finalize(Finalization::completed(classify(merged)))
    } else if has_unsuccessful_rules(merged) {
        if last.rule().continue_option {
            RetryEnd::Finalize(Finalization::incomplete(SessionStatus::Paused))
        } else {
            RetryEnd::Finalize(Finalization::incomplete(SessionStatus::Error))
        }
    } else if is_end(&last.rule().pass_rule_key) {
        RetryEnd::Finalize(Finalization::completed(classify(merged)))
    } else {
        RetryEnd::Resume(last.rule().pass_rule_key.clone())
    }
}
