//! 会话错误类型
//!
//! 探测失败在探测循环内部消化，不会出现在这里；这里只描述用户动作与会话状态不匹配等情况。

use thiserror::Error;

use crate::core::SessionStatus;

/// 会话状态机拒绝某个动作的原因
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot {action} while session is {status}")]
    InvalidTransition {
        action: &'static str,
        status: SessionStatus,
    },

    #[error("No violations to retry")]
    NothingToRetry,

    #[error("Rule '{0}' is not in the rule graph")]
    UnknownRule(String),

    #[error("Terminal rule '{0}' has no rule to continue to")]
    NoContinuation(String),

    #[error("Activation {0} is no longer current")]
    StaleActivation(u64),
}
