//! 会话监管：激活生命周期与中断
//!
//! 持有根 CancellationToken；每次规则激活拿到一个子 token，新激活开始时上一个被取消，
//! 退出时取消根 token，所有在途探测随之结束。

use tokio_util::sync::CancellationToken;

/// 激活级取消管理
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 退出时触发
    cancel_token: CancellationToken,
    /// 当前激活
    current: Option<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            current: None,
        }
    }

    /// 开始新激活：取消上一个并返回新的子 token
    pub fn begin(&mut self) -> CancellationToken {
        self.cancel_current();
        let token = self.cancel_token.child_token();
        self.current = Some(token.clone());
        token
    }

    /// 放弃当前激活（reload / restart）
    pub fn cancel_current(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    /// 整个会话结束
    pub fn shutdown(&mut self) {
        self.current = None;
        self.cancel_token.cancel();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_cancels_previous() {
        let mut supervisor = SessionSupervisor::new();
        let first = supervisor.begin();
        let second = supervisor.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        supervisor.shutdown();
        assert!(second.is_cancelled());
        // 关闭后的激活一开始就是取消状态
        assert!(supervisor.begin().is_cancelled());
    }
}
