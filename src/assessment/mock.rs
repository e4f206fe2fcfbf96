//! 脚本化探测器（用于测试与离线演示，无需真实服务）
//!
//! 每个 target 一段脚本：按顺序返回预设结果，脚本耗尽后重复最后一项；未配置的 target 返回传输错误。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::assessment::probe::{ProbeError, Prober};

/// 脚本中的一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Status(u16),
    Fail,
}

impl ProbeReply {
    fn to_result(&self) -> Result<u16, ProbeError> {
        match self {
            ProbeReply::Status(s) => Ok(*s),
            ProbeReply::Fail => Err(ProbeError::Transport("scripted failure".to_string())),
        }
    }
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<ProbeReply>,
    last: ProbeReply,
}

/// 脚本化探测器
#[derive(Debug, Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// target 始终返回同一状态码
    pub fn always(self, target: &str, status: u16) -> Self {
        self.set_script(target, vec![ProbeReply::Status(status)]);
        self
    }

    /// target 按序返回，最后一项重复
    pub fn sequence(self, target: &str, replies: Vec<ProbeReply>) -> Self {
        self.set_script(target, replies);
        self
    }

    /// 运行中替换脚本（模拟用户修复了设备设置）
    pub fn set_script(&self, target: &str, replies: Vec<ProbeReply>) {
        let queue: VecDeque<ProbeReply> = replies.into();
        let last = queue.back().cloned().unwrap_or(ProbeReply::Fail);
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(target.to_string(), Script { queue, last });
        }
    }

    pub fn set_always(&self, target: &str, status: u16) {
        self.set_script(target, vec![ProbeReply::Status(status)]);
    }

    /// target 被探测的次数
    pub fn calls(&self, target: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(target).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target: &str) -> Result<u16, ProbeError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(target.to_string()).or_insert(0) += 1;
        }
        let reply = {
            let mut scripts = self
                .scripts
                .lock()
                .map_err(|_| ProbeError::Transport("script lock poisoned".to_string()))?;
            match scripts.get_mut(target) {
                Some(script) => script.queue.pop_front().unwrap_or_else(|| script.last.clone()),
                None => return Err(ProbeError::Transport(format!("no script for {target}"))),
            }
        };
        reply.to_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let prober = ScriptedProber::new().sequence(
            "/a",
            vec![ProbeReply::Fail, ProbeReply::Status(500), ProbeReply::Status(200)],
        );
        assert!(prober.probe("/a").await.is_err());
        assert_eq!(prober.probe("/a").await, Ok(500));
        assert_eq!(prober.probe("/a").await, Ok(200));
        assert_eq!(prober.probe("/a").await, Ok(200));
        assert_eq!(prober.calls("/a"), 4);
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let prober = ScriptedProber::new();
        assert!(matches!(prober.probe("/x").await, Err(ProbeError::Transport(_))));
        prober.set_always("/x", 204);
        assert_eq!(prober.probe("/x").await, Ok(204));
    }
}
