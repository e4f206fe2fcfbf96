//! 单条规则的探测循环
//!
//! 每次尝试前等待 delay，再探测一次；标准评估以首次观察值为基线，之后状态一旦变化立即结束；
//! 重试评估则与已记录的状态比较。尝试次数达到 max_tries 仍无变化时以基线结束。
//! 探测错误只记日志，尝试照常计数。

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::assessment::probe::Prober;
use crate::rules::Rule;

/// 变化检测的比较基准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// 标准评估：第一次探测结果作为基线
    FirstObservation,
    /// 重试评估：与已记录的状态比较（null 表示上次未观察到）
    Stored(Option<u16>),
}

/// 一次规则激活的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssessmentOutcome {
    /// 终止时的状态码
    pub status: Option<u16>,
    /// 实际发出的探测次数
    pub attempts: u32,
    /// 是否因检测到变化而提前结束
    pub changed: bool,
}

/// 进度百分比：floor(tries / max_tries * 100)
pub fn progress_percent(tries: u32, max_tries: u32) -> u8 {
    if max_tries == 0 {
        return 100;
    }
    let pct = u64::from(tries.min(max_tries)) * 100 / u64::from(max_tries);
    u8::try_from(pct).unwrap_or(100)
}

/// 对 rule 运行探测循环；`on_progress(tries, percent)` 在每次计数后调用，结束时必定以 100 调用一次。
/// cancel 触发时返回 None（所属激活已被放弃）。
pub async fn assess_rule<P, F>(
    prober: &P,
    rule: &Rule,
    delay: Duration,
    baseline: Baseline,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Option<AssessmentOutcome>
where
    P: Prober + ?Sized,
    F: FnMut(u32, u8),
{
    let start = Instant::now();
    let mut last = match baseline {
        Baseline::FirstObservation => None,
        Baseline::Stored(status) => status,
    };
    let mut tries = 0u32;
    let mut attempts = 0u32;
    let mut changed = false;

    on_progress(0, 0);

    while tries < rule.max_tries {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let observed = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = prober.probe(&rule.target) => result,
        };
        attempts += 1;

        match observed {
            Ok(status) => {
                let establishing = baseline == Baseline::FirstObservation && tries == 0;
                if establishing {
                    last = Some(status);
                } else if Some(status) != last {
                    last = Some(status);
                    changed = true;
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(rule = %rule.key, attempt = attempts, "probe failed: {}", e);
            }
        }

        tries += 1;
        on_progress(tries, progress_percent(tries, rule.max_tries));
    }

    on_progress(tries, 100);

    let outcome = AssessmentOutcome {
        status: last,
        attempts,
        changed,
    };
    let audit = serde_json::json!({
        "event": "rule_assessed",
        "rule": rule.key,
        "attempts": attempts,
        "status": last,
        "changed": changed,
        "duration_ms": u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    });
    tracing::info!(audit = %audit, "rule");

    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::mock::{ProbeReply, ScriptedProber};

    fn rule(max_tries: u32) -> Rule {
        Rule::new("R", "/r", "END", "END", max_tries)
    }

    async fn run(prober: &ScriptedProber, max_tries: u32, baseline: Baseline) -> (AssessmentOutcome, Vec<u8>) {
        let mut seen = Vec::new();
        let outcome = assess_rule(
            prober,
            &rule(max_tries),
            Duration::ZERO,
            baseline,
            &CancellationToken::new(),
            |_, pct| seen.push(pct),
        )
        .await
        .unwrap();
        (outcome, seen)
    }

    #[tokio::test]
    async fn test_stable_status_uses_all_tries() {
        let prober = ScriptedProber::new().always("/r", 200);
        let (outcome, progress) = run(&prober, 4, Baseline::FirstObservation).await;
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.status, Some(200));
        assert!(!outcome.changed);
        assert_eq!(prober.calls("/r"), 4);
        assert_eq!(progress, vec![0, 25, 50, 75, 100, 100]);
    }

    #[tokio::test]
    async fn test_change_on_second_attempt_breaks() {
        let prober = ScriptedProber::new().sequence(
            "/r",
            vec![ProbeReply::Status(503), ProbeReply::Status(200)],
        );
        let (outcome, progress) = run(&prober, 10, Baseline::FirstObservation).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.status, Some(200));
        assert!(outcome.changed);
        assert_eq!(progress.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_transport_errors_still_count() {
        let prober = ScriptedProber::new().sequence("/r", vec![ProbeReply::Fail]);
        let (outcome, _) = run(&prober, 3, Baseline::FirstObservation).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, None);
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_first_failure_then_status_counts_as_change() {
        let prober = ScriptedProber::new().sequence(
            "/r",
            vec![ProbeReply::Fail, ProbeReply::Status(200)],
        );
        let (outcome, _) = run(&prober, 5, Baseline::FirstObservation).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.status, Some(200));
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_stored_baseline_unchanged() {
        let prober = ScriptedProber::new().always("/r", 500);
        let (outcome, _) = run(&prober, 3, Baseline::Stored(Some(500))).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, Some(500));
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_stored_baseline_change_on_first_attempt() {
        let prober = ScriptedProber::new().always("/r", 200);
        let (outcome, _) = run(&prober, 3, Baseline::Stored(Some(500))).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.status, Some(200));
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_cancelled_activation_returns_none() {
        let prober = ScriptedProber::new().always("/r", 200);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = assess_rule(
            &prober,
            &rule(3),
            Duration::from_secs(60),
            Baseline::FirstObservation,
            &cancel,
            |_, _| {},
        )
        .await;
        assert!(outcome.is_none());
        assert_eq!(prober.calls("/r"), 0);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(5, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }
}
