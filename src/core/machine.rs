//! 会话状态机
//!
//! 纯同步的转移函数：用户动作（start / restart / continue / retry）与探测完成事件都在这里
//! 变成新的状态和下一次激活。每次激活携带 generation，只有与当前 generation 相同的完成事件会被接受，
//! 过期的激活结果直接丢弃。

use std::sync::Arc;
use std::time::Duration;

use crate::assessment::{
    build_retry_chain, finalize_retry, finalize_standard, merge_retry_results, AssessmentOutcome,
    Baseline, Finalization, RetryEnd, RetrySession,
};
use crate::config::RulesSection;
use crate::core::{
    Action, LogRequest, LogState, RetryScope, RuleList, SessionError, SessionResult,
    SessionSnapshot, SessionStatus,
};
use crate::rules::{end_path_length, is_end, is_fail_rule, is_pass_rule, AssessedRule, Rule, RuleGraph, RuleKey};

/// 状态机使用的规则相关设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub first_rule: RuleKey,
    pub default_try_delay_ms: u64,
    /// 规则完成到下一条激活之间的停顿
    pub advance_delay_ms: u64,
}

impl SessionSettings {
    pub fn from_config(rules: &RulesSection) -> Self {
        Self {
            first_rule: rules.first_rule.clone(),
            default_try_delay_ms: rules.default_try_delay_ms,
            advance_delay_ms: rules.advance_delay_ms,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&RulesSection::default())
    }
}

/// 一次规则激活：交给探测循环执行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub generation: u64,
    pub rule: Rule,
    pub baseline: Baseline,
    /// 两次探测之间的间隔
    pub delay: Duration,
    /// 开始探测前的停顿
    pub lead_in: Duration,
}

/// 激活完成后的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Next(Activation),
    /// 会话停在 completed / paused / error，需要提交日志
    Finished(LogRequest),
}

/// 会话状态机
#[derive(Debug)]
pub struct SessionMachine {
    graph: Arc<RuleGraph>,
    settings: SessionSettings,
    status: SessionStatus,
    action: Option<Action>,
    current: Option<RuleKey>,
    rule_list: RuleList,
    retry: Option<RetrySession>,
    result: Option<SessionResult>,
    /// paused 时 continue 的去向
    resume_at: Option<RuleKey>,
    generation: u64,
    tries: u32,
    progress: u8,
    log: LogState,
    error_message: Option<String>,
}

impl SessionMachine {
    pub fn new(graph: Arc<RuleGraph>, settings: SessionSettings) -> Self {
        Self {
            graph,
            settings,
            status: SessionStatus::Idle,
            action: None,
            current: None,
            rule_list: RuleList::new(),
            retry: None,
            result: None,
            resume_at: None,
            generation: 0,
            tries: 0,
            progress: 0,
            log: LogState::None,
            error_message: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rule_list(&self) -> &[AssessedRule] {
        self.rule_list.as_slice()
    }

    pub fn graph(&self) -> &Arc<RuleGraph> {
        &self.graph
    }

    /// start / restart：清空序列，从首规则开始
    pub fn start(&mut self, action: Action) -> Result<Activation, SessionError> {
        match action {
            Action::Start if self.status.is_fetching() => {
                return Err(SessionError::InvalidTransition {
                    action: "start",
                    status: self.status,
                })
            }
            Action::Start | Action::Restart => {}
            Action::Retry | Action::Continue => {
                return Err(SessionError::InvalidTransition {
                    action: if action == Action::Retry { "retry" } else { "continue" },
                    status: self.status,
                })
            }
        }

        // 先解析首规则，失败时会话保持原状
        let first = self.lookup(&self.settings.first_rule)?;
        self.reset();
        self.action = Some(action);
        self.status = SessionStatus::Running;
        Ok(self.activate_standard(first, Duration::ZERO))
    }

    /// paused 时越过终止规则继续
    pub fn continue_session(&mut self) -> Result<Activation, SessionError> {
        if self.status != SessionStatus::Paused {
            return Err(SessionError::InvalidTransition {
                action: "continue",
                status: self.status,
            });
        }
        let resume = self.resume_at.clone().unwrap_or_default();
        if resume.is_empty() || is_end(&resume) {
            let head = self
                .rule_list
                .head()
                .map(|h| h.key().to_string())
                .unwrap_or_default();
            return Err(SessionError::NoContinuation(head));
        }
        let rule = self.lookup(&resume)?;

        self.action = Some(Action::Continue);
        self.status = SessionStatus::Running;
        self.result = None;
        self.resume_at = None;
        self.log = LogState::None;
        self.error_message = None;
        Ok(self.activate_standard(rule, Duration::ZERO))
    }

    /// 只重新评估违规（按范围筛选）
    pub fn retry(&mut self, scope: RetryScope) -> Result<Activation, SessionError> {
        if !matches!(
            self.status,
            SessionStatus::Paused | SessionStatus::Error | SessionStatus::Completed
        ) {
            return Err(SessionError::InvalidTransition {
                action: "retry",
                status: self.status,
            });
        }
        let retry = RetrySession::new(build_retry_chain(self.rule_list.as_slice(), scope))
            .ok_or(SessionError::NothingToRetry)?;

        self.action = Some(Action::Retry);
        self.status = SessionStatus::Retry;
        self.result = None;
        self.resume_at = None;
        self.log = LogState::None;
        self.error_message = None;
        self.current = None;
        self.retry = Some(retry);
        self.activate_retry_node(Duration::ZERO)
    }

    /// 探测循环上报进度；过期激活的进度忽略
    pub fn set_progress(&mut self, generation: u64, tries: u32, progress: u8) -> bool {
        if generation != self.generation || !self.status.is_fetching() {
            return false;
        }
        self.tries = tries;
        self.progress = progress;
        true
    }

    /// 一次激活结束
    pub fn complete(
        &mut self,
        generation: u64,
        outcome: AssessmentOutcome,
    ) -> Result<Step, SessionError> {
        if generation != self.generation || !self.status.is_fetching() {
            return Err(SessionError::StaleActivation(generation));
        }
        self.progress = 100;

        let step = if self.status == SessionStatus::Retry {
            self.complete_retry(outcome)
        } else {
            self.complete_standard(outcome)
        };
        if let Err(e) = &step {
            self.fail(e);
        }
        step
    }

    /// 替换规则图；进行中的会话作废，回到 idle
    pub fn reload(&mut self, graph: Arc<RuleGraph>) {
        self.graph = graph;
        self.reset();
        self.generation += 1;
    }

    /// 日志提交结果；只接受当前 generation 的
    pub fn record_log(&mut self, generation: u64, state: LogState) -> bool {
        if generation != self.generation {
            return false;
        }
        self.log = state;
        true
    }

    /// 被拒绝的动作，展示给用户
    pub fn note_error(&mut self, error: &SessionError) {
        self.error_message = Some(error.to_string());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let can_continue = self.status == SessionStatus::Paused
            && self.resume_at.as_deref().is_some_and(|k| !is_end(k));
        SessionSnapshot {
            status: self.status,
            action: self.action,
            current_rule: self.current.clone(),
            current_retry_rule: self
                .retry
                .as_ref()
                .and_then(|r| r.current())
                .map(|n| n.key().to_string()),
            tries: self.tries,
            progress: self.progress,
            rule_list: self.rule_list.to_vec(),
            result: self.result,
            end_path_length: end_path_length(self.rule_list.as_slice(), &self.graph),
            can_continue,
            log: self.log.clone(),
            error_message: self.error_message.clone(),
        }
    }

    fn complete_standard(&mut self, outcome: AssessmentOutcome) -> Result<Step, SessionError> {
        let key = self.current.clone().unwrap_or_default();
        let assessed = AssessedRule::new(self.lookup(&key)?, outcome.status);
        self.rule_list.push_front(assessed.clone());

        let lead_in = Duration::from_millis(self.settings.advance_delay_ms);
        let successor = if is_pass_rule(&assessed) {
            Some(&assessed.rule.pass_rule_key)
        } else if is_fail_rule(&assessed) {
            Some(&assessed.rule.fail_rule_key)
        } else {
            None
        };
        if let Some(successor) = successor {
            let rule = self.lookup(successor)?;
            return Ok(Step::Next(self.activate_standard(rule, lead_in)));
        }

        let finalization = finalize_standard(&assessed, self.rule_list.as_slice());
        Ok(self.finish(finalization, &assessed.rule))
    }

    fn complete_retry(&mut self, outcome: AssessmentOutcome) -> Result<Step, SessionError> {
        let Some(retry) = self.retry.as_mut() else {
            return Err(SessionError::NothingToRetry);
        };
        if outcome.changed {
            retry.record_current(outcome.status);
        }
        if retry.advance() {
            let lead_in = Duration::from_millis(self.settings.advance_delay_ms);
            return self.activate_retry_node(lead_in).map(Step::Next);
        }

        let Some(last) = retry.current().cloned() else {
            return Err(SessionError::NothingToRetry);
        };
        let merged = merge_retry_results(self.rule_list.as_slice(), retry.nodes());
        self.retry = None;
        self.rule_list.replace(merged);

        match finalize_retry(self.rule_list.as_slice(), &last) {
            RetryEnd::Finalize(finalization) => Ok(self.finish(finalization, last.rule())),
            RetryEnd::Resume(next) => {
                tracing::info!(rule = %next, "all violations resolved, continuing");
                let rule = self.lookup(&next)?;
                self.action = Some(Action::Continue);
                self.status = SessionStatus::Running;
                let lead_in = Duration::from_millis(self.settings.advance_delay_ms);
                Ok(Step::Next(self.activate_standard(rule, lead_in)))
            }
        }
    }

    fn finish(&mut self, finalization: Finalization, terminal: &Rule) -> Step {
        self.status = finalization.status;
        self.result = Some(finalization.result);
        self.current = None;
        self.resume_at = (finalization.status == SessionStatus::Paused)
            .then(|| terminal.pass_rule_key.clone());
        self.log = LogState::Pending;
        tracing::info!(
            status = %finalization.status,
            result = %finalization.result,
            rules = self.rule_list.len(),
            "session finished"
        );
        Step::Finished(LogRequest {
            sequence: self.rule_list.to_vec(),
            action: self.action.unwrap_or(Action::Start),
            result: finalization.result,
        })
    }

    fn lookup(&self, key: &str) -> Result<Rule, SessionError> {
        self.graph
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRule(key.to_string()))
    }

    fn activate_standard(&mut self, rule: Rule, lead_in: Duration) -> Activation {
        self.current = Some(rule.key.clone());
        self.activation(rule, Baseline::FirstObservation, lead_in)
    }

    fn activate_retry_node(&mut self, lead_in: Duration) -> Result<Activation, SessionError> {
        let node = self
            .retry
            .as_ref()
            .and_then(|r| r.current())
            .cloned()
            .ok_or(SessionError::NothingToRetry)?;
        let baseline = Baseline::Stored(node.assessed.response_status);
        Ok(self.activation(node.assessed.rule, baseline, lead_in))
    }

    fn activation(&mut self, rule: Rule, baseline: Baseline, lead_in: Duration) -> Activation {
        self.generation += 1;
        self.tries = 0;
        self.progress = 0;
        let delay = Duration::from_millis(
            self.graph
                .delay_for(&rule, self.settings.default_try_delay_ms),
        );
        Activation {
            generation: self.generation,
            rule,
            baseline,
            delay,
            lead_in,
        }
    }

    fn fail(&mut self, error: &SessionError) {
        tracing::error!("session aborted: {}", error);
        self.status = SessionStatus::Error;
        self.result = Some(SessionResult::Incomplete);
        self.current = None;
        self.retry = None;
        self.error_message = Some(error.to_string());
    }

    fn reset(&mut self) {
        self.status = SessionStatus::Idle;
        self.action = None;
        self.current = None;
        self.rule_list.clear();
        self.retry = None;
        self.result = None;
        self.resume_at = None;
        self.tries = 0;
        self.progress = 0;
        self.log = LogState::None;
        self.error_message = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings {
            first_rule: "FirstRule".to_string(),
            default_try_delay_ms: 0,
            advance_delay_ms: 0,
        }
    }

    /// FirstRule -> Second -> END
    fn graph(first_continue: bool, first_warning: bool) -> Arc<RuleGraph> {
        Arc::new(RuleGraph::from_rules([
            Rule::new("FirstRule", "/first", "Second", "END", 3)
                .with_continue_option(first_continue)
                .with_warning(first_warning),
            Rule::new("Second", "/second", "END", "END", 1),
        ]))
    }

    fn observed(status: Option<u16>) -> AssessmentOutcome {
        AssessmentOutcome {
            status,
            attempts: 1,
            changed: false,
        }
    }

    fn changed(status: Option<u16>) -> AssessmentOutcome {
        AssessmentOutcome {
            status,
            attempts: 1,
            changed: true,
        }
    }

    fn next(step: Step) -> Activation {
        match step {
            Step::Next(a) => a,
            Step::Finished(req) => panic!("expected next activation, got {:?}", req),
        }
    }

    fn finished(step: Step) -> LogRequest {
        match step {
            Step::Finished(req) => req,
            Step::Next(a) => panic!("expected finish, got activation of {}", a.rule.key),
        }
    }

    fn keys(m: &SessionMachine) -> Vec<&str> {
        m.rule_list().iter().map(|r| r.key()).collect()
    }

    #[test]
    fn test_all_pass_completes_successfully() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        assert_eq!(a.rule.key, "FirstRule");
        assert_eq!(a.baseline, Baseline::FirstObservation);

        let a = next(m.complete(a.generation, observed(Some(200))).unwrap());
        assert_eq!(a.rule.key, "Second");

        let req = finished(m.complete(a.generation, observed(Some(200))).unwrap());
        assert_eq!(m.status(), SessionStatus::Completed);
        assert_eq!(req.result, SessionResult::CompletedSuccessfully);
        assert_eq!(req.action, Action::Start);
        assert_eq!(keys(&m), vec!["Second", "FirstRule"]);
        assert_eq!(m.snapshot().log, LogState::Pending);
    }

    #[test]
    fn test_fatal_violation_errors() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        let req = finished(m.complete(a.generation, observed(Some(500))).unwrap());
        assert_eq!(m.status(), SessionStatus::Error);
        assert_eq!(req.result, SessionResult::Incomplete);
        assert_eq!(req.sequence.len(), 1);
        assert_eq!(req.sequence[0].response_status, Some(500));
        assert!(!m.snapshot().can_continue);
    }

    #[test]
    fn test_pause_then_continue() {
        let mut m = SessionMachine::new(graph(true, true), settings());
        let a = m.start(Action::Start).unwrap();
        finished(m.complete(a.generation, observed(None)).unwrap());
        assert_eq!(m.status(), SessionStatus::Paused);
        assert!(m.snapshot().can_continue);

        let a = m.continue_session().unwrap();
        assert_eq!(a.rule.key, "Second");
        let req = finished(m.complete(a.generation, observed(Some(200))).unwrap());
        assert_eq!(req.action, Action::Continue);
        assert_eq!(req.result, SessionResult::CompletedWithWarnings);
        assert_eq!(keys(&m), vec!["Second", "FirstRule"]);
    }

    #[test]
    fn test_retry_resolves_and_auto_continues() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        finished(m.complete(a.generation, observed(Some(500))).unwrap());

        let a = m.retry(RetryScope::All).unwrap();
        assert_eq!(m.status(), SessionStatus::Retry);
        assert_eq!(a.rule.key, "FirstRule");
        assert_eq!(a.baseline, Baseline::Stored(Some(500)));
        assert_eq!(m.snapshot().current_retry_rule.as_deref(), Some("FirstRule"));

        let a = next(m.complete(a.generation, changed(Some(200))).unwrap());
        assert_eq!(a.rule.key, "Second");
        assert_eq!(m.status(), SessionStatus::Running);
        assert_eq!(m.rule_list()[0].response_status, Some(200));

        let req = finished(m.complete(a.generation, observed(Some(200))).unwrap());
        assert_eq!(req.action, Action::Continue);
        assert_eq!(req.result, SessionResult::CompletedSuccessfully);
    }

    #[test]
    fn test_retry_unchanged_keeps_error() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        finished(m.complete(a.generation, observed(Some(500))).unwrap());
        let before = m.rule_list().to_vec();

        let a = m.retry(RetryScope::All).unwrap();
        let req = finished(m.complete(a.generation, observed(Some(500))).unwrap());
        assert_eq!(req.action, Action::Retry);
        assert_eq!(m.status(), SessionStatus::Error);
        assert_eq!(m.rule_list(), before.as_slice());
    }

    #[test]
    fn test_retry_scope_without_matches() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        finished(m.complete(a.generation, observed(Some(500))).unwrap());
        assert_eq!(m.retry(RetryScope::Warning), Err(SessionError::NothingToRetry));
        assert_eq!(m.status(), SessionStatus::Error);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let stale = m.start(Action::Start).unwrap();
        let fresh = m.start(Action::Restart).unwrap();
        assert!(fresh.generation > stale.generation);

        assert_eq!(
            m.complete(stale.generation, observed(Some(500))),
            Err(SessionError::StaleActivation(stale.generation))
        );
        assert!(m.rule_list().is_empty());
        assert!(!m.set_progress(stale.generation, 1, 33));
        assert!(m.set_progress(fresh.generation, 1, 33));
        assert_eq!(m.snapshot().progress, 33);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        assert!(matches!(
            m.continue_session(),
            Err(SessionError::InvalidTransition { action: "continue", .. })
        ));
        assert!(matches!(m.retry(RetryScope::All), Err(SessionError::InvalidTransition { .. })));
        m.start(Action::Start).unwrap();
        assert!(matches!(
            m.start(Action::Start),
            Err(SessionError::InvalidTransition { action: "start", .. })
        ));
    }

    #[test]
    fn test_reload_resets_to_idle() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        m.reload(graph(true, false));
        assert_eq!(m.status(), SessionStatus::Idle);
        assert!(m.complete(a.generation, observed(Some(200))).is_err());
        assert!(m.rule_list().is_empty());
    }

    #[test]
    fn test_missing_first_rule() {
        let mut m = SessionMachine::new(Arc::new(RuleGraph::default()), settings());
        assert_eq!(
            m.start(Action::Start),
            Err(SessionError::UnknownRule("FirstRule".to_string()))
        );
    }

    #[test]
    fn test_failed_start_leaves_session_startable() {
        let other = Arc::new(RuleGraph::from_rules([Rule::new("Other", "/other", "END", "END", 1)]));
        let mut m = SessionMachine::new(other, settings());
        let generation = m.generation();
        assert_eq!(
            m.start(Action::Start),
            Err(SessionError::UnknownRule("FirstRule".to_string()))
        );
        assert_eq!(m.status(), SessionStatus::Idle);
        assert_eq!(m.generation(), generation);
        // 再次 start 仍然报告缺失的规则，而不是非法转移
        assert_eq!(
            m.start(Action::Start),
            Err(SessionError::UnknownRule("FirstRule".to_string()))
        );

        m.reload(graph(false, false));
        assert!(m.start(Action::Start).is_ok());
    }

    #[test]
    fn test_failed_restart_keeps_running_session() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        let a = next(m.complete(a.generation, observed(Some(200))).unwrap());

        m.settings.first_rule = "Ghost".to_string();
        assert!(matches!(m.start(Action::Restart), Err(SessionError::UnknownRule(_))));
        assert_eq!(m.status(), SessionStatus::Running);
        assert_eq!(keys(&m), vec!["FirstRule"]);
        finished(m.complete(a.generation, observed(Some(200))).unwrap());
        assert_eq!(m.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_continue_to_missing_rule_stays_paused() {
        let g = Arc::new(RuleGraph::from_rules([Rule::new("FirstRule", "/first", "Ghost", "END", 1)
            .with_continue_option(true)
            .with_warning(true)]));
        let mut m = SessionMachine::new(g, settings());
        let a = m.start(Action::Start).unwrap();
        finished(m.complete(a.generation, observed(None)).unwrap());
        assert_eq!(m.status(), SessionStatus::Paused);

        assert_eq!(
            m.continue_session(),
            Err(SessionError::UnknownRule("Ghost".to_string()))
        );
        assert_eq!(m.status(), SessionStatus::Paused);
        assert_eq!(m.snapshot().result, Some(SessionResult::Incomplete));
    }

    #[test]
    fn test_end_path_length_in_snapshot() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        next(m.complete(a.generation, observed(Some(200))).unwrap());
        assert_eq!(m.snapshot().end_path_length, Some(2));
    }

    #[test]
    fn test_log_state_follows_generation() {
        let mut m = SessionMachine::new(graph(false, false), settings());
        let a = m.start(Action::Start).unwrap();
        finished(m.complete(a.generation, observed(Some(500))).unwrap());
        let generation = m.generation();
        assert!(m.record_log(
            generation,
            LogState::Recorded {
                uid: "u".to_string()
            }
        ));
        m.start(Action::Restart).unwrap();
        assert!(!m.record_log(generation, LogState::Pending));
    }
}
