//! 会话编排器：主控循环
//!
//! 建立 cmd / state 两条通道，后台任务消费用户命令（Start/Restart/Retry/Continue/Reload/Quit）
//! 与内部事件（进度、激活完成、日志结果），驱动 SessionMachine 并发布 SessionSnapshot。
//! 每次激活在独立任务中运行探测循环，结果带 generation 回到主循环。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::assessment::{assess_rule, AssessmentOutcome, Prober};
use crate::core::machine::{Activation, SessionMachine, SessionSettings, Step};
use crate::core::{Action, LogRequest, LogState, RetryScope, SessionError, SessionSnapshot, SessionSupervisor};
use crate::provider::SessionLogger;
use crate::rules::RuleGraph;

/// 从前端发往编排器的用户命令
#[derive(Debug, Clone)]
pub enum Command {
    Start,
    Restart,
    /// 重新评估违规
    Retry(RetryScope),
    /// 越过暂停的终止规则
    Continue,
    /// 替换规则图，进行中的会话作废
    Reload(Arc<RuleGraph>),
    Quit,
}

/// 后台任务回报给主循环的事件
#[derive(Debug)]
enum Event {
    Progress {
        generation: u64,
        tries: u32,
        percent: u8,
    },
    Assessed {
        generation: u64,
        outcome: AssessmentOutcome,
    },
    Logged {
        generation: u64,
        state: LogState,
    },
}

/// 主循环持有的运行时依赖
struct Runtime {
    prober: Arc<dyn Prober>,
    logger: Arc<SessionLogger>,
    events: mpsc::UnboundedSender<Event>,
    supervisor: SessionSupervisor,
}

impl Runtime {
    fn launch(&mut self, activation: Activation) {
        let token = self.supervisor.begin();
        tokio::spawn(run_activation(
            activation,
            self.prober.clone(),
            self.events.clone(),
            token,
        ));
    }

    fn submit_log(&self, generation: u64, request: LogRequest) {
        let logger = self.logger.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let state = match logger.log(request).await {
                Ok(record) => LogState::Recorded { uid: record.uid },
                Err(e) => LogState::NotRecorded {
                    uid: e.uid.clone(),
                    reason: e.source.to_string(),
                },
            };
            let _ = events.send(Event::Logged { generation, state });
        });
    }
}

async fn run_activation(
    activation: Activation,
    prober: Arc<dyn Prober>,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let generation = activation.generation;
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(activation.lead_in) => {}
    }

    let progress = events.clone();
    let outcome = assess_rule(
        prober.as_ref(),
        &activation.rule,
        activation.delay,
        activation.baseline,
        &cancel,
        |tries, percent| {
            let _ = progress.send(Event::Progress {
                generation,
                tries,
                percent,
            });
        },
    )
    .await;

    match outcome {
        Some(outcome) => {
            let _ = events.send(Event::Assessed { generation, outcome });
        }
        None => tracing::debug!(rule = %activation.rule.key, generation, "activation cancelled"),
    }
}

/// 创建会话运行时：返回命令发送端与状态接收端；后台任务消费命令并更新状态
pub fn create_session(
    graph: Arc<RuleGraph>,
    settings: SessionSettings,
    prober: Arc<dyn Prober>,
    logger: Arc<SessionLogger>,
) -> (mpsc::UnboundedSender<Command>, watch::Receiver<SessionSnapshot>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut machine = SessionMachine::new(graph, settings);
    let mut runtime = Runtime {
        prober,
        logger,
        events: event_tx,
        supervisor: SessionSupervisor::new(),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if matches!(cmd, Command::Quit) {
                        break;
                    }
                    handle_command(&mut machine, &mut runtime, cmd);
                }
                Some(event) = event_rx.recv() => {
                    if !handle_event(&mut machine, &mut runtime, event) {
                        continue;
                    }
                }
            }
            let _ = state_tx.send(machine.snapshot());
        }
        runtime.supervisor.shutdown();
        tracing::info!("Session loop stopped");
    });

    (cmd_tx, state_rx)
}

fn handle_command(machine: &mut SessionMachine, runtime: &mut Runtime, cmd: Command) {
    let result = match cmd {
        Command::Start => machine.start(Action::Start).map(Some),
        Command::Restart => machine.start(Action::Restart).map(Some),
        Command::Retry(scope) => machine.retry(scope).map(Some),
        Command::Continue => machine.continue_session().map(Some),
        Command::Reload(graph) => {
            runtime.supervisor.cancel_current();
            machine.reload(graph);
            tracing::info!(rules = machine.graph().len(), "Rule graph reloaded, session reset");
            Ok(None)
        }
        Command::Quit => Ok(None),
    };

    match result {
        Ok(Some(activation)) => {
            tracing::info!(rule = %activation.rule.key, status = %machine.status(), "Activating rule");
            runtime.launch(activation);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Command rejected: {}", e);
            machine.note_error(&e);
        }
    }
}

/// 返回是否需要发布新快照
fn handle_event(machine: &mut SessionMachine, runtime: &mut Runtime, event: Event) -> bool {
    match event {
        Event::Progress {
            generation,
            tries,
            percent,
        } => machine.set_progress(generation, tries, percent),
        Event::Assessed { generation, outcome } => match machine.complete(generation, outcome) {
            Ok(Step::Next(activation)) => {
                tracing::info!(rule = %activation.rule.key, "Advancing");
                runtime.launch(activation);
                true
            }
            Ok(Step::Finished(request)) => {
                runtime.submit_log(machine.generation(), request);
                true
            }
            Err(SessionError::StaleActivation(generation)) => {
                tracing::debug!(generation, "Discarding stale completion");
                false
            }
            Err(e) => {
                tracing::warn!("Activation failed: {}", e);
                true
            }
        },
        Event::Logged { generation, state } => machine.record_log(generation, state),
    }
}
