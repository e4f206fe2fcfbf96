//! TUI 主循环
//!
//! 进入全屏/原始模式，轮询 state_rx 与键盘事件，整行命令经 EventHandler 发给编排器，
//! 每帧用 draw 渲染快照与输入缓冲；收到服务端 rules_updated 推送时重新拉取规则图并 Reload。

use std::io::{self, Stdout};
use std::sync::Arc;

use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{mpsc, watch};

use crate::core::{Command, SessionSnapshot};
use crate::provider::{ConfigProvider, RulesUpdated};
use crate::ui::event::{edit_input, AppEvent, ConsoleInput, EventHandler, HELP};
use crate::ui::render::draw;

async fn reload(provider: &dyn ConfigProvider, cmd_tx: &mpsc::UnboundedSender<Command>) -> String {
    match provider.get_rules().await {
        Ok(graph) => {
            let count = graph.len();
            let _ = cmd_tx.send(Command::Reload(Arc::new(graph)));
            format!("Rules reloaded ({count} checks). Session reset.")
        }
        Err(e) => {
            tracing::warn!("Rule reload failed: {}", e);
            format!("Could not reload rules: {e}")
        }
    }
}

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端并通知编排器
pub async fn run_console(
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionSnapshot>,
    provider: Arc<dyn ConfigProvider>,
    updates: Option<mpsc::UnboundedReceiver<RulesUpdated>>,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &cmd_tx, state_rx, provider.as_ref(), updates).await;

    restore_terminal(&mut terminal)?;
    let _ = cmd_tx.send(Command::Quit);
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    cmd_tx: &mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionSnapshot>,
    provider: &dyn ConfigProvider,
    mut updates: Option<mpsc::UnboundedReceiver<RulesUpdated>>,
) -> anyhow::Result<()> {
    let event_handler = EventHandler::new(cmd_tx.clone());
    let mut input_buffer = String::new();
    let mut notice: Option<String> = None;

    loop {
        // 编排器已退出
        if state_rx.has_changed().is_err() {
            break;
        }

        let mut pushed = None;
        if let Some(rx) = updates.as_mut() {
            while let Ok(update) = rx.try_recv() {
                pushed = Some(update.version);
            }
        }
        if let Some(version) = pushed {
            tracing::info!(version, "Server pushed new rules");
            notice = Some(reload(provider, cmd_tx).await);
        }

        let snapshot = state_rx.borrow().clone();
        terminal.draw(|f| draw(f, &snapshot, &input_buffer, notice.as_deref()))?;

        match event_handler.poll()? {
            Some(AppEvent::Quit) => break,
            Some(AppEvent::Clear) => {
                input_buffer.clear();
                notice = None;
            }
            Some(AppEvent::Sent(_)) => notice = None,
            Some(AppEvent::Key(key)) => {
                if let Some(line) = edit_input(&mut input_buffer, key) {
                    match event_handler.submit(&line) {
                        Ok(None) => notice = None,
                        Ok(Some(ConsoleInput::Reload)) => notice = Some(reload(provider, cmd_tx).await),
                        Ok(Some(ConsoleInput::Help)) => notice = Some(HELP.to_string()),
                        Ok(Some(ConsoleInput::Quit)) => break,
                        Ok(Some(ConsoleInput::Session(_))) => {}
                        Err(e) => notice = Some(format!("{e}. Type 'help' for commands")),
                    }
                }
            }
            None => {}
        }

        tokio::task::yield_now().await;
    }
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
