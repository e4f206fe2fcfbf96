//! 事件处理
//!
//! 轮询 crossterm 键盘事件：Ctrl+C/Ctrl+Q 退出，Ctrl+R 直接重新开始，Esc 清空输入，
//! 其余按键交给 run_console 拼 input_buffer。Enter 时 submit 解析整行命令：
//! start / restart / retry [warning|error] / continue / reload / help / quit。

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::core::{Command, RetryScope};

/// 解析后的命令行输入
#[derive(Debug, Clone)]
pub enum ConsoleInput {
    /// 直接发给编排器
    Session(Command),
    /// 从配置服务重新拉取规则图
    Reload,
    Help,
    Quit,
}

pub const HELP: &str = "Commands: start | restart | retry [warning|error] | continue | reload | help | quit";

pub fn parse_line(line: &str) -> Result<ConsoleInput, String> {
    let mut words = line.split_whitespace().map(str::to_lowercase);
    let Some(head) = words.next() else {
        return Err("Empty command".to_string());
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("Unexpected argument '{extra}'"));
    }

    let input = match (head.as_str(), arg.as_deref()) {
        ("start", None) => ConsoleInput::Session(Command::Start),
        ("restart", None) => ConsoleInput::Session(Command::Restart),
        ("retry", None) | ("retry", Some("all")) => ConsoleInput::Session(Command::Retry(RetryScope::All)),
        ("retry", Some("warning" | "warnings")) => {
            ConsoleInput::Session(Command::Retry(RetryScope::Warning))
        }
        ("retry", Some("error" | "errors")) => ConsoleInput::Session(Command::Retry(RetryScope::Error)),
        ("retry", Some(other)) => return Err(format!("Unknown retry scope '{other}'")),
        ("continue", None) => ConsoleInput::Session(Command::Continue),
        ("reload", None) => ConsoleInput::Reload,
        ("help" | "?", None) => ConsoleInput::Help,
        ("quit" | "exit", None) => ConsoleInput::Quit,
        (cmd, Some(_)) if matches!(cmd, "start" | "restart" | "continue" | "reload" | "help" | "quit" | "exit") => {
            return Err(format!("'{cmd}' takes no argument"))
        }
        (cmd, _) => return Err(format!("Unknown command '{cmd}'")),
    };
    Ok(input)
}

/// 应用事件：快捷键或原始 KeyEvent
#[derive(Debug, Clone)]
pub enum AppEvent {
    Quit,
    /// 清空输入缓冲
    Clear,
    /// 快捷键已直接发给编排器
    Sent(Command),
    Key(KeyEvent),
}

/// 事件处理器：持有 cmd_tx，poll 时读键盘并返回 AppEvent，submit 解析并发送整行命令
pub struct EventHandler {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EventHandler {
    pub fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    pub fn poll(&self) -> anyhow::Result<Option<AppEvent>> {
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(self.handle_key(key)));
                }
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: KeyEvent) -> AppEvent {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') | KeyCode::Char('q') if ctrl => AppEvent::Quit,
            KeyCode::Char('r') if ctrl => {
                let _ = self.cmd_tx.send(Command::Restart);
                AppEvent::Sent(Command::Restart)
            }
            KeyCode::Esc => AppEvent::Clear,
            _ => AppEvent::Key(key),
        }
    }

    /// 会话命令直接发出（返回 None），其余交给调用方处理
    pub fn submit(&self, line: &str) -> Result<Option<ConsoleInput>, String> {
        match parse_line(line)? {
            ConsoleInput::Session(cmd) => {
                self.cmd_tx
                    .send(cmd)
                    .map_err(|_| "Session has stopped".to_string())?;
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }
}

/// 把普通按键写入输入缓冲；Enter 时取出整行
pub fn edit_input(input: &mut String, key: KeyEvent) -> Option<String> {
    match key.code {
        KeyCode::Enter => {
            let line = std::mem::take(input);
            (!line.trim().is_empty()).then_some(line)
        }
        KeyCode::Backspace => {
            input.pop();
            None
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            input.push(c);
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(parse_line("start"), Ok(ConsoleInput::Session(Command::Start))));
        assert!(matches!(parse_line("  Restart "), Ok(ConsoleInput::Session(Command::Restart))));
        assert!(matches!(
            parse_line("retry"),
            Ok(ConsoleInput::Session(Command::Retry(RetryScope::All)))
        ));
        assert!(matches!(
            parse_line("retry warning"),
            Ok(ConsoleInput::Session(Command::Retry(RetryScope::Warning)))
        ));
        assert!(matches!(
            parse_line("retry errors"),
            Ok(ConsoleInput::Session(Command::Retry(RetryScope::Error)))
        ));
        assert!(matches!(parse_line("continue"), Ok(ConsoleInput::Session(Command::Continue))));
        assert!(matches!(parse_line("reload"), Ok(ConsoleInput::Reload)));
        assert!(matches!(parse_line("exit"), Ok(ConsoleInput::Quit)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("").is_err());
        assert!(parse_line("retry soon").is_err());
        assert!(parse_line("start now").is_err());
        assert!(parse_line("launch").is_err());
        assert!(parse_line("retry error twice").is_err());
    }

    #[test]
    fn test_shortcuts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = EventHandler::new(tx);

        assert!(matches!(handler.handle_key(ctrl('c')), AppEvent::Quit));
        assert!(matches!(handler.handle_key(ctrl('q')), AppEvent::Quit));
        assert!(matches!(handler.handle_key(key(KeyCode::Esc)), AppEvent::Clear));
        assert!(matches!(handler.handle_key(key(KeyCode::Char('q'))), AppEvent::Key(_)));
        assert!(rx.try_recv().is_err());

        assert!(matches!(handler.handle_key(ctrl('r')), AppEvent::Sent(Command::Restart)));
        assert!(matches!(rx.try_recv(), Ok(Command::Restart)));
    }

    #[test]
    fn test_submit_sends_session_commands_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = EventHandler::new(tx);

        assert!(matches!(handler.submit("retry warning"), Ok(None)));
        assert!(matches!(rx.try_recv(), Ok(Command::Retry(RetryScope::Warning))));

        assert!(matches!(handler.submit("reload"), Ok(Some(ConsoleInput::Reload))));
        assert!(handler.submit("launch").is_err());
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(handler.submit("start").is_err());
    }

    #[test]
    fn test_edit_input() {
        let mut input = String::new();
        for c in "startx".chars() {
            assert!(edit_input(&mut input, key(KeyCode::Char(c))).is_none());
        }
        edit_input(&mut input, key(KeyCode::Backspace));
        assert!(edit_input(&mut input, ctrl('a')).is_none());
        assert_eq!(input, "start");
        assert_eq!(edit_input(&mut input, key(KeyCode::Enter)).as_deref(), Some("start"));
        assert!(input.is_empty());

        input.push_str("   ");
        assert!(edit_input(&mut input, key(KeyCode::Enter)).is_none());
        assert!(input.is_empty());
    }
}
