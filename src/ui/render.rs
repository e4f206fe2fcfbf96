//! 界面渲染
//!
//! 按 SessionSnapshot 绘制一帧：顶部状态提示，中间为当前规则进度条与评估列表（最近在前），
//! 底部为命令输入框，底边标题列出当前可用命令。

use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
    Frame,
};

use crate::core::{LogState, SessionSnapshot, SessionStatus};
use crate::rules::{errors_count, warnings_count, AssessedRule};

fn plural(n: usize, one: &'static str, many: &'static str) -> &'static str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// 状态提示
pub fn feedback(snapshot: &SessionSnapshot) -> Vec<String> {
    let errors = errors_count(&snapshot.rule_list);
    let warnings = warnings_count(&snapshot.rule_list);
    let error_text = plural(errors, "error", "errors");
    let warning_text = plural(warnings, "warning", "warnings");

    match snapshot.status {
        SessionStatus::Idle => vec![
            "Type 'start' to begin your assessment.".to_string(),
            "This tool checks your device's settings against the network security requirements."
                .to_string(),
        ],
        SessionStatus::Running | SessionStatus::Retry => Vec::new(),
        SessionStatus::Error => vec![
            "You must resolve the check at the top of the list to continue the assessment."
                .to_string(),
            "You did not pass the security check(s) listed below.".to_string(),
        ],
        SessionStatus::Completed => {
            let mut lines = Vec::new();
            if errors > 0 {
                lines.push(format!(
                    "You must resolve the {error_text} to connect to the network."
                ));
            }
            lines.push(format!(
                "Your assessment is complete with {errors} {error_text} and {warnings} {warning_text}."
            ));
            lines
        }
        SessionStatus::Paused => vec![
            "You may continue the assessment with 'continue'.".to_string(),
            "You did not pass the security check(s) listed below.".to_string(),
        ],
    }
}

/// 当前状态下可用的命令
pub fn available_actions(snapshot: &SessionSnapshot) -> Vec<&'static str> {
    match snapshot.status {
        SessionStatus::Idle => vec!["start"],
        SessionStatus::Running | SessionStatus::Retry => vec!["restart"],
        SessionStatus::Error => vec!["restart", "retry"],
        SessionStatus::Completed => {
            if warnings_count(&snapshot.rule_list) + errors_count(&snapshot.rule_list) > 0 {
                vec!["restart", "retry"]
            } else {
                vec!["restart"]
            }
        }
        SessionStatus::Paused => {
            let mut actions = vec!["restart", "retry"];
            if snapshot.can_continue {
                actions.push("continue");
            }
            actions
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Pass,
    Warn,
    Fail,
}

impl Mark {
    fn of(assessed: &AssessedRule) -> Self {
        match assessed.response_status {
            Some(200) => Mark::Pass,
            _ if assessed.rule.warning => Mark::Warn,
            _ => Mark::Fail,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Mark::Pass => "PASS",
            Mark::Warn => "WARN",
            Mark::Fail => "FAIL",
        }
    }

    fn color(self) -> Color {
        match self {
            Mark::Pass => Color::Green,
            Mark::Warn => Color::Yellow,
            Mark::Fail => Color::Red,
        }
    }
}

fn rule_line(assessed: &AssessedRule) -> String {
    let status = assessed
        .response_status
        .map_or_else(|| "---".to_string(), |s| s.to_string());
    let mark = Mark::of(assessed);
    let title = if assessed.rule.title.is_empty() {
        assessed.rule.key.as_str()
    } else {
        assessed.rule.title.as_str()
    };
    let mut line = format!("[{}] {title} ({status})", mark.label());
    if mark != Mark::Pass && !assessed.rule.fail_text.is_empty() {
        line.push_str(" - ");
        line.push_str(&assessed.rule.fail_text);
    }
    line
}

fn rule_item(assessed: &AssessedRule) -> ListItem<'static> {
    let color = Mark::of(assessed).color();
    ListItem::new(Line::from(Span::styled(
        rule_line(assessed),
        Style::default().fg(color),
    )))
}

/// 进度条标签与百分比，例如 `FirstRule 50% (check 1 of 2)`
pub fn progress_label(snapshot: &SessionSnapshot) -> Option<(String, u16)> {
    let rule = snapshot
        .current_retry_rule
        .as_ref()
        .or(snapshot.current_rule.as_ref())?;
    let percent = u16::from(snapshot.progress.min(100));
    let step = match snapshot.end_path_length {
        Some(total) => format!(" (check {} of {})", snapshot.rule_list.len() + 1, total),
        None => String::new(),
    };
    Some((format!("{rule} {percent}%{step}"), percent))
}

/// 日志提交结果
pub fn log_line(snapshot: &SessionSnapshot) -> Option<String> {
    match &snapshot.log {
        LogState::None | LogState::Pending => None,
        LogState::Recorded { uid } => Some(format!("Reference number: {uid}")),
        LogState::NotRecorded { uid, reason } => {
            Some(format!("Result was not recorded (reference {uid}): {reason}"))
        }
    }
}

/// 绘制一帧；notice 为最近一条本地通知（重载结果、命令错误等）
pub fn draw(f: &mut Frame, snapshot: &SessionSnapshot, input_buffer: &str, notice: Option<&str>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(f.area());

    let mut lines: Vec<Line> = feedback(snapshot).into_iter().map(Line::from).collect();
    if let Some(message) = &snapshot.error_message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    if let Some(line) = log_line(snapshot) {
        lines.push(Line::from(Span::styled(line, Style::default().fg(Color::DarkGray))));
    }
    let header = Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .title(format!(" Prescreen │ {} ", snapshot.status))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(header, chunks[0]);

    let (label, percent) = progress_label(snapshot).unwrap_or_default();
    let gauge = Gauge::default()
        .block(Block::default().title(" Progress ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(percent)
        .label(label);
    f.render_widget(gauge, chunks[1]);

    let title = match snapshot.end_path_length {
        Some(total) => format!(" Checks ({} of {}) ", snapshot.rule_list.len(), total),
        None => format!(" Checks ({}) ", snapshot.rule_list.len()),
    };
    let items: Vec<ListItem> = snapshot.rule_list.iter().map(rule_item).collect();
    let list = List::new(items).block(Block::default().title(title).borders(Borders::ALL));
    f.render_widget(list, chunks[2]);

    let (prompt, color) = match notice {
        Some(text) => (format!(" {text} "), Color::Magenta),
        None => (" Command ".to_string(), Color::Blue),
    };
    let hint = format!(
        " {} │ Enter run │ Esc clear │ Ctrl+R restart │ Ctrl+C quit ",
        available_actions(snapshot).join(" | ")
    );
    let input = Paragraph::new(input_buffer).block(
        Block::default()
            .title(prompt)
            .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color)),
    );
    f.render_widget(input, chunks[3]);
}
