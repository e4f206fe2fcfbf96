//! TUI 层：主循环（app）、键盘事件与命令解析（event）、界面渲染（render）

pub mod app;
pub mod event;
pub mod render;

pub use app::run_console;
pub use event::{parse_line, AppEvent, ConsoleInput, EventHandler};
pub use render::draw;
