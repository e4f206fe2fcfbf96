//! 核心编排层：错误、状态投影、会话状态机、激活监管、主控循环

pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use error::SessionError;
pub use machine::{Activation, SessionMachine, SessionSettings, Step};
pub use orchestrator::{create_session, Command};
pub use session_supervisor::SessionSupervisor;
pub use state::{
    Action, LogRequest, LogState, RetryScope, RuleList, SessionRecord, SessionResult,
    SessionSnapshot, SessionStatus,
};
