//! 规则层：规则图数据模型、谓词、加载校验与防篡改取值集合

pub mod graph;
pub mod predicates;
pub mod types;
pub mod validation;

pub use graph::{end_path_length, RuleGraph};
pub use predicates::*;
pub use types::{is_end, AssessedRule, RetryNode, Rule, RuleGraphError, RuleKey, END};
pub use validation::{SafeValues, ValidationError};
