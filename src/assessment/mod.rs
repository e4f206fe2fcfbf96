//! 评估层：探测器抽象、单规则探测循环、重试链与收尾判定

pub mod assess;
pub mod finalize;
pub mod mock;
pub mod probe;
pub mod retry;

pub use assess::{assess_rule, progress_percent, AssessmentOutcome, Baseline};
pub use finalize::{classify, finalize_retry, finalize_standard, Finalization, RetryEnd};
pub use mock::{ProbeReply, ScriptedProber};
pub use probe::{HttpProber, ProbeError, Prober};
pub use retry::{build_retry_chain, merge_retry_results, RetrySession};
