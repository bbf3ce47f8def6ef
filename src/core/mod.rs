mod base;
mod enums;
pub(crate) mod grammar;
mod severity;

// 导出常用项
pub use base::{Origin, RuleBase, Text};
pub use enums::{AllOr, RuleKind};
pub use grammar::{indent, quote_if_needed, strip_quotes};
pub use severity::{Severity, SeverityDb};
