mod file;
mod registry;
mod scope;

// 导出常用项
pub use file::{IncludeFragment, ParsedProfiles, Preamble, ProfileFile};
pub use registry::ProfileRegistry;
pub use scope::{split_flags, ProfileScope, ScopeKind, ScopeRules, PROFILE_FLAGS};
