mod dedup_stats;
mod collection;
mod variables;

// 导出常用项
pub use dedup_stats::DedupStats;
pub use collection::{
    AbiRuleset, AliasRuleset, CapabilityRuleset, ChangeProfileRuleset, DbusRuleset, FileRuleset, IncludeRuleset,
    NetworkRuleset, OpaqueRuleset, PtraceRuleset, RlimitRuleset, Ruleset, SignalRuleset, UserNamespaceRuleset,
};
pub use variables::{BooleanRuleset, MergedVariables, VariableRuleset};
