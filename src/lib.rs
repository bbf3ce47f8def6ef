//! rsapparmor - AppArmor 策略语言工具库：AARE 编译、规则模型、覆盖判定与规范化输出

// 导出全局错误类型
pub use self::error::{InternalInvariantError, PolicyError, PolicyResult, PolicySyntaxError, SourceLocation};

// 导出配置模块
pub use self::config::{ParserConfig, ParserConfigBuilder, RequiredHats};

// 导出 AARE 模块核心接口
pub use self::aare::{convert_glob, escape_literal, Pattern};

// 导出公共类型
pub use self::core::{AllOr, Origin, RuleBase, RuleKind, Severity, SeverityDb, Text};

// 导出规则模块核心接口
pub use self::rule::{
    AbiRule, AliasRule, BooleanRule, CapabilityRule, ChangeProfileRule, DbusRule, ExecMode, FileRule,
    IncludeRule, NetworkRule, OpaqueRule, PtraceRule, RlimitRule, RlimitValue, Rule, RuleType, SignalRule,
    UserNamespaceRule, VariableMode, VariableRule,
};

// 导出规则集模块核心接口
pub use self::ruleset::{BooleanRuleset, DedupStats, MergedVariables, Ruleset, VariableRuleset};

// 导出解析与注册表接口
pub use self::parser::ParseContext;
pub use self::profile::{
    IncludeFragment, ParsedProfiles, Preamble, ProfileFile, ProfileRegistry, ProfileScope, ScopeKind, ScopeRules,
};

// 声明所有子模块
pub mod aare;
pub mod config;
pub mod core;
pub mod error;
pub mod parser;
pub mod profile;
pub mod rule;
pub mod ruleset;
pub mod utils;
