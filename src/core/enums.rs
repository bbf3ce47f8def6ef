use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::aare::Pattern;

/// 字段取值：ALL（语法中省略该字段）或具体值
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AllOr<T> {
    All,
    Value(T),
}

impl<T> AllOr<T> {
    pub fn is_all(&self) -> bool {
        matches!(self, AllOr::All)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            AllOr::All => None,
            AllOr::Value(v) => Some(v),
        }
    }

    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(AllOr::All, AllOr::Value)
    }
}

impl AllOr<BTreeSet<String>> {
    /// 集合字段覆盖：ALL 覆盖一切；否则 other 必须是子集
    pub fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (AllOr::All, _) => true,
            (AllOr::Value(_), AllOr::All) => false,
            (AllOr::Value(mine), AllOr::Value(theirs)) => theirs.is_subset(mine),
        }
    }
}

impl AllOr<Pattern> {
    /// 模式字段覆盖：本模式匹配 other 的字面量
    pub fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (AllOr::All, _) => true,
            (AllOr::Value(_), AllOr::All) => false,
            (AllOr::Value(mine), AllOr::Value(theirs)) => mine.covers(theirs),
        }
    }
}

impl AllOr<String> {
    /// 普通字段覆盖：取值必须完全相同
    pub fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (AllOr::All, _) => true,
            (AllOr::Value(_), AllOr::All) => false,
            (AllOr::Value(mine), AllOr::Value(theirs)) => mine == theirs,
        }
    }
}

/// 规则类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    Abi,
    Alias,
    Boolean,
    Capability,
    ChangeProfile,
    Dbus,
    File,
    Include,
    Network,
    /// mount/remount/umount/pivot_root/unix，原样保留
    Opaque,
    Ptrace,
    Rlimit,
    Signal,
    UserNamespace,
    Variable,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Abi => "abi",
            RuleKind::Alias => "alias",
            RuleKind::Boolean => "boolean",
            RuleKind::Capability => "capability",
            RuleKind::ChangeProfile => "change_profile",
            RuleKind::Dbus => "dbus",
            RuleKind::File => "file",
            RuleKind::Include => "include",
            RuleKind::Network => "network",
            RuleKind::Opaque => "opaque",
            RuleKind::Ptrace => "ptrace",
            RuleKind::Rlimit => "rlimit",
            RuleKind::Signal => "signal",
            RuleKind::UserNamespace => "userns",
            RuleKind::Variable => "variable",
        }
    }

    /// 只能出现在 profile 之外（文件前导部分）的规则类型
    pub fn is_preamble_only(&self) -> bool {
        matches!(self, RuleKind::Abi | RuleKind::Variable | RuleKind::Boolean)
    }
}

impl Display for RuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
