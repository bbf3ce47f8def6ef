mod abi;
mod alias;
mod boolean;
mod capability;
mod change_profile;
mod dbus;
mod details;
mod file;
mod include;
mod network;
mod opaque;
mod ptrace;
mod rlimit;
mod rule_type;
mod signal;
mod userns;
mod variable;

// 导出常用项
pub use abi::AbiRule;
pub use alias::AliasRule;
pub use boolean::BooleanRule;
pub use capability::{CapabilityRule, CAPABILITY_NAMES};
pub use change_profile::{ChangeProfileRule, ExecMode};
pub use dbus::{DbusConds, DbusRule, DBUS_ACCESS_KEYWORDS};
pub use file::{split_perms, FileRule, EXEC_FALLBACK_TRANSITIONS, EXEC_TRANSITIONS, FILE_PERMISSIONS};
pub use include::IncludeRule;
pub use network::{NetworkRule, NETWORK_DOMAIN_KEYWORDS, NETWORK_PROTOCOL_KEYWORDS, NETWORK_TYPE_KEYWORDS};
pub use opaque::OpaqueRule;
pub use ptrace::{PtraceRule, PTRACE_ACCESS_KEYWORDS};
pub use rlimit::{RlimitRule, RlimitValue};
pub use rule_type::RuleType;
pub use signal::{SignalRule, SIGNAL_ACCESS_KEYWORDS, SIGNAL_KEYWORDS};
pub use userns::UserNamespaceRule;
pub use variable::{separate_vars, VariableMode, VariableRule};

use crate::core::{RuleBase, RuleKind, Severity, SeverityDb};
use crate::error::{PolicyError, PolicyResult};

/// 任意类型的规则（封闭集合）
#[derive(Debug, Clone)]
pub enum Rule {
    Abi(AbiRule),
    Alias(AliasRule),
    Boolean(BooleanRule),
    Capability(CapabilityRule),
    ChangeProfile(ChangeProfileRule),
    Dbus(DbusRule),
    File(FileRule),
    Include(IncludeRule),
    Network(NetworkRule),
    Opaque(OpaqueRule),
    Ptrace(PtraceRule),
    Rlimit(RlimitRule),
    Signal(SignalRule),
    UserNamespace(UserNamespaceRule),
    Variable(VariableRule),
}

/// 对每个变体执行同一段代码
macro_rules! dispatch {
    ($value:expr, $rule:ident => $body:expr) => {
        match $value {
            Rule::Abi($rule) => $body,
            Rule::Alias($rule) => $body,
            Rule::Boolean($rule) => $body,
            Rule::Capability($rule) => $body,
            Rule::ChangeProfile($rule) => $body,
            Rule::Dbus($rule) => $body,
            Rule::File($rule) => $body,
            Rule::Include($rule) => $body,
            Rule::Network($rule) => $body,
            Rule::Opaque($rule) => $body,
            Rule::Ptrace($rule) => $body,
            Rule::Rlimit($rule) => $body,
            Rule::Signal($rule) => $body,
            Rule::UserNamespace($rule) => $body,
            Rule::Variable($rule) => $body,
        }
    };
}

/// 同类型规则两两比较；类型不同时返回 None
macro_rules! dispatch_pair {
    ($left:expr, $right:expr, ($a:ident, $b:ident) => $body:expr) => {
        match ($left, $right) {
            (Rule::Abi($a), Rule::Abi($b)) => Some($body),
            (Rule::Alias($a), Rule::Alias($b)) => Some($body),
            (Rule::Boolean($a), Rule::Boolean($b)) => Some($body),
            (Rule::Capability($a), Rule::Capability($b)) => Some($body),
            (Rule::ChangeProfile($a), Rule::ChangeProfile($b)) => Some($body),
            (Rule::Dbus($a), Rule::Dbus($b)) => Some($body),
            (Rule::File($a), Rule::File($b)) => Some($body),
            (Rule::Include($a), Rule::Include($b)) => Some($body),
            (Rule::Network($a), Rule::Network($b)) => Some($body),
            (Rule::Opaque($a), Rule::Opaque($b)) => Some($body),
            (Rule::Ptrace($a), Rule::Ptrace($b)) => Some($body),
            (Rule::Rlimit($a), Rule::Rlimit($b)) => Some($body),
            (Rule::Signal($a), Rule::Signal($b)) => Some($body),
            (Rule::UserNamespace($a), Rule::UserNamespace($b)) => Some($body),
            (Rule::Variable($a), Rule::Variable($b)) => Some($body),
            _ => None,
        }
    };
}

macro_rules! impl_from_rule {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Rule {
                fn from(rule: $ty) -> Self {
                    Rule::$variant(rule)
                }
            }
        )*
    };
}

impl_from_rule!(
    Abi(AbiRule),
    Alias(AliasRule),
    Boolean(BooleanRule),
    Capability(CapabilityRule),
    ChangeProfile(ChangeProfileRule),
    Dbus(DbusRule),
    File(FileRule),
    Include(IncludeRule),
    Network(NetworkRule),
    Opaque(OpaqueRule),
    Ptrace(PtraceRule),
    Rlimit(RlimitRule),
    Signal(SignalRule),
    UserNamespace(UserNamespaceRule),
    Variable(VariableRule),
);

/// 语句识别表中的一项
struct RuleEntry {
    kind: RuleKind,
    matches: fn(&str) -> bool,
    parse: fn(&str) -> PolicyResult<Rule>,
}

fn parse_as<R>(raw: &str) -> PolicyResult<Rule>
where
    R: RuleType + Into<Rule>,
{
    R::parse(raw).map(Into::into)
}

macro_rules! entry {
    ($ty:ty) => {
        RuleEntry {
            kind: <$ty as RuleType>::KIND,
            matches: <$ty as RuleType>::matches,
            parse: parse_as::<$ty>,
        }
    };
}

/// 识别顺序：关键字开头的规则在前，裸路径（file）兜底
const RULE_TABLE: &[RuleEntry] = &[
    entry!(AbiRule),
    entry!(IncludeRule),
    entry!(AliasRule),
    entry!(BooleanRule),
    entry!(VariableRule),
    entry!(CapabilityRule),
    entry!(ChangeProfileRule),
    entry!(DbusRule),
    entry!(NetworkRule),
    entry!(PtraceRule),
    entry!(RlimitRule),
    entry!(SignalRule),
    entry!(UserNamespaceRule),
    entry!(OpaqueRule),
    entry!(FileRule),
];

impl Rule {
    /// 按固定顺序识别一条完整语句；没有任何类型认领时返回 None
    pub fn parse_line(line: &str) -> Option<PolicyResult<Rule>> {
        RULE_TABLE.iter().find(|entry| (entry.matches)(line)).map(|entry| {
            log::trace!("Statement dispatched | kind: {}", entry.kind);
            (entry.parse)(line)
        })
    }

    /// 指定类型的语法预检
    pub fn kind_matches(kind: RuleKind, line: &str) -> bool {
        RULE_TABLE
            .iter()
            .any(|entry| entry.kind == kind && (entry.matches)(line))
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Abi(_) => RuleKind::Abi,
            Rule::Alias(_) => RuleKind::Alias,
            Rule::Boolean(_) => RuleKind::Boolean,
            Rule::Capability(_) => RuleKind::Capability,
            Rule::ChangeProfile(_) => RuleKind::ChangeProfile,
            Rule::Dbus(_) => RuleKind::Dbus,
            Rule::File(_) => RuleKind::File,
            Rule::Include(_) => RuleKind::Include,
            Rule::Network(_) => RuleKind::Network,
            Rule::Opaque(_) => RuleKind::Opaque,
            Rule::Ptrace(_) => RuleKind::Ptrace,
            Rule::Rlimit(_) => RuleKind::Rlimit,
            Rule::Signal(_) => RuleKind::Signal,
            Rule::UserNamespace(_) => RuleKind::UserNamespace,
            Rule::Variable(_) => RuleKind::Variable,
        }
    }

    pub fn base(&self) -> &RuleBase {
        dispatch!(self, rule => rule.base())
    }

    pub fn get_clean(&self, depth: usize) -> String {
        dispatch!(self, rule => rule.get_clean(depth))
    }

    pub fn get_raw(&self, depth: usize) -> String {
        dispatch!(self, rule => rule.get_raw(depth))
    }

    pub fn severity(&self, db: &dyn SeverityDb) -> Severity {
        dispatch!(self, rule => rule.severity(db))
    }

    pub fn set_audit(&mut self, audit: bool) {
        dispatch!(self, rule => rule.set_audit(audit))
    }

    pub fn set_deny(&mut self, deny: bool) {
        dispatch!(self, rule => rule.set_deny(deny))
    }

    /// 跨类型比较属于调用方错误
    pub fn is_covered(&self, other: &Rule, check_allow_deny: bool, check_audit: bool) -> PolicyResult<bool> {
        dispatch_pair!(self, other, (a, b) => a.is_covered(b, check_allow_deny, check_audit))
            .ok_or_else(|| self.kind_mismatch(other))
    }

    pub fn is_equal(&self, other: &Rule, strict: bool) -> PolicyResult<bool> {
        dispatch_pair!(self, other, (a, b) => a.is_equal(b, strict)).ok_or_else(|| self.kind_mismatch(other))
    }

    fn kind_mismatch(&self, other: &Rule) -> PolicyError {
        PolicyError::internal(format!(
            "Cannot compare {} rule with {} rule",
            self.kind(),
            other.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Rule {
        Rule::parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_dispatch_picks_kind() {
        for (line, kind) in [
            ("abi <abi/3.0>,", RuleKind::Abi),
            ("#include <tunables/global>", RuleKind::Include),
            ("include if exists <local/foo>", RuleKind::Include),
            ("alias /usr/ -> /mnt/usr/,", RuleKind::Alias),
            ("$foo = true", RuleKind::Boolean),
            ("@{foo} = /a", RuleKind::Variable),
            ("audit capability chown,", RuleKind::Capability),
            ("change_profile -> foo,", RuleKind::ChangeProfile),
            ("dbus send,", RuleKind::Dbus),
            ("network inet,", RuleKind::Network),
            ("deny ptrace,", RuleKind::Ptrace),
            ("set rlimit nproc <= 10,", RuleKind::Rlimit),
            ("signal,", RuleKind::Signal),
            ("userns,", RuleKind::UserNamespace),
            ("mount,", RuleKind::Opaque),
            ("owner /foo r,", RuleKind::File),
            ("file,", RuleKind::File),
        ] {
            assert_eq!(parse(line).kind(), kind, "{}", line);
        }
    }

    #[test]
    fn test_dispatch_unknown_line() {
        assert!(Rule::parse_line("frobnicate everything,").is_none());
        assert!(Rule::parse_line("/foo r").is_none());
        assert!(Rule::parse_line("network bogus,").unwrap().is_err());
    }

    #[test]
    fn test_cross_kind_comparison_is_internal_error() {
        let cap = parse("capability,");
        let net = parse("network,");
        assert!(cap.is_covered(&net, true, false).unwrap_err().is_internal());
        assert!(cap.is_equal(&net, true).unwrap_err().is_internal());
        assert!(cap.is_covered(&parse("capability chown,"), true, false).unwrap());
    }

    #[test]
    fn test_round_trip_clean_form() {
        // 测试场景：规范形式再次解析后与原规则等价
        for line in [
            "audit deny owner /foo/{a,b}/** rwlk,",
            "/usr/bin/foo Px -> bar,",
            "capability   sys_admin chown,",
            "network inet6   dgram,",
            "dbus (send receive) bus=session path=/org/foo peer=(label=x),",
            "ptrace (read, trace) peer=unconfined,",
            "signal (send) set=(kill, term) peer=/usr/bin/*,",
            "change_profile unsafe /bin/* -> foo,",
            "set rlimit cpu <= 10 s,",
            "userns create,",
            "include <abstractions/base>",
            "abi <abi/3.0>,",
            "alias /a -> /b,",
            "@{x} += /a \"/b c\"",
            "$x = FALSE",
            "umount  /mnt/,",
        ] {
            let rule = parse(line);
            let reparsed = parse(&rule.get_clean(0));
            assert!(rule.is_equal(&reparsed, false).unwrap(), "{}", line);
        }
    }
}
