use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{AllOr, Origin, RuleBase, RuleKind, Severity, SeverityDb};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_CAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"capability(?P<capability>(\s+\S+)+)?",
        re_comma_eol!()
    ))
    .unwrap()
});

/// 内核已知的 capability 名称
pub const CAPABILITY_NAMES: &[&str] = &[
    "audit_control", "audit_read", "audit_write", "block_suspend", "bpf", "checkpoint_restore",
    "chown", "dac_override", "dac_read_search", "fowner", "fsetid", "ipc_lock", "ipc_owner",
    "kill", "lease", "linux_immutable", "mac_admin", "mac_override", "mknod", "net_admin",
    "net_bind_service", "net_broadcast", "net_raw", "perfmon", "setfcap", "setgid", "setpcap",
    "setuid", "syslog", "sys_admin", "sys_boot", "sys_chroot", "sys_module", "sys_nice",
    "sys_pacct", "sys_ptrace", "sys_rawio", "sys_resource", "sys_time", "sys_tty_config",
    "wake_alarm",
];

/// capability 规则：能力名集合或 ALL
#[derive(Debug, Clone)]
pub struct CapabilityRule {
    base: RuleBase,
    pub capability: AllOr<BTreeSet<String>>,
}

impl CapabilityRule {
    pub fn new<I, S>(names: I, base: RuleBase) -> PolicyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut capability = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().is_empty() || name.contains(char::is_whitespace) {
                return Err(PolicyError::internal(format!(
                    "Invalid capability name '{}'",
                    name
                )));
            }
            capability.insert(name.to_string());
        }
        if capability.is_empty() {
            return Err(PolicyError::internal("Empty capability list"));
        }
        for name in &capability {
            if !CAPABILITY_NAMES.contains(&name.as_str()) {
                log::warn!("Unknown capability name | name: {}", name);
            }
        }
        Ok(Self {
            base,
            capability: AllOr::Value(capability),
        })
    }

    pub fn all(base: RuleBase) -> Self {
        Self {
            base,
            capability: AllOr::All,
        }
    }

    /// 由日志事件中的单个 capability 名称合成
    pub fn from_log_event(name: &str) -> PolicyResult<Self> {
        let base = RuleBase::default().with_origin(Origin::LogEvent);
        Self::new([name], base)
    }
}

impl RuleType for CapabilityRule {
    const KIND: RuleKind = RuleKind::Capability;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_CAP.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_CAP
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid capability rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        match caps.name("capability") {
            Some(names) => Self::new(names.as_str().split_whitespace(), base),
            None => Ok(Self::all(base)),
        }
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let names = match &self.capability {
            AllOr::All => String::new(),
            AllOr::Value(set) => format!(" {}", set.iter().cloned().collect::<Vec<_>>().join(" ")),
        };
        format!(
            "{}capability{},{}",
            self.base.modifiers_str(),
            names,
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.capability.covers(&other.capability)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.capability == other.capability
    }

    fn severity(&self, db: &dyn SeverityDb) -> Severity {
        match &self.capability {
            AllOr::All => db.rank_capability("__ALL__").into(),
            AllOr::Value(set) => set
                .iter()
                .map(|name| Severity::from(db.rank_capability(name)))
                .fold(Severity::Unknown, Severity::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(raw: &str) -> CapabilityRule {
        CapabilityRule::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_capability_rules() {
        let all = cap("capability,");
        assert!(all.capability.is_all());
        assert!(!all.base().deny);

        let rule = cap("     deny capability sys_admin,  # some comment");
        assert!(rule.base().deny);
        assert_eq!(rule.base().comment, " # some comment");
        assert_eq!(
            rule.get_raw(0),
            "deny capability sys_admin,  # some comment"
        );

        let multi = cap("capability sys_admin dac_override,");
        let names: Vec<&str> = multi.capability.value().unwrap().iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["dac_override", "sys_admin"]);
    }

    #[test]
    fn test_invalid_capability_rules() {
        assert!(!CapabilityRule::matches("capability sys_admin"));
        assert!(CapabilityRule::parse("capabilityfoo,").is_err());
        assert!(CapabilityRule::new(Vec::<String>::new(), RuleBase::default())
            .unwrap_err()
            .is_internal());
        assert!(CapabilityRule::new(["chown", "   "], RuleBase::default())
            .unwrap_err()
            .is_internal());
    }

    #[test]
    fn test_write_capability_rules() {
        assert_eq!(cap("    audit     capability sys_admin,").get_clean(0), "audit capability sys_admin,");
        assert_eq!(
            cap("   deny capability      sys_admin      audit_write,# foo bar").get_clean(0),
            "deny capability audit_write sys_admin, # foo bar"
        );
        let manual = CapabilityRule::new(
            ["ptrace", "audit_write"],
            RuleBase::new(false, false, true, "").unwrap(),
        )
        .unwrap();
        assert_eq!(manual.get_clean(2), "    allow capability audit_write ptrace,");
        assert_eq!(manual.get_raw(2), "    allow capability audit_write ptrace,");
    }

    #[test]
    fn test_capability_coverage() {
        let rule = cap("capability sys_admin,");
        assert!(rule.is_covered(&cap("capability sys_admin,"), true, false));
        assert!(!rule.is_covered(&cap("audit capability sys_admin,"), true, false));
        assert!(!rule.is_covered(&cap("capability chown,"), true, false));
        assert!(!rule.is_covered(&cap("capability,"), true, false));
        assert!(!rule.is_covered(&cap("deny capability sys_admin,"), true, false));

        let audit = cap("audit capability sys_admin,");
        assert!(audit.is_covered(&cap("capability sys_admin,"), true, false));
        assert!(!audit.is_covered(&cap("capability sys_admin,"), true, true));

        let all = cap("capability,");
        assert!(all.is_covered(&cap("capability sys_admin audit_write,"), true, false));
        assert!(!all.is_covered(&cap("audit capability,"), true, false));
    }

    #[test]
    fn test_capability_equality() {
        let rule = cap("capability sys_admin,");
        assert!(rule.is_equal(&cap("capability sys_admin,"), true));
        assert!(!rule.is_equal(&cap("allow capability sys_admin,"), true));
        assert!(rule.is_equal(&cap("allow capability sys_admin,"), false));
        assert!(!rule.is_equal(&cap("audit capability sys_admin,"), false));
    }

    struct FixedDb;

    impl SeverityDb for FixedDb {
        fn rank_path(&self, _path: &str, _perms: &str) -> Option<u8> {
            None
        }
        fn rank_capability(&self, capability: &str) -> Option<u8> {
            match capability {
                "sys_admin" => Some(10),
                "chown" => Some(4),
                "__ALL__" => Some(10),
                _ => None,
            }
        }
    }

    #[test]
    fn test_capability_severity() {
        assert_eq!(cap("capability chown sys_admin,").severity(&FixedDb), Severity::Rank(10));
        assert_eq!(cap("capability,").severity(&FixedDb), Severity::Rank(10));
        assert_eq!(cap("capability wake_alarm,").severity(&FixedDb), Severity::Unknown);
    }
}
