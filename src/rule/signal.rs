use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::details::{access_covers, access_set, join, parse_details, pattern_value, write_access, write_pattern_cond};
use super::RuleType;
use crate::aare::Pattern;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{AllOr, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"signal(?P<details>\s+.*?)?",
        re_comma_eol!()
    ))
    .unwrap()
});

static RE_RTMIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^rtmin\+([0-9]|[12][0-9]|3[0-2])$").unwrap());

pub const SIGNAL_ACCESS_KEYWORDS: &[&str] = &["r", "w", "rw", "wr", "read", "write", "send", "receive"];

pub const SIGNAL_KEYWORDS: &[&str] = &[
    "hup", "int", "quit", "ill", "trap", "abrt", "bus", "fpe", "kill", "usr1", "segv", "usr2",
    "pipe", "alrm", "term", "stkflt", "chld", "cont", "stop", "stp", "ttin", "ttou", "urg",
    "xcpu", "xfsz", "vtalrm", "prof", "winch", "io", "pwr", "sys", "emt", "exists",
];

/// r/read 等价 receive，w/write 等价 send
fn expand_access(access: &str) -> &'static [&'static str] {
    match access {
        "r" | "read" | "receive" => &["receive"],
        "w" | "write" | "send" => &["send"],
        "rw" | "wr" => &["receive", "send"],
        _ => &[],
    }
}

fn is_signal_name(name: &str) -> bool {
    SIGNAL_KEYWORDS.contains(&name) || RE_RTMIN.is_match(name)
}

/// signal 规则：访问集合 + 信号集合 + 对端模式
#[derive(Debug, Clone)]
pub struct SignalRule {
    base: RuleBase,
    pub access: AllOr<BTreeSet<String>>,
    pub signal: AllOr<BTreeSet<String>>,
    pub peer: AllOr<Pattern>,
}

impl SignalRule {
    pub fn new(
        access: AllOr<BTreeSet<String>>,
        signal: AllOr<BTreeSet<String>>,
        peer: AllOr<Pattern>,
        base: RuleBase,
    ) -> PolicyResult<Self> {
        if let AllOr::Value(set) = &access {
            if set.is_empty() {
                return Err(PolicyError::internal("Empty signal access set"));
            }
            let words: Vec<String> = set.iter().cloned().collect();
            access_set(&words, SIGNAL_ACCESS_KEYWORDS, "signal")?;
        }
        if let AllOr::Value(set) = &signal {
            if set.is_empty() {
                return Err(PolicyError::internal("Empty signal set"));
            }
            if let Some(bad) = set.iter().find(|name| !is_signal_name(name)) {
                return Err(PolicyError::syntax(format!("Invalid signal '{}'", bad)));
            }
        }
        Ok(Self {
            base,
            access,
            signal,
            peer,
        })
    }
}

impl RuleType for SignalRule {
    const KIND: RuleKind = RuleKind::Signal;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_SIGNAL.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_SIGNAL
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid signal rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        let mut details = parse_details(caps.name("details").map_or("", |m| m.as_str()))?;
        let access = access_set(&details.access, SIGNAL_ACCESS_KEYWORDS, "signal")?;
        let signal = match details.take("set")? {
            None => AllOr::All,
            Some(value) => AllOr::Value(value.items().into_iter().collect()),
        };
        let peer = pattern_value(details.take("peer")?, "peer")?;
        details.ensure_consumed("signal")?;

        Self::new(access, signal, peer, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let signal = match &self.signal {
            AllOr::All => String::new(),
            AllOr::Value(set) if set.len() == 1 => format!(" set={}", join(set)),
            AllOr::Value(set) => format!(" set=({})", join(set)),
        };
        format!(
            "{}signal{}{}{},{}",
            self.base.modifiers_str(),
            write_access(&self.access),
            signal,
            write_pattern_cond("peer", &self.peer),
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        access_covers(&self.access, &other.access, expand_access)
            && self.signal.covers(&other.signal)
            && self.peer.covers(&other.peer)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.access == other.access && self.signal == other.signal && self.peer == other.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(raw: &str) -> SignalRule {
        SignalRule::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_signal_rules() {
        for (raw, clean) in [
            ("signal,", "signal,"),
            ("signal (receive),", "signal receive,"),
            ("signal (send receive),", "signal (receive send),"),
            ("signal rw,", "signal rw,"),
            ("signal send set=(\"hup\"),", "signal send set=hup,"),
            ("signal (receive) set=kill,", "signal receive set=kill,"),
            ("signal w set=(quit int),", "signal w set=(int quit),"),
            ("signal receive peer=foo,", "signal receive peer=foo,"),
            ("signal wr set=(pipe, usr1) peer=/sbin/baz,", "signal wr set=(pipe usr1) peer=/sbin/baz,"),
        ] {
            let rule = signal(raw);
            assert_eq!(rule.get_raw(0), raw);
            assert_eq!(rule.get_clean(0), clean);
        }
    }

    #[test]
    fn test_invalid_signal_rules() {
        assert!(SignalRule::parse("signal set=(bogus),").unwrap_err().is_syntax());
        assert!(SignalRule::parse("signal fly,").is_err());
        assert!(SignalRule::parse("signal set=rtmin+33,").is_err());
        assert!(SignalRule::parse("signal set=rtmin+32,").is_ok());
    }

    #[test]
    fn test_new_rejects_unknown_access() {
        // 测试场景：代码构造时同样校验访问关键字，非法关键字不能被任何规则覆盖
        let bogus = BTreeSet::from(["bogus".to_string()]);
        let err = SignalRule::new(AllOr::Value(bogus), AllOr::All, AllOr::All, RuleBase::default()).unwrap_err();
        assert!(err.is_syntax());

        let send = BTreeSet::from(["send".to_string()]);
        let rule = SignalRule::new(AllOr::Value(send), AllOr::All, AllOr::All, RuleBase::default()).unwrap();
        assert_eq!(rule.get_clean(0), "signal send,");
        let empty = SignalRule::new(AllOr::Value(BTreeSet::new()), AllOr::All, AllOr::All, RuleBase::default());
        assert!(empty.unwrap_err().is_internal());
    }

    #[test]
    fn test_signal_coverage() {
        let rule = signal("signal send set=(hup kill term) peer=/usr/bin/*,");
        assert!(rule.is_covered(&signal("signal w set=kill peer=/usr/bin/foo,"), true, false));
        assert!(!rule.is_covered(&signal("signal receive set=kill peer=/usr/bin/foo,"), true, false));
        assert!(!rule.is_covered(&signal("signal send set=usr1 peer=/usr/bin/foo,"), true, false));
        assert!(!rule.is_covered(&signal("signal send,"), true, false));
        assert!(signal("signal rw,").is_covered(&signal("signal (send receive) set=hup,"), true, false));
    }
}
