use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::details::{access_covers, access_set, parse_details, pattern_value, write_access, write_pattern_cond};
use super::RuleType;
use crate::aare::Pattern;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{AllOr, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_PTRACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"ptrace(?P<details>\s+.*?)?",
        re_comma_eol!()
    ))
    .unwrap()
});

pub const PTRACE_ACCESS_KEYWORDS: &[&str] =
    &["r", "w", "rw", "wr", "read", "write", "readby", "trace", "tracedby"];

/// 访问关键字展开：w 等价 trace，trace 隐含 read，tracedby 隐含 readby
fn expand_access(access: &str) -> &'static [&'static str] {
    match access {
        "r" | "read" => &["read"],
        "w" | "write" | "trace" | "rw" | "wr" => &["read", "trace"],
        "readby" => &["readby"],
        "tracedby" => &["readby", "tracedby"],
        _ => &[],
    }
}

/// ptrace 规则：访问集合 + 对端 profile 模式
#[derive(Debug, Clone)]
pub struct PtraceRule {
    base: RuleBase,
    pub access: AllOr<BTreeSet<String>>,
    pub peer: AllOr<Pattern>,
}

impl PtraceRule {
    pub fn new(access: AllOr<BTreeSet<String>>, peer: AllOr<Pattern>, base: RuleBase) -> PolicyResult<Self> {
        if let AllOr::Value(set) = &access {
            if set.is_empty() {
                return Err(PolicyError::internal("Empty ptrace access set"));
            }
            let words: Vec<String> = set.iter().cloned().collect();
            access_set(&words, PTRACE_ACCESS_KEYWORDS, "ptrace")?;
        }
        Ok(Self { base, access, peer })
    }
}

impl RuleType for PtraceRule {
    const KIND: RuleKind = RuleKind::Ptrace;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_PTRACE.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_PTRACE
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid ptrace rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        let mut details = parse_details(caps.name("details").map_or("", |m| m.as_str()))?;
        let access = access_set(&details.access, PTRACE_ACCESS_KEYWORDS, "ptrace")?;
        let peer = pattern_value(details.take("peer")?, "peer")?;
        details.ensure_consumed("ptrace")?;

        Self::new(access, peer, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        format!(
            "{}ptrace{}{},{}",
            self.base.modifiers_str(),
            write_access(&self.access),
            write_pattern_cond("peer", &self.peer),
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        access_covers(&self.access, &other.access, expand_access) && self.peer.covers(&other.peer)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.access == other.access && self.peer == other.peer
    }
}
