use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_OPAQUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"(?P<keyword>mount|remount|umount|unmount|pivot_root|unix)",
        r"(?P<details>\s+[^#]*?)?",
        re_comma_eol!()
    ))
    .unwrap()
});

/// 暂不做语义建模的规则（mount/remount/umount/pivot_root/unix）
/// 主体按原文保存（空白折叠），覆盖判定退化为相等判定
#[derive(Debug, Clone)]
pub struct OpaqueRule {
    base: RuleBase,
    pub keyword: String,
    pub details: String,
}

impl OpaqueRule {
    pub fn new(keyword: &str, details: &str, base: RuleBase) -> Self {
        Self {
            base,
            keyword: keyword.to_string(),
            details: details.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}

impl RuleType for OpaqueRule {
    const KIND: RuleKind = RuleKind::Opaque;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_OPAQUE.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_OPAQUE
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);
        Ok(Self::new(
            &caps["keyword"],
            caps.name("details").map_or("", |m| m.as_str()),
            base,
        ))
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let details = if self.details.is_empty() {
            String::new()
        } else {
            format!(" {}", self.details)
        };
        format!(
            "{}{}{},{}",
            self.base.modifiers_str(),
            self.keyword,
            details,
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.is_equal_local(other, false)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.keyword == other.keyword && self.details == other.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opaque_rules() {
        let mount = OpaqueRule::parse("  mount  fstype=proc   -> /proc/ ,").unwrap();
        assert_eq!(mount.keyword, "mount");
        assert_eq!(mount.get_clean(0), "mount fstype=proc -> /proc/,");
        assert_eq!(OpaqueRule::parse("deny unix, # x").unwrap().get_clean(0), "deny unix, # x");
        assert!(OpaqueRule::matches("pivot_root oldroot=/mnt/ /new/,"));
        assert!(!OpaqueRule::matches("mounted /foo r,"));
    }

    #[test]
    fn test_opaque_coverage_is_equality() {
        let a = OpaqueRule::parse("umount /mnt/,").unwrap();
        assert!(a.is_covered(&OpaqueRule::parse("umount   /mnt/ ,").unwrap(), true, false));
        assert!(!a.is_covered(&OpaqueRule::parse("umount /mnt/**,").unwrap(), true, false));
    }
}
