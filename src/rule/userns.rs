use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::details::{access_set, write_access};
use super::RuleType;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{AllOr, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_USERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"userns(?P<details>\s+.*?)?",
        re_comma_eol!()
    ))
    .unwrap()
});

pub const USERNS_ACCESS_KEYWORDS: &[&str] = &["create"];

/// userns 规则
#[derive(Debug, Clone)]
pub struct UserNamespaceRule {
    base: RuleBase,
    pub access: AllOr<BTreeSet<String>>,
}

impl UserNamespaceRule {
    pub fn new(access: AllOr<BTreeSet<String>>, base: RuleBase) -> PolicyResult<Self> {
        if let AllOr::Value(set) = &access {
            if set.is_empty() {
                return Err(PolicyError::internal("Empty userns access set"));
            }
            let words: Vec<String> = set.iter().cloned().collect();
            access_set(&words, USERNS_ACCESS_KEYWORDS, "userns")?;
        }
        Ok(Self { base, access })
    }
}

impl RuleType for UserNamespaceRule {
    const KIND: RuleKind = RuleKind::UserNamespace;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_USERNS.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_USERNS
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid userns rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        let words: Vec<String> = caps
            .name("details")
            .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let access = access_set(&words, USERNS_ACCESS_KEYWORDS, "userns")?;
        Self::new(access, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        format!(
            "{}userns{},{}",
            self.base.modifiers_str(),
            write_access(&self.access),
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.access.covers(&other.access)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.access == other.access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_userns_rules() {
        let all = UserNamespaceRule::parse("userns,").unwrap();
        assert!(all.access.is_all());
        let create = UserNamespaceRule::parse("deny userns create, # no").unwrap();
        assert_eq!(create.get_clean(0), "deny userns create, # no");
        assert!(UserNamespaceRule::parse("userns destroy,").unwrap_err().is_syntax());
    }

    #[test]
    fn test_new_rejects_unknown_access() {
        let bogus = BTreeSet::from(["bogus".to_string()]);
        assert!(UserNamespaceRule::new(AllOr::Value(bogus), RuleBase::default())
            .unwrap_err()
            .is_syntax());
        let create = BTreeSet::from(["create".to_string()]);
        assert!(UserNamespaceRule::new(AllOr::Value(create), RuleBase::default()).is_ok());
    }

    #[test]
    fn test_userns_coverage() {
        let all = UserNamespaceRule::parse("userns,").unwrap();
        let create = UserNamespaceRule::parse("userns create,").unwrap();
        assert!(all.is_covered(&create, true, false));
        assert!(!create.is_covered(&all, true, false));
    }
}
