use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::re_comma_eol;
use crate::core::{quote_if_needed, strip_quotes, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^\s*alias\s+(?P<orig_path>"??.+?"??)\s+->\s*(?P<target>"??.+?"??)"#,
        re_comma_eol!()
    ))
    .unwrap()
});

/// alias 规则：路径重写 `alias /orig -> /target,`
#[derive(Debug, Clone)]
pub struct AliasRule {
    base: RuleBase,
    pub orig_path: String,
    pub target: String,
}

impl AliasRule {
    pub fn new(orig_path: &str, target: &str, base: RuleBase) -> PolicyResult<Self> {
        base.forbid_modifiers("alias")?;
        for (kind, path) in [("Alias path", orig_path), ("Alias target", target)] {
            if path.is_empty() {
                return Err(PolicyError::internal(format!("{} is empty", kind)));
            }
            if !path.starts_with('/') {
                return Err(PolicyError::syntax(format!(
                    "{} doesn't start with '/': {}",
                    kind, path
                )));
            }
        }
        Ok(Self {
            base,
            orig_path: orig_path.to_string(),
            target: target.to_string(),
        })
    }
}

impl RuleType for AliasRule {
    const KIND: RuleKind = RuleKind::Alias;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_ALIAS.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_ALIAS
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid alias rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);
        Self::new(
            strip_quotes(&caps["orig_path"]),
            strip_quotes(&caps["target"]),
            base,
        )
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        format!(
            "alias {} -> {},{}",
            quote_if_needed(&self.orig_path),
            quote_if_needed(&self.target),
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.is_equal_local(other, false)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.orig_path == other.orig_path && self.target == other.target
    }
}
