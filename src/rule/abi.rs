use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::re_comma_eol;
use crate::core::{RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_ABI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*#?abi(?P<ifexists>\s+if\s+exists)?",
        r#"\s*(<(?P<magicpath>[^>]*)>|"(?P<quotedpath>[^"]*)")"#,
        re_comma_eol!()
    ))
    .unwrap()
});

/// abi 声明：`abi <abi/3.0>,`
#[derive(Debug, Clone)]
pub struct AbiRule {
    base: RuleBase,
    pub path: String,
    pub ismagic: bool,
}

impl AbiRule {
    pub fn new(path: &str, ismagic: bool, base: RuleBase) -> PolicyResult<Self> {
        base.forbid_modifiers("abi")?;
        if path.is_empty() {
            return Err(PolicyError::syntax("Empty abi path"));
        }
        Ok(Self {
            base,
            path: path.to_string(),
            ismagic,
        })
    }
}

impl RuleType for AbiRule {
    const KIND: RuleKind = RuleKind::Abi;

    fn matches(raw: &str) -> bool {
        RE_ABI.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_ABI
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid abi rule '{}'", raw.trim())))?;
        if caps.name("ifexists").is_some() {
            return Err(PolicyError::syntax("abi rules do not support 'if exists'"));
        }
        let base = RuleBase::from_captures(&caps, raw);
        match (caps.name("magicpath"), caps.name("quotedpath")) {
            (Some(path), _) => Self::new(path.as_str().trim(), true, base),
            (None, Some(path)) => Self::new(path.as_str(), false, base),
            (None, None) => Err(PolicyError::syntax(format!("Invalid abi rule '{}'", raw.trim()))),
        }
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        if self.ismagic {
            format!("abi <{}>,{}", self.path, self.base.comment)
        } else {
            format!("abi \"{}\",{}", self.path, self.base.comment)
        }
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.is_equal_local(other, false)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.path == other.path && self.ismagic == other.ismagic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_abi_rules() {
        let magic = AbiRule::parse("abi <abi/3.0>,").unwrap();
        assert!(magic.ismagic);
        assert_eq!(magic.get_clean(0), "abi <abi/3.0>,");
        let quoted = AbiRule::parse("  #abi \"abi/4.0\" ,   # new").unwrap();
        assert_eq!(quoted.get_clean(0), "abi \"abi/4.0\", # new");
        assert_eq!(quoted.get_raw(0), "#abi \"abi/4.0\" ,   # new");
    }

    #[test]
    fn test_invalid_abi_rules() {
        assert!(AbiRule::parse("abi if exists <abi/3.0>,").unwrap_err().is_syntax());
        assert!(AbiRule::parse("abi <>,").unwrap_err().is_syntax());
        assert!(!AbiRule::matches("abi <abi/3.0>"));
        assert!(!AbiRule::matches("abi abi/3.0,"));
    }

    #[test]
    fn test_abi_coverage() {
        let abi = AbiRule::parse("abi <abi/3.0>,").unwrap();
        assert!(abi.is_covered(&AbiRule::parse("abi <abi/3.0>, # dup").unwrap(), true, true));
        assert!(!abi.is_covered(&AbiRule::parse("abi \"abi/3.0\",").unwrap(), true, true));
    }
}
