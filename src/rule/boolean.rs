use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::re_eol;
use crate::core::{RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_BOOLEAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*(?P<varname>\$\{?\w+\}?)\s*=\s*(?P<value>(?i:true|false))\s*,?",
        re_eol!()
    ))
    .unwrap()
});

/// 布尔变量 `$foo = true`
#[derive(Debug, Clone)]
pub struct BooleanRule {
    base: RuleBase,
    pub varname: String,
    pub value: bool,
}

impl BooleanRule {
    pub fn new(varname: &str, value: bool, base: RuleBase) -> PolicyResult<Self> {
        base.forbid_modifiers("boolean")?;
        if !varname.starts_with('$') || varname.len() < 2 {
            return Err(PolicyError::syntax(format!("Invalid boolean variable name '{}'", varname)));
        }
        Ok(Self {
            base,
            varname: varname.to_string(),
            value,
        })
    }
}

impl RuleType for BooleanRule {
    const KIND: RuleKind = RuleKind::Boolean;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_BOOLEAN.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_BOOLEAN
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid boolean rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);
        let value = caps["value"].eq_ignore_ascii_case("true");
        Self::new(&caps["varname"], value, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        format!("{} = {}{}", self.varname, self.value, self.base.comment)
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.is_equal_local(other, false)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.varname == other.varname && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boolean_rules() {
        let rule = BooleanRule::parse("$foo = TRUE").unwrap();
        assert!(rule.value);
        assert_eq!(rule.get_clean(0), "$foo = true");
        assert_eq!(BooleanRule::parse("  ${bar}=false, # off").unwrap().get_clean(1), "  ${bar} = false # off");
        assert!(!BooleanRule::matches("$foo = maybe"));
    }

    #[test]
    fn test_boolean_coverage() {
        let yes = BooleanRule::parse("$foo = true").unwrap();
        assert!(yes.is_covered(&BooleanRule::parse("$foo=true").unwrap(), true, true));
        assert!(!yes.is_covered(&BooleanRule::parse("$foo = false").unwrap(), true, true));
    }
}
