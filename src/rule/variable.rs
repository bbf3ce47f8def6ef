use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::re_eol;
use crate::core::{quote_if_needed, strip_quotes, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*(?P<varname>@\{\w+\})\s*(?P<mode>\+?=)\s*(?P<values>@*.+?)\s*,?",
        re_eol!()
    ))
    .unwrap()
});

static RE_VARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^(("[^"]*")|([^"\s]+))\s*(.*)$"#).unwrap());

/// 赋值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableMode {
    /// `=` 定义
    Set,
    /// `+=` 追加
    Add,
}

impl VariableMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableMode::Set => "=",
            VariableMode::Add => "+=",
        }
    }
}

/// 拆分变量取值，支持引号包裹（含空格或空串）
pub fn separate_vars(text: &str) -> PolicyResult<BTreeSet<String>> {
    let mut values = BTreeSet::new();
    let mut rest = text.trim().to_string();

    loop {
        let (value, tail) = match RE_VARS.captures(&rest) {
            Some(caps) => (caps[1].to_string(), caps[4].trim().to_string()),
            None => break,
        };
        if value.ends_with(',') {
            return Err(PolicyError::syntax("Variable declarations do not accept trailing commas"));
        }
        values.insert(strip_quotes(&value).to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(PolicyError::syntax(format!(
            "Variable assignment contains invalid parts (unbalanced quotes?): {}",
            rest
        )));
    }
    Ok(values)
}

/// 变量赋值 `@{NAME} = v1 v2` / `@{NAME} += v3`
#[derive(Debug, Clone)]
pub struct VariableRule {
    base: RuleBase,
    pub varname: String,
    pub mode: VariableMode,
    pub values: BTreeSet<String>,
}

impl VariableRule {
    pub fn new(varname: &str, mode: VariableMode, values: BTreeSet<String>, base: RuleBase) -> PolicyResult<Self> {
        base.forbid_modifiers("variable")?;
        if !varname.starts_with("@{") || !varname.ends_with('}') {
            return Err(PolicyError::syntax(format!("Invalid variable name '{}'", varname)));
        }
        if values.is_empty() {
            return Err(PolicyError::syntax(format!("Empty value list for variable {}", varname)));
        }
        Ok(Self {
            base,
            varname: varname.to_string(),
            mode,
            values,
        })
    }
}

impl RuleType for VariableRule {
    const KIND: RuleKind = RuleKind::Variable;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_VARIABLE.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_VARIABLE
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid variable rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);
        let mode = if &caps["mode"] == "+=" {
            VariableMode::Add
        } else {
            VariableMode::Set
        };
        let values = separate_vars(&caps["values"])?;
        Self::new(&caps["varname"], mode, values, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let values: Vec<String> = self
            .values
            .iter()
            .map(|value| {
                if value.is_empty() {
                    "\"\"".to_string()
                } else {
                    quote_if_needed(value)
                }
            })
            .collect();
        format!(
            "{} {} {}{}",
            self.varname,
            self.mode.as_str(),
            values.join(" "),
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.varname == other.varname && self.mode == other.mode && other.values.is_subset(&self.values)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.varname == other.varname && self.mode == other.mode && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(raw: &str) -> VariableRule {
        VariableRule::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_variable_rules() {
        let rule = var("@{HOME} = @{HOMEDIRS}/*/ /root/");
        assert_eq!(rule.mode, VariableMode::Set);
        assert_eq!(rule.get_clean(0), "@{HOME} = /root/ @{HOMEDIRS}/*/");

        let add = var("  @{foo}+=\"/a b\" \"\" /c,  # more");
        assert_eq!(add.mode, VariableMode::Add);
        assert_eq!(add.get_clean(1), "  @{foo} += \"\" \"/a b\" /c # more");
    }

    #[test]
    fn test_invalid_variable_rules() {
        assert!(VariableRule::parse("@{foo} = /a, /b").unwrap_err().is_syntax());
        assert!(VariableRule::parse("@{foo} = \"/a").unwrap_err().is_syntax());
        assert!(!VariableRule::matches("@{foo}"));
        assert!(!VariableRule::matches("foo = bar"));
    }

    #[test]
    fn test_variable_coverage() {
        let rule = var("@{foo} = /a /b");
        assert!(rule.is_covered(&var("@{foo} = /a"), true, true));
        assert!(!rule.is_covered(&var("@{foo} += /a"), true, true));
        assert!(!rule.is_covered(&var("@{bar} = /a"), true, true));
    }
}
