//! 变量与布尔变量规则集：额外负责重复定义检查

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use super::Ruleset;
use crate::error::{PolicyError, PolicyResult};
use crate::rule::{BooleanRule, RuleType, VariableMode, VariableRule};

/// 合并后的变量视图：`=` 定义与 `+=` 追加分开记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedVariables {
    pub set: BTreeMap<String, BTreeSet<String>>,
    pub add: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct VariableRuleset {
    inner: Ruleset<VariableRule>,
}

impl VariableRuleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// `=` 重复定义同名变量是语法错误；`+=` 总是允许
    pub fn add(&mut self, rule: VariableRule) -> PolicyResult<()> {
        if rule.mode == VariableMode::Set && self.inner.iter().any(|known| known.varname == rule.varname) {
            return Err(PolicyError::syntax(format!(
                "Redefining existing variable {}: {}",
                rule.varname,
                rule.values.iter().cloned().collect::<Vec<_>>().join(" ")
            )));
        }
        self.inner.add(rule);
        Ok(())
    }

    pub fn delete(&mut self, rule: &VariableRule) -> PolicyResult<()> {
        self.inner.delete(rule)
    }

    pub fn delete_duplicates(&mut self, include_rules: Option<&Ruleset<VariableRule>>) -> usize {
        self.inner.delete_duplicates(include_rules)
    }

    /// 合并视图；跨文件的定义与追加在这里不做校验
    pub fn get_merged_variables(&self) -> MergedVariables {
        let mut merged = MergedVariables::default();
        for rule in self.inner.iter() {
            let target = match rule.mode {
                VariableMode::Set => &mut merged.set,
                VariableMode::Add => &mut merged.add,
            };
            target
                .entry(rule.varname.clone())
                .or_default()
                .extend(rule.values.iter().cloned());
        }
        merged
    }
}

impl Deref for VariableRuleset {
    type Target = Ruleset<VariableRule>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Default)]
pub struct BooleanRuleset {
    inner: Ruleset<BooleanRule>,
}

impl BooleanRuleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// 布尔变量不允许重复定义
    pub fn add(&mut self, rule: BooleanRule) -> PolicyResult<()> {
        if self.inner.iter().any(|known| known.varname == rule.varname) {
            return Err(PolicyError::syntax(format!(
                "Redefining existing boolean variable {}: {}",
                rule.varname,
                rule.get_clean(0)
            )));
        }
        self.inner.add(rule);
        Ok(())
    }

    pub fn get(&self, varname: &str) -> Option<bool> {
        self.inner
            .iter()
            .find(|rule| rule.varname == varname)
            .map(|rule| rule.value)
    }
}

impl Deref for BooleanRuleset {
    type Target = Ruleset<BooleanRule>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
