//! 源文件级数据：preamble 与文件中定义的 profile
use super::scope::{ProfileScope, ScopeRules};
use crate::error::{PolicyError, PolicyResult};
use crate::rule::Rule;
use crate::ruleset::{AbiRuleset, AliasRuleset, BooleanRuleset, DedupStats, IncludeRuleset, VariableRuleset};

/// 文件中 profile 之外的语句（abi、alias、变量、include），由该文件内所有 profile 共享
#[derive(Debug, Clone, Default)]
pub struct Preamble {
    pub abi: AbiRuleset,
    pub alias: AliasRuleset,
    pub variable: VariableRuleset,
    pub boolean: BooleanRuleset,
    pub include: IncludeRuleset,
}

impl Preamble {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只接受可以出现在 profile 之外的类型
    pub fn add(&mut self, rule: Rule) -> PolicyResult<()> {
        match rule {
            Rule::Abi(rule) => self.abi.add(rule),
            Rule::Alias(rule) => self.alias.add(rule),
            Rule::Variable(rule) => self.variable.add(rule)?,
            Rule::Boolean(rule) => self.boolean.add(rule)?,
            Rule::Include(rule) => self.include.add(rule),
            other => {
                return Err(PolicyError::syntax(format!(
                    "Unexpected {} rule outside of a profile: {}",
                    other.kind(),
                    other.get_clean(0)
                )))
            }
        }
        Ok(())
    }

    /// 文件内去重（不跨文件）
    pub fn delete_duplicates(&mut self) -> DedupStats {
        let mut stats = DedupStats::default();
        stats.merge(&self.abi.delete_duplicates_with_stats(None));
        stats.merge(&self.alias.delete_duplicates_with_stats(None));
        stats.merge(&self.include.delete_duplicates_with_stats(None));
        let before = self.variable.len();
        let removed = self.variable.delete_duplicates(None);
        stats.merge(&DedupStats {
            total_before: before,
            removed_by_include: 0,
            removed_internal: removed,
        });
        stats
    }

    pub fn get_raw(&self, depth: usize) -> Vec<String> {
        let mut lines = self.abi.get_raw(depth);
        lines.extend(self.alias.get_raw(depth));
        lines.extend(self.variable.get_raw(depth));
        lines.extend(self.boolean.get_raw(depth));
        lines.extend(self.include.get_raw(depth));
        lines
    }

    pub fn get_clean(&self, depth: usize) -> Vec<String> {
        let mut lines = self.abi.get_clean(depth);
        lines.extend(self.alias.get_clean(depth));
        lines.extend(self.variable.get_clean(depth));
        lines.extend(self.boolean.get_clean(depth));
        lines.extend(self.include.get_clean(depth));
        lines
    }

    pub fn len(&self) -> usize {
        self.abi.len() + self.alias.len() + self.variable.len() + self.boolean.len() + self.include.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 一个源文件：preamble 加上其中定义的顶层 profile 名称
#[derive(Debug, Clone, Default)]
pub struct ProfileFile {
    pub filename: String,
    pub preamble: Preamble,
    /// 按出现顺序
    pub profiles: Vec<String>,
}

impl ProfileFile {
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            ..Self::default()
        }
    }
}

/// 单次解析结果：文件信息 + 顶层作用域树
#[derive(Debug, Clone, Default)]
pub struct ParsedProfiles {
    pub file: ProfileFile,
    pub profiles: Vec<ProfileScope>,
}

impl ParsedProfiles {
    pub fn get(&self, name: &str) -> Option<&ProfileScope> {
        self.profiles.iter().find(|scope| scope.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ProfileScope> {
        self.profiles.iter_mut().find(|scope| scope.name == name)
    }

    /// 整个文件的规范输出：preamble 后依次输出每个 profile，profile 之间空一行
    pub fn get_clean(&self) -> Vec<String> {
        self.render(self.file.preamble.get_clean(0), ProfileScope::get_clean)
    }

    pub fn get_raw(&self) -> Vec<String> {
        self.render(self.file.preamble.get_raw(0), ProfileScope::get_raw)
    }

    fn render(&self, mut lines: Vec<String>, scope_lines: fn(&ProfileScope, usize) -> Vec<String>) -> Vec<String> {
        for (index, scope) in self.profiles.iter().enumerate() {
            if index > 0 {
                lines.push(String::new());
            }
            lines.extend(scope_lines(scope, 0));
        }
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines
    }
}

/// include 片段：单作用域解析结果
#[derive(Debug, Clone, Default)]
pub struct IncludeFragment {
    /// 片段中的变量、alias 等
    pub file: ProfileFile,
    pub rules: ScopeRules,
}

impl IncludeFragment {
    pub fn get_clean(&self, depth: usize) -> Vec<String> {
        let mut lines = self.file.preamble.get_clean(depth);
        lines.extend(self.rules.get_clean(depth));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(line: &str) -> Rule {
        Rule::parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_preamble_routing_and_order() {
        let mut preamble = Preamble::new();
        preamble.add(rule("include <tunables/global>")).unwrap();
        preamble.add(rule("@{x} = /a")).unwrap();
        preamble.add(rule("abi <abi/3.0>,")).unwrap();
        assert!(preamble.add(rule("capability,")).unwrap_err().is_syntax());
        assert!(preamble.add(rule("@{x} = /b")).unwrap_err().is_syntax());
        assert_eq!(
            preamble.get_clean(0),
            vec!["abi <abi/3.0>,", "", "@{x} = /a", "", "include <tunables/global>", ""]
        );
    }

    #[test]
    fn test_preamble_dedup() {
        let mut preamble = Preamble::new();
        preamble.add(rule("include <tunables/global>")).unwrap();
        preamble.add(rule("include if exists <tunables/global>")).unwrap();
        preamble.add(rule("alias /a -> /b,")).unwrap();
        preamble.add(rule("alias /a -> /b,")).unwrap();
        let stats = preamble.delete_duplicates();
        assert_eq!(stats.removed(), 2);
        assert_eq!(preamble.len(), 2);
    }
}
