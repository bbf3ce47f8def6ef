use super::DedupStats;
use crate::rule::{
    AbiRule, AliasRule, CapabilityRule, ChangeProfileRule, DbusRule, FileRule, IncludeRule, NetworkRule,
    OpaqueRule, PtraceRule, RlimitRule, RuleType, SignalRule, UserNamespaceRule,
};
use crate::error::{PolicyError, PolicyResult};

/// 同一类型规则的有序集合
/// 1. 插入顺序保留，用于原文输出
/// 2. 规范输出时 deny 组在前、allow 组在后，组内按规范文本排序
#[derive(Debug, Clone)]
pub struct Ruleset<R> {
    rules: Vec<R>,
}

impl<R> Default for Ruleset<R> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<R: RuleType> Ruleset<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: R) {
        self.rules.push(rule);
    }

    /// 删除所有与 rule 相等（非严格）的规则；一条都没有属于调用方错误
    pub fn delete(&mut self, rule: &R) -> PolicyResult<()> {
        let before = self.rules.len();
        self.rules.retain(|existing| !existing.is_equal(rule, false));
        if self.rules.len() == before {
            return Err(PolicyError::internal(format!(
                "Attempt to delete non-existing {} rule: {}",
                R::KIND,
                rule.get_clean(0)
            )));
        }
        Ok(())
    }

    /// 是否已有规则覆盖 rule
    pub fn is_covered(&self, rule: &R, check_allow_deny: bool, check_audit: bool) -> bool {
        self.rules
            .iter()
            .any(|existing| existing.is_covered(rule, check_allow_deny, check_audit))
    }

    /// 日志事件查询：请求是否已被某条规则决定（允许或拒绝）
    pub fn covers_any(&self, rule: &R) -> bool {
        self.is_covered(rule, false, false)
    }

    /// 删除被 include 片段或同集合其他规则覆盖的规则，返回删除数量
    pub fn delete_duplicates(&mut self, include_rules: Option<&Ruleset<R>>) -> usize {
        self.delete_duplicates_with_stats(include_rules).removed()
    }

    pub fn delete_duplicates_with_stats(&mut self, include_rules: Option<&Ruleset<R>>) -> DedupStats {
        let mut stats = DedupStats {
            total_before: self.rules.len(),
            ..DedupStats::default()
        };

        if let Some(include_rules) = include_rules {
            self.rules.retain(|rule| !include_rules.is_covered(rule, true, true));
            stats.removed_by_include = stats.total_before - self.rules.len();
        }

        // 正向一遍删除被前面规则覆盖的，反向一遍删除被后面规则覆盖的
        let after_include = self.rules.len();
        let forward = keep_uncovered(std::mem::take(&mut self.rules));
        let mut reversed = forward;
        reversed.reverse();
        let mut backward = keep_uncovered(reversed);
        backward.reverse();
        self.rules = backward;
        stats.removed_internal = after_include - self.rules.len();

        stats
    }

    /// 原文输出，非空时末尾追加空行
    pub fn get_raw(&self, depth: usize) -> Vec<String> {
        let mut lines: Vec<String> = self.rules.iter().map(|rule| rule.get_raw(depth)).collect();
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }

    /// 规范输出：deny 组、allow 组各自排序，每组以空行结束
    pub fn get_clean(&self, depth: usize) -> Vec<String> {
        let (mut deny, mut allow): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
        for rule in &self.rules {
            if rule.base().deny {
                deny.push(rule.get_clean(depth));
            } else {
                allow.push(rule.get_clean(depth));
            }
        }

        let mut lines = Vec::with_capacity(deny.len() + allow.len() + 2);
        for mut group in [deny, allow] {
            if group.is_empty() {
                continue;
            }
            group.sort();
            lines.extend(group);
            lines.push(String::new());
        }
        lines
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rules.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, R> {
        self.rules.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a, R: RuleType> IntoIterator for &'a Ruleset<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl<R: RuleType> FromIterator<R> for Ruleset<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// 保留未被已保留规则覆盖的规则（保持原顺序）
fn keep_uncovered<R: RuleType>(rules: Vec<R>) -> Vec<R> {
    let mut kept: Vec<R> = Vec::with_capacity(rules.len());
    for rule in rules {
        if !kept.iter().any(|existing| existing.is_covered(&rule, true, true)) {
            kept.push(rule);
        }
    }
    kept
}

pub type AbiRuleset = Ruleset<AbiRule>;
pub type AliasRuleset = Ruleset<AliasRule>;
pub type CapabilityRuleset = Ruleset<CapabilityRule>;
pub type ChangeProfileRuleset = Ruleset<ChangeProfileRule>;
pub type DbusRuleset = Ruleset<DbusRule>;
pub type FileRuleset = Ruleset<FileRule>;
pub type IncludeRuleset = Ruleset<IncludeRule>;
pub type NetworkRuleset = Ruleset<NetworkRule>;
pub type OpaqueRuleset = Ruleset<OpaqueRule>;
pub type PtraceRuleset = Ruleset<PtraceRule>;
pub type RlimitRuleset = Ruleset<RlimitRule>;
pub type SignalRuleset = Ruleset<SignalRule>;
pub type UserNamespaceRuleset = Ruleset<UserNamespaceRule>;

impl IncludeRuleset {
    /// 所有 include 展开后的文件列表（按书写顺序）
    pub fn get_all_full_paths(&self, profile_dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        self.rules
            .iter()
            .flat_map(|rule| rule.get_full_paths(profile_dir))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(lines: &[&str]) -> CapabilityRuleset {
        lines.iter().map(|line| CapabilityRule::parse(line).unwrap()).collect()
    }

    #[test]
    fn test_ruleset_raw_and_clean() {
        let ruleset = caps(&[
            "capability chown,",
            "  deny capability   sys_admin,",
            "audit capability audit_write,",
        ]);
        assert_eq!(
            ruleset.get_raw(1),
            vec![
                "  capability chown,",
                "  deny capability   sys_admin,",
                "  audit capability audit_write,",
                "",
            ]
        );
        assert_eq!(
            ruleset.get_clean(1),
            vec![
                "  deny capability sys_admin,",
                "",
                "  audit capability audit_write,",
                "  capability chown,",
                "",
            ]
        );
        assert!(Ruleset::<CapabilityRule>::new().get_clean(0).is_empty());
        assert!(Ruleset::<CapabilityRule>::new().get_raw(0).is_empty());
    }

    #[test]
    fn test_ruleset_delete() {
        let mut ruleset = caps(&["capability chown,", "capability sys_admin,"]);
        ruleset.delete(&CapabilityRule::parse("allow capability chown, # c").unwrap()).unwrap();
        assert_eq!(ruleset.len(), 1);
        assert!(ruleset
            .delete(&CapabilityRule::parse("capability chown,").unwrap())
            .unwrap_err()
            .is_internal());
    }

    #[test]
    fn test_ruleset_is_covered() {
        let ruleset = caps(&["capability chown,", "deny capability sys_admin,"]);
        let chown = CapabilityRule::parse("capability chown,").unwrap();
        let sys_admin = CapabilityRule::parse("capability sys_admin,").unwrap();
        assert!(ruleset.is_covered(&chown, true, false));
        assert!(!ruleset.is_covered(&sys_admin, true, false));
        assert!(ruleset.covers_any(&sys_admin));
    }

    #[test]
    fn test_delete_duplicates_internal() {
        // 测试场景：后出现的通用规则覆盖前面的具体规则，前面的具体规则覆盖后面的重复
        let mut ruleset = caps(&[
            "capability chown,",
            "capability chown,",
            "capability sys_admin,",
            "capability sys_admin chown,",
            "deny capability chown,",
        ]);
        assert_eq!(ruleset.delete_duplicates(None), 3);
        let clean: Vec<String> = ruleset.iter().map(|rule| rule.get_clean(0)).collect();
        assert_eq!(clean, vec!["capability chown sys_admin,", "deny capability chown,"]);
    }

    #[test]
    fn test_delete_duplicates_with_include() {
        let mut ruleset = caps(&["capability chown,", "capability sys_admin,", "audit capability kill,"]);
        let include = caps(&["capability chown kill,"]);
        let stats = ruleset.delete_duplicates_with_stats(Some(&include));
        assert_eq!(stats.removed_by_include, 1);
        assert_eq!(stats.removed_internal, 0);
        assert_eq!(ruleset.len(), 2);
    }
}
