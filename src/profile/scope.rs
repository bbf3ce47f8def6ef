//! profile / 子 profile / hat 作用域
//! 1. 每种规则类型一个有序规则集，按固定顺序输出
//! 2. 子作用域按名称排序，嵌套最多两层
use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::aare::Pattern;
use crate::core::{indent, quote_if_needed};
use crate::error::{PolicyError, PolicyResult};
use crate::rule::Rule;
use crate::ruleset::{
    CapabilityRuleset, ChangeProfileRuleset, DbusRuleset, DedupStats, FileRuleset, IncludeRuleset, NetworkRuleset,
    OpaqueRuleset, PtraceRuleset, RlimitRuleset, SignalRuleset, UserNamespaceRuleset,
};

static RE_FLAG_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,]+").unwrap());

/// 已知的 profile 标志；带取值的标志（`error=`、`kill.signal=` 等）按前缀识别
pub const PROFILE_FLAGS: &[&str] = &[
    "attach_disconnected",
    "audit",
    "chroot_attach",
    "chroot_no_attach",
    "chroot_relative",
    "complain",
    "debug",
    "default_allow",
    "delegate_deleted",
    "enforce",
    "interruptible",
    "kill",
    "mediate_deleted",
    "namespace_relative",
    "no_attach_disconnected",
    "prompt",
    "unconfined",
];

const VALUED_FLAG_PREFIXES: &[&str] = &["attach_disconnected.path=", "error=", "kill.signal="];

/// 拆分 flags 文本（逗号或空白分隔），结果去重排序；未知标志只告警
pub fn split_flags(text: &str) -> BTreeSet<String> {
    let flags: BTreeSet<String> = RE_FLAG_SPLIT
        .split(text.trim())
        .filter(|flag| !flag.is_empty())
        .map(str::to_string)
        .collect();

    for flag in &flags {
        let known = PROFILE_FLAGS.contains(&flag.as_str())
            || VALUED_FLAG_PREFIXES.iter().any(|prefix| flag.starts_with(prefix));
        if !known {
            log::warn!("Unknown profile flag | flag: {}", flag);
        }
    }
    flags
}

// ===== 作用域内的规则集 =====

macro_rules! scope_rulesets {
    ($($field:ident: $ty:ident => $variant:ident),* $(,)?) => {
        /// 作用域内按类型划分的规则集（字段顺序即输出顺序）
        #[derive(Debug, Clone, Default)]
        pub struct ScopeRules {
            $(pub $field: $ty,)*
        }

        impl ScopeRules {
            pub fn new() -> Self {
                Self::default()
            }

            /// 按类型放入对应规则集；只能出现在 profile 之外的类型返回语法错误
            pub fn add(&mut self, rule: Rule) -> PolicyResult<()> {
                match rule {
                    $(Rule::$variant(rule) => self.$field.add(rule),)*
                    other => {
                        return Err(PolicyError::syntax(format!(
                            "Unexpected {} rule inside a profile: {}",
                            other.kind(),
                            other.get_clean(0)
                        )))
                    }
                }
                Ok(())
            }

            /// 是否已有同类型规则覆盖 rule
            pub fn is_covered(&self, rule: &Rule, check_allow_deny: bool, check_audit: bool) -> bool {
                match rule {
                    $(Rule::$variant(rule) => self.$field.is_covered(rule, check_allow_deny, check_audit),)*
                    _ => false,
                }
            }

            /// 追加另一个作用域的全部规则（汇总 include 片段时使用）
            pub fn merge(&mut self, other: &ScopeRules) {
                $(
                    for rule in other.$field.iter() {
                        self.$field.add(rule.clone());
                    }
                )*
            }

            /// 逐类型删除被 include 片段或同类规则覆盖的规则
            pub fn delete_duplicates(&mut self, include_rules: Option<&ScopeRules>) -> DedupStats {
                let mut stats = DedupStats::default();
                $(
                    stats.merge(
                        &self
                            .$field
                            .delete_duplicates_with_stats(include_rules.map(|included| &included.$field)),
                    );
                )*
                stats
            }

            pub fn get_raw(&self, depth: usize) -> Vec<String> {
                let mut lines = Vec::new();
                $(lines.extend(self.$field.get_raw(depth));)*
                lines
            }

            pub fn get_clean(&self, depth: usize) -> Vec<String> {
                let mut lines = Vec::new();
                $(lines.extend(self.$field.get_clean(depth));)*
                lines
            }

            pub fn len(&self) -> usize {
                0 $(+ self.$field.len())*
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }
        }
    };
}

scope_rulesets!(
    include: IncludeRuleset => Include,
    rlimit: RlimitRuleset => Rlimit,
    capability: CapabilityRuleset => Capability,
    network: NetworkRuleset => Network,
    dbus: DbusRuleset => Dbus,
    opaque: OpaqueRuleset => Opaque,
    signal: SignalRuleset => Signal,
    ptrace: PtraceRuleset => Ptrace,
    userns: UserNamespaceRuleset => UserNamespace,
    file: FileRuleset => File,
    change_profile: ChangeProfileRuleset => ChangeProfile,
);

// ===== 作用域 =====

/// 作用域类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// 顶层 profile
    Profile,
    /// `profile NAME {` 形式的子 profile
    Child,
    /// `^NAME {` / `hat NAME {` 形式的 hat
    Hat,
}

/// 一个 profile 或 hat
#[derive(Debug, Clone)]
pub struct ProfileScope {
    pub name: String,
    pub attachment: Option<Pattern>,
    pub flags: BTreeSet<String>,
    /// `xattrs=(...)` 括号内的原文
    pub xattrs: Option<String>,
    pub kind: ScopeKind,
    /// 头部是否写了 `profile` 关键字
    pub profile_keyword: bool,
    /// 在父 profile 之外以 `parent//name` 形式定义
    pub external: bool,
    pub parent: Option<String>,
    pub filename: String,
    /// 头部之前的注释行
    pub initial_comment: Vec<String>,
    /// 头部行尾注释，保留前导空格
    pub header_comment: String,
    pub rules: ScopeRules,
    pub children: BTreeMap<String, ProfileScope>,
}

impl ProfileScope {
    pub fn new(name: &str, kind: ScopeKind, filename: &str) -> Self {
        Self {
            name: name.to_string(),
            attachment: None,
            flags: BTreeSet::new(),
            xattrs: None,
            kind,
            profile_keyword: kind == ScopeKind::Child,
            external: false,
            parent: None,
            filename: filename.to_string(),
            initial_comment: Vec::new(),
            header_comment: String::new(),
            rules: ScopeRules::default(),
            children: BTreeMap::new(),
        }
    }

    /// 完整名称：子作用域为 `parent//name`
    pub fn full_name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}//{}", parent, self.name),
            None => self.name.clone(),
        }
    }

    pub fn add_flag(&mut self, flag: &str) {
        self.flags.extend(split_flags(flag));
    }

    pub fn remove_flag(&mut self, flag: &str) {
        for flag in split_flags(flag) {
            self.flags.remove(&flag);
        }
    }

    pub fn add_rule(&mut self, rule: Rule) -> PolicyResult<()> {
        self.rules.add(rule)
    }

    /// 添加子作用域；嵌套超过两层或重名属于语法错误
    pub fn add_child(&mut self, mut child: ProfileScope) -> PolicyResult<()> {
        if self.kind != ScopeKind::Profile {
            return Err(PolicyError::syntax(format!(
                "A child profile inside another child profile is not allowed: {}//{}",
                self.full_name(),
                child.name
            )));
        }
        if self.children.contains_key(&child.name) {
            return Err(PolicyError::syntax(format!(
                "Multiple definitions for hat {} in profile {}",
                child.name, self.name
            )));
        }
        child.parent = Some(self.name.clone());
        self.children.insert(child.name.clone(), child);
        Ok(())
    }

    /// 补齐缺失的 hat（空作用域）
    pub fn ensure_hat(&mut self, name: &str) -> bool {
        if self.children.contains_key(name) {
            return false;
        }
        let mut hat = ProfileScope::new(name, ScopeKind::Hat, &self.filename);
        hat.parent = Some(self.name.clone());
        self.children.insert(name.to_string(), hat);
        true
    }

    /// 删除被 include 片段或同作用域规则覆盖的规则（不含子作用域）
    pub fn delete_duplicates(&mut self, include_rules: Option<&ScopeRules>) -> DedupStats {
        let stats = self.rules.delete_duplicates(include_rules);
        stats.print_stats(&self.full_name());
        stats
    }

    /// 头部行
    pub fn get_header(&self, depth: usize) -> String {
        let mut header = indent(depth);
        let name = if self.external {
            quote_if_needed(&self.full_name())
        } else {
            quote_if_needed(&self.name)
        };

        match self.kind {
            ScopeKind::Hat if !self.external && !self.profile_keyword => {
                header.push('^');
                header.push_str(&name);
            }
            _ => {
                let plain_path = name.starts_with('/') && self.kind == ScopeKind::Profile;
                if self.profile_keyword || self.attachment.is_some() || !plain_path {
                    header.push_str("profile ");
                }
                header.push_str(&name);
                if let Some(attachment) = &self.attachment {
                    header.push(' ');
                    header.push_str(&quote_if_needed(attachment.glob()));
                }
            }
        }

        if let Some(xattrs) = &self.xattrs {
            header.push_str(&format!(" xattrs=({})", xattrs));
        }
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(String::as_str).collect();
            header.push_str(&format!(" flags=({})", flags.join(", ")));
        }
        header.push_str(" {");
        header.push_str(&self.header_comment);
        header
    }

    pub fn get_clean(&self, depth: usize) -> Vec<String> {
        self.render(depth, |rules, depth| rules.get_clean(depth), |scope, depth| scope.get_clean(depth))
    }

    pub fn get_raw(&self, depth: usize) -> Vec<String> {
        self.render(depth, |rules, depth| rules.get_raw(depth), |scope, depth| scope.get_raw(depth))
    }

    /// 注释、头部、规则、内嵌子作用域、`}`，之后是外部定义的子作用域
    fn render(
        &self,
        depth: usize,
        body: impl Fn(&ScopeRules, usize) -> Vec<String>,
        nested: impl Fn(&ProfileScope, usize) -> Vec<String>,
    ) -> Vec<String> {
        let mut lines: Vec<String> = self
            .initial_comment
            .iter()
            .map(|comment| format!("{}{}", indent(depth), comment))
            .collect();
        lines.push(self.get_header(depth));
        let body_start = lines.len();
        lines.extend(body(&self.rules, depth + 1));

        for child in self.children.values().filter(|child| !child.external) {
            if lines.len() > body_start && lines.last().is_some_and(|line| !line.is_empty()) {
                lines.push(String::new());
            }
            lines.extend(nested(child, depth + 1));
        }

        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.push(format!("{}}}", indent(depth)));

        for child in self.children.values().filter(|child| child.external) {
            lines.push(String::new());
            lines.extend(nested(child, depth));
        }
        lines
    }
}
