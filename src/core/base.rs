use regex::Captures;

use super::grammar::parse_comment;
use crate::error::{PolicyError, PolicyResult};

/// 规则原文缓存
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Text {
    /// 解析后未修改过的原始语句（已去除首尾空白）
    Pristine(String),
    /// 发生过语义修改，读取原文时回退到规范形式
    #[default]
    Stale,
}

/// 规则来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    /// 解析自策略文本或由代码直接构造
    #[default]
    Policy,
    /// 由日志事件合成
    LogEvent,
}

/// 所有规则类型共享的公共属性
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleBase {
    pub audit: bool,
    pub deny: bool,
    pub allow_keyword: bool,
    /// 行尾注释，保留前导空格（" # foo"）
    pub comment: String,
    pub raw: Text,
    pub origin: Origin,
}

impl RuleBase {
    /// 代码构造：deny 与 allow 关键字互斥
    pub fn new(audit: bool, deny: bool, allow_keyword: bool, comment: &str) -> PolicyResult<Self> {
        if deny && allow_keyword {
            return Err(PolicyError::internal(
                "Rule cannot be both 'deny' and 'allow'",
            ));
        }
        Ok(Self {
            audit,
            deny,
            allow_keyword,
            comment: comment.to_string(),
            raw: Text::Stale,
            origin: Origin::Policy,
        })
    }

    /// 无 audit/deny 的规则类型（include、alias、变量等）
    pub fn plain(comment: &str) -> Self {
        Self {
            comment: comment.to_string(),
            ..Self::default()
        }
    }

    /// 从语法正则的捕获组读取修饰符与注释，并记录原文
    pub fn from_captures(caps: &Captures<'_>, raw: &str) -> Self {
        let audit = caps.name("audit").is_some();
        let (deny, allow_keyword) = match caps.name("allow").map(|m| m.as_str().trim()) {
            Some("deny") => (true, false),
            Some("allow") => (false, true),
            _ => (false, false),
        };
        Self {
            audit,
            deny,
            allow_keyword,
            comment: parse_comment(caps),
            raw: Text::Pristine(raw.trim().to_string()),
            origin: Origin::Policy,
        }
    }

    /// 拒绝带审计/拒绝修饰符的规则类型调用
    pub fn forbid_modifiers(&self, rule_name: &str) -> PolicyResult<()> {
        if self.audit || self.deny || self.allow_keyword {
            return Err(PolicyError::syntax(format!(
                "{} rules cannot use 'audit', 'allow' or 'deny'",
                rule_name
            )));
        }
        Ok(())
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// 规范形式中的修饰符前缀
    pub fn modifiers_str(&self) -> String {
        let mut out = String::new();
        if self.audit {
            out.push_str("audit ");
        }
        if self.deny {
            out.push_str("deny ");
        } else if self.allow_keyword {
            out.push_str("allow ");
        }
        out
    }

    pub fn mark_stale(&mut self) {
        self.raw = Text::Stale;
    }

    /// 修饰符层面的覆盖判定
    pub fn is_covered(&self, other: &RuleBase, check_allow_deny: bool, check_audit: bool) -> bool {
        if check_allow_deny && self.deny != other.deny {
            return false;
        }
        if other.deny && !self.deny {
            return false;
        }
        if check_audit && self.audit != other.audit {
            return false;
        }
        if other.audit && !self.audit {
            return false;
        }
        true
    }

    /// 修饰符层面的相等判定；strict 额外比较 allow 关键字、注释与原文
    pub fn is_equal(&self, other: &RuleBase, strict: bool) -> bool {
        if self.audit != other.audit || self.deny != other.deny {
            return false;
        }
        if strict
            && (self.allow_keyword != other.allow_keyword
                || self.comment != other.comment
                || self.raw != other.raw)
        {
            return false;
        }
        true
    }
}
