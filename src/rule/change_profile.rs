use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::aare::Pattern;
use crate::core::grammar::{re_audit_deny, re_comma_eol, re_path_or_var, re_profile_name};
use crate::core::{quote_if_needed, strip_quotes, AllOr, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_CHANGE_PROFILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"change_profile",
        r"(\s+(?P<execmode>safe|unsafe))?",
        r"(\s+(?P<execcond>",
        re_path_or_var!(),
        r"))?",
        r"(\s+->\s*(?P<target>",
        re_profile_name!(),
        r"))?",
        re_comma_eol!()
    ))
    .unwrap()
});

/// exec 模式：safe 会清理环境变量，unsafe 保留
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Safe,
    Unsafe,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::Safe => "safe",
            ExecMode::Unsafe => "unsafe",
        }
    }
}

/// change_profile 规则：可选 exec 模式 + exec 条件路径 + 目标 profile
#[derive(Debug, Clone)]
pub struct ChangeProfileRule {
    base: RuleBase,
    pub execmode: Option<ExecMode>,
    pub execcond: AllOr<Pattern>,
    pub target: AllOr<Pattern>,
}

impl ChangeProfileRule {
    pub fn new(
        execmode: Option<ExecMode>,
        execcond: AllOr<Pattern>,
        target: AllOr<Pattern>,
        base: RuleBase,
    ) -> PolicyResult<Self> {
        if execmode.is_some() && execcond.is_all() {
            return Err(PolicyError::syntax("change_profile exec mode requires an exec condition"));
        }
        if let AllOr::Value(cond) = &execcond {
            if !cond.glob().starts_with('/') && !cond.glob().starts_with('@') {
                return Err(PolicyError::syntax(format!(
                    "Exec condition '{}' must start with '/' or '@'",
                    cond
                )));
            }
        }
        Ok(Self {
            base,
            execmode,
            execcond,
            target,
        })
    }
}

impl RuleType for ChangeProfileRule {
    const KIND: RuleKind = RuleKind::ChangeProfile;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_CHANGE_PROFILE.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_CHANGE_PROFILE
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid change_profile rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        let execmode = match caps.name("execmode").map(|m| m.as_str()) {
            Some("safe") => Some(ExecMode::Safe),
            Some("unsafe") => Some(ExecMode::Unsafe),
            _ => None,
        };
        let execcond = match caps.name("execcond") {
            Some(m) => AllOr::Value(Pattern::new(strip_quotes(m.as_str()), true)?),
            None => AllOr::All,
        };
        let target = match caps.name("target") {
            Some(m) => AllOr::Value(Pattern::new(strip_quotes(m.as_str()), false)?),
            None => AllOr::All,
        };

        Self::new(execmode, execcond, target, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let mut out = format!("{}change_profile", self.base.modifiers_str());
        if let Some(mode) = self.execmode {
            out.push(' ');
            out.push_str(mode.as_str());
        }
        if let AllOr::Value(cond) = &self.execcond {
            out.push(' ');
            out.push_str(&quote_if_needed(cond.glob()));
        }
        if let AllOr::Value(target) = &self.target {
            out.push_str(" -> ");
            out.push_str(&quote_if_needed(target.glob()));
        }
        out.push(',');
        out.push_str(&self.base.comment);
        out
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.execmode == other.execmode && self.execcond.covers(&other.execcond) && self.target.covers(&other.target)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.execmode == other.execmode && self.execcond == other.execcond && self.target == other.target
    }
}
