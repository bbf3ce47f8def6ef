use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::re_comma_eol;
use crate::core::{RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_RLIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*set\s+rlimit\s+(?P<rlimit>[a-z]+)\s*<=\s*(?P<value>[^ ,]+(\s+[a-zA-Z]+)?)",
        re_comma_eol!()
    ))
    .unwrap()
});

static RE_NUMBER_UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<number>[0-9]+)\s*(?P<unit>[a-zA-Z]*)$").unwrap());

pub const RLIMIT_SIZE: &[&str] = &["fsize", "data", "stack", "core", "rss", "as", "memlock", "msgqueue"];
pub const RLIMIT_NUMBER: &[&str] = &["ofile", "nofile", "locks", "sigpending", "nproc", "rtprio"];
pub const RLIMIT_TIME: &[&str] = &["cpu", "rttime"];
pub const RLIMIT_NICE: &[&str] = &["nice"];

/// 有效取值（统一换算到最小单位，便于比较）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitValue {
    Infinity,
    Amount(u64),
    Nice(i8),
}

fn size_factor(unit: &str) -> Option<u64> {
    match unit {
        "" => Some(1),
        "K" | "KB" => Some(1 << 10),
        "M" | "MB" => Some(1 << 20),
        "G" | "GB" => Some(1 << 30),
        _ => None,
    }
}

/// 时间统一换算到微秒
fn time_factor(unit: &str) -> Option<u64> {
    match unit {
        "us" => Some(1),
        "ms" => Some(1_000),
        "" | "s" | "sec" | "seconds" => Some(1_000_000),
        "min" | "minutes" => Some(60_000_000),
        "h" | "hours" => Some(3_600_000_000),
        "d" | "days" => Some(86_400_000_000),
        "week" | "weeks" => Some(604_800_000_000),
        _ => None,
    }
}

fn parse_value(rlimit: &str, value: &str) -> PolicyResult<RlimitValue> {
    let invalid = || PolicyError::syntax(format!("Invalid value '{}' for rlimit {}", value, rlimit));

    if value == "infinity" {
        return Ok(RlimitValue::Infinity);
    }
    if RLIMIT_NICE.contains(&rlimit) {
        let nice: i8 = value.parse().map_err(|_| invalid())?;
        if !(-20..=19).contains(&nice) {
            return Err(invalid());
        }
        return Ok(RlimitValue::Nice(nice));
    }

    let caps = RE_NUMBER_UNIT.captures(value).ok_or_else(invalid)?;
    let number: u64 = caps["number"].parse().map_err(|_| invalid())?;
    let unit = &caps["unit"];
    let factor = if RLIMIT_SIZE.contains(&rlimit) {
        size_factor(unit)
    } else if RLIMIT_TIME.contains(&rlimit) {
        // rttime 默认单位为微秒
        if unit.is_empty() && rlimit == "rttime" {
            Some(1)
        } else {
            time_factor(unit)
        }
    } else if unit.is_empty() {
        Some(1)
    } else {
        None
    };
    let factor = factor.ok_or_else(invalid)?;
    number.checked_mul(factor).map(RlimitValue::Amount).ok_or_else(invalid)
}

/// rlimit 规则：`set rlimit RES <= VALUE,`，不支持 audit/deny
#[derive(Debug, Clone)]
pub struct RlimitRule {
    base: RuleBase,
    pub rlimit: String,
    /// 原始书写形式
    pub value: String,
    value_parsed: RlimitValue,
}

impl RlimitRule {
    pub fn new(rlimit: &str, value: &str, base: RuleBase) -> PolicyResult<Self> {
        base.forbid_modifiers("rlimit")?;
        let known = [RLIMIT_SIZE, RLIMIT_NUMBER, RLIMIT_TIME, RLIMIT_NICE]
            .iter()
            .any(|group| group.contains(&rlimit));
        if !known {
            return Err(PolicyError::syntax(format!("Unknown rlimit keyword '{}'", rlimit)));
        }
        let value = value.trim();
        let value_parsed = parse_value(rlimit, value)?;
        Ok(Self {
            base,
            rlimit: rlimit.to_string(),
            value: value.to_string(),
            value_parsed,
        })
    }

    pub fn value_parsed(&self) -> RlimitValue {
        self.value_parsed
    }
}

impl RuleType for RlimitRule {
    const KIND: RuleKind = RuleKind::Rlimit;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_RLIMIT.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_RLIMIT
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid rlimit rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);
        Self::new(&caps["rlimit"], &caps["value"], base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        format!("set rlimit {} <= {},{}", self.rlimit, self.value, self.base.comment)
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        if self.rlimit != other.rlimit {
            return false;
        }
        match (self.value_parsed, other.value_parsed) {
            (RlimitValue::Infinity, _) => true,
            (_, RlimitValue::Infinity) => false,
            // nice 数值越小优先级越高，较低的上限覆盖较高的请求
            (RlimitValue::Nice(mine), RlimitValue::Nice(theirs)) => mine <= theirs,
            (RlimitValue::Amount(mine), RlimitValue::Amount(theirs)) => theirs <= mine,
            _ => false,
        }
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.rlimit == other.rlimit && self.value_parsed == other.value_parsed
    }
}
