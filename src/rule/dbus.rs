use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::details::{
    access_covers, access_set, parse_details, pattern_value, write_access, write_pattern_cond, CondValue, Details,
};
use super::RuleType;
use crate::aare::Pattern;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{quote_if_needed, AllOr, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_DBUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"dbus(?P<details>\s+.*?)?",
        re_comma_eol!()
    ))
    .unwrap()
});

pub const DBUS_ACCESS_KEYWORDS: &[&str] =
    &["send", "receive", "bind", "eavesdrop", "r", "read", "w", "write", "rw"];

fn expand_access(access: &str) -> &'static [&'static str] {
    match access {
        "r" | "read" | "receive" => &["receive"],
        "w" | "write" | "send" => &["send"],
        "rw" => &["receive", "send"],
        "bind" => &["bind"],
        "eavesdrop" => &["eavesdrop"],
        _ => &[],
    }
}

/// dbus 规则
/// bus 为普通字符串字段，其余条件均为 AARE 模式；对端由 `peer=(name=.. label=..)` 给出
#[derive(Debug, Clone)]
pub struct DbusRule {
    base: RuleBase,
    pub access: AllOr<BTreeSet<String>>,
    pub bus: AllOr<String>,
    pub path: AllOr<Pattern>,
    pub name: AllOr<Pattern>,
    pub interface: AllOr<Pattern>,
    pub member: AllOr<Pattern>,
    pub peer_name: AllOr<Pattern>,
    pub peer_label: AllOr<Pattern>,
}

/// 构造参数，未给出的条件为 ALL
#[derive(Debug, Clone)]
pub struct DbusConds {
    pub bus: AllOr<String>,
    pub path: AllOr<Pattern>,
    pub name: AllOr<Pattern>,
    pub interface: AllOr<Pattern>,
    pub member: AllOr<Pattern>,
    pub peer_name: AllOr<Pattern>,
    pub peer_label: AllOr<Pattern>,
}

impl Default for DbusConds {
    fn default() -> Self {
        Self {
            bus: AllOr::All,
            path: AllOr::All,
            name: AllOr::All,
            interface: AllOr::All,
            member: AllOr::All,
            peer_name: AllOr::All,
            peer_label: AllOr::All,
        }
    }
}

impl DbusRule {
    pub fn new(access: AllOr<BTreeSet<String>>, conds: DbusConds, base: RuleBase) -> PolicyResult<Self> {
        if let AllOr::Value(set) = &access {
            if set.is_empty() {
                return Err(PolicyError::internal("Empty dbus access set"));
            }
            let words: Vec<String> = set.iter().cloned().collect();
            access_set(&words, DBUS_ACCESS_KEYWORDS, "dbus")?;
        }
        // bind 只涉及本端名称，不能与对端条件同时出现
        let binds_only = access.value().is_some_and(|set| set.iter().all(|a| a == "bind"));
        if binds_only && (!conds.peer_name.is_all() || !conds.peer_label.is_all()) {
            return Err(PolicyError::syntax("dbus 'bind' access cannot be combined with a peer"));
        }
        Ok(Self {
            base,
            access,
            bus: conds.bus,
            path: conds.path,
            name: conds.name,
            interface: conds.interface,
            member: conds.member,
            peer_name: conds.peer_name,
            peer_label: conds.peer_label,
        })
    }
}

fn parse_peer(value: Option<CondValue>) -> PolicyResult<(AllOr<Pattern>, AllOr<Pattern>)> {
    let items = match value {
        None => return Ok((AllOr::All, AllOr::All)),
        Some(CondValue::Single(item)) => vec![item],
        Some(CondValue::List(items)) => items,
    };
    let mut peer = Details::default();
    for item in items {
        match item.split_once('=') {
            Some((key, value)) if !value.is_empty() => {
                peer.conds.push((key.to_string(), CondValue::Single(value.to_string())))
            }
            _ => return Err(PolicyError::syntax(format!("Invalid dbus peer condition '{}'", item))),
        }
    }
    let name = pattern_value(peer.take("name")?, "name")?;
    let label = pattern_value(peer.take("label")?, "label")?;
    peer.ensure_consumed("dbus peer")?;
    Ok((name, label))
}

impl RuleType for DbusRule {
    const KIND: RuleKind = RuleKind::Dbus;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_DBUS.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_DBUS
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid dbus rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        let mut details = parse_details(caps.name("details").map_or("", |m| m.as_str()))?;
        let access = access_set(&details.access, DBUS_ACCESS_KEYWORDS, "dbus")?;
        let bus = match details.take("bus")? {
            None => AllOr::All,
            Some(CondValue::Single(bus)) => AllOr::Value(bus),
            Some(CondValue::List(_)) => {
                return Err(PolicyError::syntax("'bus' does not accept a list of values"))
            }
        };
        let path = pattern_value(details.take("path")?, "path")?;
        let name = pattern_value(details.take("name")?, "name")?;
        let interface = pattern_value(details.take("interface")?, "interface")?;
        let member = pattern_value(details.take("member")?, "member")?;
        let (peer_name, peer_label) = parse_peer(details.take("peer")?)?;
        details.ensure_consumed("dbus")?;

        let conds = DbusConds {
            bus,
            path,
            name,
            interface,
            member,
            peer_name,
            peer_label,
        };
        Self::new(access, conds, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let mut out = format!("{}dbus{}", self.base.modifiers_str(), write_access(&self.access));
        if let AllOr::Value(bus) = &self.bus {
            out.push_str(&format!(" bus={}", quote_if_needed(bus)));
        }
        out.push_str(&write_pattern_cond("path", &self.path));
        out.push_str(&write_pattern_cond("name", &self.name));
        out.push_str(&write_pattern_cond("interface", &self.interface));
        out.push_str(&write_pattern_cond("member", &self.member));

        let peer = format!(
            "{}{}",
            write_pattern_cond("name", &self.peer_name),
            write_pattern_cond("label", &self.peer_label)
        );
        if !peer.is_empty() {
            out.push_str(&format!(" peer=({})", peer.trim_start()));
        }

        out.push(',');
        out.push_str(&self.base.comment);
        out
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        access_covers(&self.access, &other.access, expand_access)
            && self.bus.covers(&other.bus)
            && self.path.covers(&other.path)
            && self.name.covers(&other.name)
            && self.interface.covers(&other.interface)
            && self.member.covers(&other.member)
            && self.peer_name.covers(&other.peer_name)
            && self.peer_label.covers(&other.peer_label)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.access == other.access
            && self.bus == other.bus
            && self.path == other.path
            && self.name == other.name
            && self.interface == other.interface
            && self.member == other.member
            && self.peer_name == other.peer_name
            && self.peer_label == other.peer_label
    }
}
