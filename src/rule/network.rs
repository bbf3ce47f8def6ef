use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::core::grammar::{re_audit_deny, re_comma_eol};
use crate::core::{AllOr, RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_NETWORK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"network(?P<details>\s+.*?)?",
        re_comma_eol!()
    ))
    .unwrap()
});

pub const NETWORK_DOMAIN_KEYWORDS: &[&str] = &[
    "unspec", "unix", "inet", "ax25", "ipx", "appletalk", "netrom", "bridge", "atmpvc", "x25",
    "inet6", "rose", "netbeui", "security", "key", "netlink", "packet", "ash", "econet",
    "atmsvc", "rds", "sna", "irda", "pppox", "wanpipe", "llc", "ib", "mpls", "can", "tipc",
    "bluetooth", "iucv", "rxrpc", "isdn", "phonet", "ieee802154", "caif", "alg", "nfc",
    "vsock", "kcm", "qipcrtr", "smc", "xdp", "mctp",
];

pub const NETWORK_TYPE_KEYWORDS: &[&str] = &["stream", "dgram", "seqpacket", "rdm", "raw", "packet"];

pub const NETWORK_PROTOCOL_KEYWORDS: &[&str] = &["tcp", "udp", "icmp"];

/// network 规则：地址族 + 套接字类型（或协议），各自可为 ALL
#[derive(Debug, Clone)]
pub struct NetworkRule {
    base: RuleBase,
    pub domain: AllOr<String>,
    pub type_or_protocol: AllOr<String>,
}

impl NetworkRule {
    pub fn new(domain: AllOr<String>, type_or_protocol: AllOr<String>, base: RuleBase) -> PolicyResult<Self> {
        if let AllOr::Value(d) = &domain {
            if !NETWORK_DOMAIN_KEYWORDS.contains(&d.as_str()) {
                return Err(PolicyError::syntax(format!("Unknown network domain '{}'", d)));
            }
        }
        if let AllOr::Value(t) = &type_or_protocol {
            if !is_type_or_protocol(t) {
                return Err(PolicyError::syntax(format!(
                    "Unknown network type or protocol '{}'",
                    t
                )));
            }
        }
        Ok(Self {
            base,
            domain,
            type_or_protocol,
        })
    }
}

fn is_type_or_protocol(word: &str) -> bool {
    NETWORK_TYPE_KEYWORDS.contains(&word) || NETWORK_PROTOCOL_KEYWORDS.contains(&word)
}

impl RuleType for NetworkRule {
    const KIND: RuleKind = RuleKind::Network;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_NETWORK.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_NETWORK
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid network rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);

        let words: Vec<&str> = caps
            .name("details")
            .map(|m| m.as_str().split_whitespace().collect())
            .unwrap_or_default();

        // 单个关键字既可能是地址族，也可能是类型/协议（"network packet," 按地址族处理）
        let (domain, type_or_protocol) = match words.as_slice() {
            [] => (AllOr::All, AllOr::All),
            [one] if NETWORK_DOMAIN_KEYWORDS.contains(one) => (AllOr::Value(one.to_string()), AllOr::All),
            [one] if is_type_or_protocol(one) => (AllOr::All, AllOr::Value(one.to_string())),
            [domain, kind] => (AllOr::Value(domain.to_string()), AllOr::Value(kind.to_string())),
            _ => {
                return Err(PolicyError::syntax(format!(
                    "Invalid or unknown keywords in 'network {}'",
                    words.join(" ")
                )))
            }
        };

        Self::new(domain, type_or_protocol, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let mut details = String::new();
        if let AllOr::Value(domain) = &self.domain {
            details.push(' ');
            details.push_str(domain);
        }
        if let AllOr::Value(kind) = &self.type_or_protocol {
            details.push(' ');
            details.push_str(kind);
        }
        format!(
            "{}network{},{}",
            self.base.modifiers_str(),
            details,
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        self.domain.covers(&other.domain) && self.type_or_protocol.covers(&other.type_or_protocol)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.domain == other.domain && self.type_or_protocol == other.type_or_protocol
    }
}
