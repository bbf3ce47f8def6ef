//! dbus/ptrace/signal/userns 规则主体的通用分词
//! 主体形如 `(send receive) key=value key=(a b) peer=(name=x label=y)`，条件顺序任意

use std::collections::BTreeSet;

use crate::aare::Pattern;
use crate::core::{quote_if_needed, AllOr};
use crate::error::{PolicyError, PolicyResult};

/// 条件取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondValue {
    Single(String),
    List(Vec<String>),
}

impl CondValue {
    pub fn items(&self) -> Vec<String> {
        match self {
            CondValue::Single(value) => vec![value.clone()],
            CondValue::List(items) => items.clone(),
        }
    }
}

/// 分词结果：访问关键字 + 条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details {
    pub access: Vec<String>,
    pub conds: Vec<(String, CondValue)>,
}

impl Details {
    /// 取出并移除一个条件；重复出现视为语法错误
    pub fn take(&mut self, key: &str) -> PolicyResult<Option<CondValue>> {
        let mut found = None;
        let mut rest = Vec::with_capacity(self.conds.len());
        for (k, v) in self.conds.drain(..) {
            if k == key {
                if found.is_some() {
                    return Err(PolicyError::syntax(format!("Duplicate '{}' condition", key)));
                }
                found = Some(v);
            } else {
                rest.push((k, v));
            }
        }
        self.conds = rest;
        Ok(found)
    }

    /// 所有已知条件取出后仍有剩余即为语法错误
    pub fn ensure_consumed(&self, rule_name: &str) -> PolicyResult<()> {
        match self.conds.first() {
            Some((key, _)) => Err(PolicyError::syntax(format!(
                "Unknown condition '{}' in {} rule",
                key, rule_name
            ))),
            None => Ok(()),
        }
    }
}

pub fn parse_details(text: &str) -> PolicyResult<Details> {
    let chars: Vec<char> = text.chars().collect();
    let mut details = Details::default();
    let mut i = 0;

    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        match chars[i] {
            '(' => {
                let (items, next) = read_group(&chars, i)?;
                details.access.extend(items);
                i = next;
            }
            ')' => return Err(PolicyError::syntax(format!("Unbalanced ')' in '{}'", text.trim()))),
            _ => {
                let (word, next) = read_token(&chars, i, &['=', '(', ')']);
                i = next;
                if chars.get(i) == Some(&'=') {
                    i += 1;
                    let value = if chars.get(i) == Some(&'(') {
                        let (items, next) = read_group(&chars, i)?;
                        i = next;
                        CondValue::List(items)
                    } else {
                        let (value, next) = read_token(&chars, i, &[]);
                        i = next;
                        if value.is_empty() {
                            return Err(PolicyError::syntax(format!("Missing value for '{}'", word)));
                        }
                        CondValue::Single(value)
                    };
                    details.conds.push((word, value));
                } else {
                    details.access.push(word);
                }
            }
        }
    }

    Ok(details)
}

/// 读取一个词，支持引号；遇到空白、逗号或额外终止符停止。返回值已去引号
fn read_token(chars: &[char], start: usize, stops: &[char]) -> (String, usize) {
    let mut out = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if c.is_whitespace() || c == ',' || stops.contains(&c) {
            break;
        }
        out.push(c);
        i += 1;
    }
    (out, i.min(chars.len()))
}

/// 读取 `( ... )` 分组，返回组内各项与 `)` 之后的位置
fn read_group(chars: &[char], start: usize) -> PolicyResult<(Vec<String>, usize)> {
    let mut items = Vec::new();
    let mut i = start + 1;
    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        match chars.get(i) {
            None => return Err(PolicyError::syntax("Unbalanced '(' in rule")),
            Some(')') => return Ok((items, i + 1)),
            Some(_) => {
                let (item, next) = read_token(chars, i, &[')']);
                if next == i {
                    return Err(PolicyError::syntax("Unexpected character in '(...)' list"));
                }
                items.push(item);
                i = next;
            }
        }
    }
}

/// 校验访问关键字；空列表表示 ALL
pub fn access_set(words: &[String], allowed: &[&str], rule_name: &str) -> PolicyResult<AllOr<BTreeSet<String>>> {
    if words.is_empty() {
        return Ok(AllOr::All);
    }
    let mut set = BTreeSet::new();
    for word in words {
        if !allowed.contains(&word.as_str()) {
            return Err(PolicyError::syntax(format!(
                "Invalid access '{}' in {} rule",
                word, rule_name
            )));
        }
        set.insert(word.clone());
    }
    Ok(AllOr::Value(set))
}

/// 条件值转换为模式（非路径）
pub fn pattern_value(value: Option<CondValue>, key: &str) -> PolicyResult<AllOr<Pattern>> {
    match value {
        None => Ok(AllOr::All),
        Some(CondValue::Single(v)) => Ok(AllOr::Value(Pattern::new(v, false)?)),
        Some(CondValue::List(_)) => Err(PolicyError::syntax(format!(
            "'{}' does not accept a list of values",
            key
        ))),
    }
}

/// 访问集合的规范输出：单个不加括号
pub fn write_access(access: &AllOr<BTreeSet<String>>) -> String {
    match access {
        AllOr::All => String::new(),
        AllOr::Value(set) if set.len() == 1 => format!(" {}", join(set)),
        AllOr::Value(set) => format!(" ({})", join(set)),
    }
}

/// `key=value` 条件的规范输出
pub fn write_pattern_cond(key: &str, value: &AllOr<Pattern>) -> String {
    match value {
        AllOr::All => String::new(),
        AllOr::Value(p) => format!(" {}={}", key, quote_if_needed(p.glob())),
    }
}

pub fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// 按蕴含关系展开后的集合覆盖
pub fn access_covers(
    mine: &AllOr<BTreeSet<String>>,
    theirs: &AllOr<BTreeSet<String>>,
    expand: fn(&str) -> &'static [&'static str],
) -> bool {
    match (mine, theirs) {
        (AllOr::All, _) => true,
        (AllOr::Value(_), AllOr::All) => false,
        (AllOr::Value(mine), AllOr::Value(theirs)) => {
            let granted: BTreeSet<&str> = mine.iter().flat_map(|a| expand(a).iter().copied()).collect();
            theirs
                .iter()
                .flat_map(|a| expand(a).iter().copied())
                .all(|a| granted.contains(a))
        }
    }
}
