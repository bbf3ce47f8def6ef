use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use fancy_regex::Regex;
use once_cell::sync::OnceCell;

use super::compiler::{convert_glob, escape_literal};
use crate::error::{PolicyError, PolicyResult};

/// AARE 模式
/// 1. 相等性按通配符源码比较，而非正则语言等价
/// 2. 首次匹配时编译正则并缓存在 OnceCell 中
/// 3. 由日志事件构造的模式额外保留原始字面量，覆盖判定时用它代替源码
#[derive(Debug, Clone)]
pub struct Pattern {
    glob: String,
    literal: Option<String>,
    compiled: OnceCell<Option<Regex>>,
}

impl Pattern {
    /// 从策略文本构造；`is_path` 为 true 时必须以 `/` 或变量引用开头
    pub fn new(glob: impl Into<String>, is_path: bool) -> PolicyResult<Self> {
        let glob = glob.into();
        if glob.is_empty() {
            return Err(PolicyError::syntax("Empty AARE pattern"));
        }
        if is_path && !glob.starts_with('/') && !glob.starts_with('@') {
            return Err(PolicyError::syntax(format!(
                "Pattern '{}' doesn't start with '/' or a variable",
                glob
            )));
        }
        Ok(Self {
            glob,
            literal: None,
            compiled: OnceCell::new(),
        })
    }

    /// 从日志事件中的字面量构造（通配符元字符全部转义）
    pub fn from_log_event(literal: impl Into<String>, is_path: bool) -> PolicyResult<Self> {
        let literal = literal.into();
        let mut pattern = Self::new(escape_literal(&literal), is_path)?;
        pattern.literal = Some(literal);
        Ok(pattern)
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    pub fn literal(&self) -> Option<&str> {
        self.literal.as_deref()
    }

    /// 转换后的正则源码（调试/日志用）
    pub fn regex_source(&self) -> String {
        convert_glob(&self.glob)
    }

    /// 懒加载编译；编译失败记录告警并视为永不匹配
    fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| {
                let source = convert_glob(&self.glob);
                match Regex::new(&source) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        log::warn!(
                            "AARE compilation failed: glob={} regex={} error={}",
                            self.glob,
                            source,
                            e
                        );
                        None
                    }
                }
            })
            .as_ref()
    }

    /// 以锚定方式匹配一个普通字符串
    pub fn matches(&self, text: &str) -> bool {
        self.regex()
            .map(|re| re.is_match(text).unwrap_or(false))
            .unwrap_or(false)
    }

    /// 本模式是否覆盖 other：源码相同，或本模式匹配 other 的字面量（无字面量时用其源码）
    pub fn covers(&self, other: &Pattern) -> bool {
        if self.glob == other.glob {
            return true;
        }
        self.matches(other.literal().unwrap_or(&other.glob))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

impl Eq for Pattern {}

impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.glob.hash(state);
    }
}

impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.glob.cmp(&other.glob)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.glob)
    }
}
