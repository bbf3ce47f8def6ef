//! 各规则语法共用的正则片段（宏形式，便于在 concat! 中拼接为 'static 字符串）

/// 行首空白 + 可选的 audit 与 allow/deny 修饰
macro_rules! re_audit_deny {
    () => {
        r"^\s*(?P<audit>audit\s+)?(?P<allow>allow\s+|deny\s+)?"
    };
}

/// 可选空白、可选行尾注释、可选空白、行尾
macro_rules! re_eol {
    () => {
        r"\s*(?P<comment>#.*?)?\s*$"
    };
}

/// 语句结束逗号 + 行尾
macro_rules! re_comma_eol {
    () => {
        concat!(r"\s*,", $crate::core::grammar::re_eol!())
    };
}

/// 路径或以变量开头的路径
macro_rules! re_path_or_var {
    () => {
        r#"(/\S*|"/[^"]*"|@\{\S+\}\S*|"@\{\S+\}[^"]*")"#
    };
}

/// profile 名称：无空格字符串或带引号字符串
macro_rules! re_profile_name {
    () => {
        r#"(\S+|"[^"]+")"#
    };
}

pub(crate) use {re_audit_deny, re_comma_eol, re_eol, re_path_or_var, re_profile_name};

/// 需要时为取值加引号（含空格）
pub fn quote_if_needed(value: &str) -> String {
    if value.contains(' ') {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// 去掉首尾配对的双引号
pub fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// 每层缩进两个空格
pub fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

/// 从捕获组中取出行尾注释，保留前导空格（" # foo"）
pub fn parse_comment(caps: &regex::Captures<'_>) -> String {
    caps.name("comment")
        .map(|m| format!(" {}", m.as_str()))
        .unwrap_or_default()
}
