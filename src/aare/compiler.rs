//! AARE 通配符 → 正则源码转换
//! 纯函数、确定性：同一输入两次转换得到完全相同的输出

/// `*`：不跨越 `/`；紧跟在 `/` 之后时至少匹配一个字符
const STAR: &str = r"(((?<=/)[^/\x00]+)|((?<!/)[^/\x00]*))";
/// `**`：可跨越 `/`；紧跟在 `/` 之后时至少匹配一个字符
const STAR_STAR: &str = r"(((?<=/)[^\x00]+)|((?<!/)[^\x00]*))";
/// `?`：单个字符，不能是 `/` 或 NUL
const ANY_CHAR: &str = r"[^/\x00]";

/// 花括号预扫描后每个字符的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BraceRole {
    Plain,
    Open,
    Close,
    Separator,
}

/// AppArmor 通配符转换为正则源码（带 `^`/`$` 锚点）
///
/// - `{a,b}` → `(a|b)`，支持嵌套；未闭合的 `{` 与多余的 `}` 按字面量处理
/// - `[...]` / `[^...]` 字符类与反斜杠转义原样透传
/// - `@{var}` 变量引用按字面量处理
pub fn convert_glob(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let roles = classify_braces(&chars);

    let mut out = String::with_capacity(glob.len() * 4 + 2);
    out.push('^');

    // 已经以 ^ 开头的表达式不再重复锚定
    let mut i = usize::from(chars.first() == Some(&'^'));

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some(&next) => push_literal(&mut out, next),
                    None => out.push_str(r"\\"),
                }
                i += 2;
                continue;
            }
            '[' => {
                if let Some(end) = class_end(&chars, i) {
                    push_class(&mut out, &chars[i..=end]);
                    i = end + 1;
                    continue;
                }
                out.push_str(r"\[");
            }
            '@' => {
                if let Some(end) = variable_end(&chars, i) {
                    for &ch in &chars[i..=end] {
                        push_literal(&mut out, ch);
                    }
                    i = end + 1;
                    continue;
                }
                out.push('@');
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    out.push_str(STAR_STAR);
                    i += 2;
                    continue;
                }
                out.push_str(STAR);
            }
            '?' => out.push_str(ANY_CHAR),
            '{' | '}' | ',' => match roles[i] {
                BraceRole::Open => out.push('('),
                BraceRole::Close => out.push(')'),
                BraceRole::Separator => out.push('|'),
                BraceRole::Plain => push_literal(&mut out, c),
            },
            _ => push_literal(&mut out, c),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// 字面量字符串转换为只匹配其自身的 AARE 通配符（日志事件中的路径）
pub fn escape_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() + 8);
    for c in literal.chars() {
        if matches!(
            c,
            '\\' | '*' | '?' | '[' | ']' | '{' | '}' | '"' | '!' | '(' | ')' | '^'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 预扫描花括号配对：栈顶 `{` 收集其内部（非嵌套层级）的逗号
fn classify_braces(chars: &[char]) -> Vec<BraceRole> {
    let mut roles = vec![BraceRole::Plain; chars.len()];
    let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut stray_close = 0usize;

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '[' => {
                if let Some(end) = class_end(chars, i) {
                    i = end + 1;
                    continue;
                }
            }
            '@' => {
                if let Some(end) = variable_end(chars, i) {
                    i = end + 1;
                    continue;
                }
            }
            '{' => stack.push((i, Vec::new())),
            ',' => {
                if let Some((_, separators)) = stack.last_mut() {
                    separators.push(i);
                }
            }
            '}' => match stack.pop() {
                Some((open, separators)) => {
                    roles[open] = BraceRole::Open;
                    roles[i] = BraceRole::Close;
                    for sep in separators {
                        roles[sep] = BraceRole::Separator;
                    }
                }
                None => stray_close += 1,
            },
            _ => {}
        }
        i += 1;
    }

    if !stack.is_empty() || stray_close > 0 {
        log::debug!(
            "Unbalanced braces in AARE treated as literals | unclosed: {} | stray: {} | glob: {}",
            stack.len(),
            stray_close,
            chars.iter().collect::<String>()
        );
    }

    roles
}

/// 字符类 `[...]` 的结束位置；首个 `]`（或 `^` 之后的首个 `]`）属于字符类内容
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j) == Some(&'^') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            ']' => return Some(j),
            _ => j += 1,
        }
    }
    None
}

/// `@{name}` 变量引用的结束位置（指向 `}`）
fn variable_end(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start + 1) != Some(&'{') {
        return None;
    }
    let mut j = start + 2;
    while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    (j > start + 2 && chars.get(j) == Some(&'}')).then_some(j)
}

fn push_literal(out: &mut String, c: char) {
    if matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
    ) {
        out.push('\\');
    }
    out.push(c);
}

/// 透传字符类；内部的 `[` 需转义，避免被宿主正则当作嵌套字符类
fn push_class(out: &mut String, class: &[char]) {
    out.push('[');
    let inner = &class[1..class.len() - 1];
    let mut k = 0;
    while k < inner.len() {
        match inner[k] {
            '\\' if k + 1 < inner.len() => {
                let next = inner[k + 1];
                if next.is_alphanumeric() {
                    out.push(next);
                } else {
                    out.push('\\');
                    out.push(next);
                }
                k += 2;
                continue;
            }
            '[' => out.push_str(r"\["),
            ch => out.push(ch),
        }
        k += 1;
    }
    out.push(']');
}
