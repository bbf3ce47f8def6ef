use std::fmt::{self, Write};

// ======================== 日志预览 ========================
/// 策略语句的日志预览：连续空白折叠为一个空格，超出 `max_chars` 时截断并追加省略号
/// 返回实现 Display 的视图，格式化时才遍历原文
#[inline]
pub fn preview_compact(line: &str, max_chars: usize) -> impl fmt::Display + '_ {
    struct StatementPreview<'a> {
        line: &'a str,
        max_chars: usize,
    }

    impl fmt::Display for StatementPreview<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut written = 0;
            let mut pending_space = false;

            for ch in self.line.trim().chars() {
                if ch.is_whitespace() {
                    pending_space = true;
                    continue;
                }
                let needed = if pending_space { 2 } else { 1 };
                if written + needed > self.max_chars {
                    return f.write_char('…');
                }
                if pending_space {
                    f.write_char(' ')?;
                    pending_space = false;
                }
                f.write_char(ch)?;
                written += needed;
            }
            Ok(())
        }
    }

    StatementPreview { line, max_chars }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_folds_whitespace() {
        assert_eq!(preview_compact("  /foo   r,\t # x ", 80).to_string(), "/foo r, # x");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview_compact("capability sys_admin,", 10).to_string(), "capability…");
        assert_eq!(preview_compact("abc", 3).to_string(), "abc");
    }
}
