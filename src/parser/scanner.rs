//! 逐行扫描的 profile 状态机
//! 1. 作用域栈为空即 OUTSIDE，深度 1 为顶层 profile，深度 2 为子 profile / hat
//! 2. 没有真正结束逗号的行缓存起来与下一行拼接
//! 3. 条件块（`if ... {`）按花括号深度整体跳过
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::context::ParseContext;
use crate::aare::Pattern;
use crate::core::grammar::{parse_comment, re_comma_eol, re_eol};
use crate::core::{strip_quotes, RuleKind};
use crate::error::{PolicyError, PolicyResult};
use crate::profile::{split_flags, ParsedProfiles, ProfileFile, ProfileScope, ScopeKind, ScopeRules};
use crate::rule::Rule;
use crate::utils::preview_compact;

static RE_PROFILE_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^\s*(?:(?P<plainname>"/[^"]*"|/\S*?)|profile\s+(?P<namedprofile>"[^"]+"|[^\s"{]+))"#,
        r#"(?:\s+(?P<attachment>"[/@][^"]*"|[/@][^\s{]*))?"#,
        r"(?:\s+xattrs=\((?P<xattrs>[^)]*)\))?",
        r"(?:\s+(?:flags=)?\((?P<flags>[^)]*)\))?",
        r"\s*\{",
        re_eol!()
    ))
    .unwrap()
});

static RE_PROFILE_HAT_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"^\s*(?:\^|hat\s+)(?P<hat>"[^"]+"|[^\s"{]+)"#,
        r"(?:\s+(?:flags=)?\((?P<flags>[^)]*)\))?",
        r"\s*\{",
        re_eol!()
    ))
    .unwrap()
});

static RE_PROFILE_END: Lazy<Regex> = Lazy::new(|| Regex::new(concat!(r"^\s*\}", re_eol!())).unwrap());

static RE_PROFILE_CHANGE_HAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(concat!(r#"^\s*\^(?P<hat>"[^"]+"|[^\s",]+)"#, re_comma_eol!())).unwrap());

static RE_CONDITIONAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*if\s+(?:not\s+)?(?:defined\s+)?[@$]\{?\w+\}?\s*\{",
        re_eol!()
    ))
    .unwrap()
});

static RE_CONDITIONAL_ELSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(concat!(r"^\s*\}\s*else(?:\s+if\s+.*?)?\s*\{", re_eol!())).unwrap());

static RE_OPENS_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*(#.*)?$").unwrap());

static RE_RULE_HAS_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^([^#"]|"[^"]*")*,\s*(#.*)?$"#).unwrap());

static RE_HAS_COMMENT_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?P<not_comment>([^#"]|"[^"]*")*)(?P<comment>#.*)$"#).unwrap());

/// 扫描模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanMode {
    /// 普通 profile 文件
    Profile,
    /// include 片段：整个文件视为单一作用域
    Include,
}

/// 单次扫描的全部可变状态
pub(crate) struct Scanner {
    mode: ScanMode,
    filename: String,
    file: ProfileFile,
    roots: Vec<ProfileScope>,
    stack: Vec<ProfileScope>,
    /// include 模式下的规则
    fragment_rules: ScopeRules,
    /// profile 之前累积的注释，消费语句后清空
    comments: Vec<String>,
    /// 未结束的语句及其起始行号
    pending: Option<(String, usize)>,
    /// 正在跳过的条件块深度
    skip_depth: usize,
    last_line: usize,
}

impl Scanner {
    pub(crate) fn new(mode: ScanMode, filename: &str) -> Self {
        Self {
            mode,
            filename: filename.to_string(),
            file: ProfileFile::new(filename),
            roots: Vec::new(),
            stack: Vec::new(),
            fragment_rules: ScopeRules::default(),
            comments: Vec::new(),
            pending: None,
            skip_depth: 0,
            last_line: 0,
        }
    }

    /// 扫描全部文本；错误带上文件名与行号
    pub(crate) fn scan(&mut self, ctx: &mut ParseContext, text: &str) -> PolicyResult<()> {
        for (index, raw_line) in text.lines().enumerate() {
            let lineno = index + 1;
            self.last_line = lineno;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (line, start) = match self.pending.take() {
                Some((previous, start)) => (format!("{} {}", previous, trimmed), start),
                None => (trimmed.to_string(), lineno),
            };
            self.step(ctx, &line, start)
                .map_err(|e| e.located(&self.filename, lineno))?;
        }
        self.finish()
    }

    fn finish(&mut self) -> PolicyResult<()> {
        if let Some((statement, start)) = self.pending.take() {
            return Err(PolicyError::syntax(format!(
                "Unterminated statement (missing ','?): {}",
                preview_compact(&statement, 80)
            ))
            .located(&self.filename, start));
        }
        if self.skip_depth > 0 {
            return Err(PolicyError::syntax("Reached end of file inside a conditional block")
                .located(&self.filename, self.last_line));
        }
        if let Some(scope) = self.stack.last() {
            return Err(PolicyError::syntax(format!(
                "Missing '}}' or ','. Reached end of file while inside profile {}",
                scope.full_name()
            ))
            .located(&self.filename, self.last_line));
        }
        Ok(())
    }

    fn step(&mut self, ctx: &mut ParseContext, line: &str, start: usize) -> PolicyResult<()> {
        if self.skip_depth > 0 {
            self.skip_conditional(line);
            return Ok(());
        }

        if let Some(caps) = RE_PROFILE_START.captures(line) {
            return self.open_profile(&caps);
        }
        if let Some(caps) = RE_PROFILE_HAT_DEF.captures(line) {
            return self.open_hat(&caps);
        }
        if RE_PROFILE_END.is_match(line) {
            return self.close_scope(ctx);
        }
        if RE_CONDITIONAL.is_match(line) {
            self.skip_depth = 1;
            return Ok(());
        }
        if RE_CONDITIONAL_ELSE.is_match(line) {
            return Err(PolicyError::syntax("Unexpected 'else' outside of a conditional block"));
        }
        if let Some(caps) = RE_PROFILE_CHANGE_HAT.captures(line) {
            if self.stack.is_empty() && self.mode == ScanMode::Profile {
                return Err(PolicyError::syntax("Unexpected change hat declaration outside of a profile"));
            }
            log::warn!(
                "Ignoring no longer supported change hat declaration | hat: ^{} | file: {} | line: {}",
                &caps["hat"],
                self.filename,
                start
            );
            return Ok(());
        }
        if line.starts_with('#') && !Rule::kind_matches(RuleKind::Include, line) {
            self.add_comment(line);
            return Ok(());
        }

        match Rule::parse_line(line) {
            Some(parsed) => {
                let rule = parsed?;
                log::trace!(
                    "Statement parsed | kind: {} | line: {}",
                    rule.kind(),
                    preview_compact(line, 80)
                );
                self.comments.clear();
                self.place(ctx, rule)
            }
            None if !RE_RULE_HAS_COMMA.is_match(line) => {
                let statement = match RE_HAS_COMMENT_SPLIT.captures(line) {
                    Some(caps) => caps["not_comment"].trim_end().to_string(),
                    None => line.to_string(),
                };
                self.pending = Some((statement, start));
                Ok(())
            }
            None => Err(PolicyError::syntax(format!(
                "Unknown line found: {}",
                preview_compact(line, 120)
            ))),
        }
    }

    /// 条件块内：只追踪花括号深度
    fn skip_conditional(&mut self, line: &str) {
        if line.starts_with('#') || RE_CONDITIONAL_ELSE.is_match(line) {
            return;
        }
        if RE_PROFILE_END.is_match(line) {
            self.skip_depth -= 1;
            if self.skip_depth == 0 {
                log::debug!("Conditional block skipped | file: {}", self.filename);
            }
        } else if RE_OPENS_BLOCK.is_match(line) {
            self.skip_depth += 1;
        }
    }

    /// 只有顶层 profile 之前的注释会被保留
    fn add_comment(&mut self, line: &str) {
        if self.mode == ScanMode::Include || !self.stack.is_empty() {
            return;
        }
        if line.starts_with("# Last Modified:") {
            return;
        }
        self.comments.push(line.to_string());
    }

    fn open_profile(&mut self, caps: &Captures<'_>) -> PolicyResult<()> {
        if self.mode == ScanMode::Include {
            return Err(PolicyError::syntax("Unexpected profile definition in an include file"));
        }
        let profile_keyword = caps.name("namedprofile").is_some();
        let name = caps
            .name("namedprofile")
            .or_else(|| caps.name("plainname"))
            .map(|m| strip_quotes(m.as_str()).to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(PolicyError::syntax("Empty profile name"));
        }

        let mut scope = match self.stack.last() {
            None => match name.split_once("//") {
                Some((parent, hat)) => {
                    if !self.roots.iter().any(|root| root.name == parent) {
                        return Err(PolicyError::syntax(format!(
                            "External hat {} defined before its parent profile {}",
                            hat, parent
                        )));
                    }
                    let mut scope = ProfileScope::new(hat, ScopeKind::Hat, &self.filename);
                    scope.external = true;
                    scope.parent = Some(parent.to_string());
                    scope
                }
                None => ProfileScope::new(&name, ScopeKind::Profile, &self.filename),
            },
            Some(parent) => {
                if !profile_keyword {
                    return Err(PolicyError::syntax(format!(
                        "{} profile contains syntax errors: missing \"profile\" keyword",
                        parent.full_name()
                    )));
                }
                if parent.kind != ScopeKind::Profile {
                    return Err(PolicyError::syntax(format!(
                        "{} profile contains syntax errors: a child profile inside another child profile is not allowed",
                        parent.full_name()
                    )));
                }
                ProfileScope::new(&name, ScopeKind::Child, &self.filename)
            }
        };

        scope.profile_keyword = profile_keyword;
        scope.attachment = caps
            .name("attachment")
            .map(|m| Pattern::new(strip_quotes(m.as_str()), true))
            .transpose()?;
        scope.xattrs = caps.name("xattrs").map(|m| m.as_str().trim().to_string());
        if let Some(flags) = caps.name("flags") {
            scope.flags = split_flags(flags.as_str());
        }
        scope.header_comment = parse_comment(caps);
        if self.stack.is_empty() {
            scope.initial_comment = std::mem::take(&mut self.comments);
        }
        self.comments.clear();

        self.stack.push(scope);
        Ok(())
    }

    fn open_hat(&mut self, caps: &Captures<'_>) -> PolicyResult<()> {
        let parent = match self.stack.last() {
            Some(parent) if self.mode == ScanMode::Profile => parent,
            _ => return Err(PolicyError::syntax("Unexpected hat definition outside of a profile")),
        };
        if parent.kind != ScopeKind::Profile {
            return Err(PolicyError::syntax(format!(
                "{} profile contains syntax errors: a hat inside another child profile is not allowed",
                parent.full_name()
            )));
        }

        let name = strip_quotes(&caps["hat"]).to_string();
        if parent.children.contains_key(&name) {
            return Err(PolicyError::syntax(format!(
                "Multiple definitions for hat {} in profile {}",
                name, parent.name
            )));
        }
        let mut hat = ProfileScope::new(&name, ScopeKind::Hat, &self.filename);
        if let Some(flags) = caps.name("flags") {
            hat.flags = split_flags(flags.as_str());
        }
        hat.header_comment = parse_comment(caps);
        self.stack.push(hat);
        Ok(())
    }

    fn close_scope(&mut self, ctx: &ParseContext) -> PolicyResult<()> {
        let mut scope = self
            .stack
            .pop()
            .ok_or_else(|| PolicyError::syntax("Unexpected end of profile reached"))?;
        self.comments.clear();

        if let Some(parent) = self.stack.last_mut() {
            return parent.add_child(scope);
        }

        if scope.external {
            let parent_name = scope.parent.clone().unwrap_or_default();
            let parent = self
                .roots
                .iter_mut()
                .find(|root| root.name == parent_name)
                .ok_or_else(|| PolicyError::syntax(format!("Parent profile {} not found", parent_name)))?;
            return parent.add_child(scope);
        }

        if self.roots.iter().any(|root| root.name == scope.name) {
            return Err(PolicyError::syntax(format!("Profile {} defined twice", scope.name)));
        }
        for hat in ctx.config().required_hats_for(&scope.name) {
            if scope.ensure_hat(hat) {
                log::debug!("Required hat added | profile: {} | hat: {}", scope.name, hat);
            }
        }
        self.file.profiles.push(scope.name.clone());
        self.roots.push(scope);
        Ok(())
    }

    /// 把规则放进当前作用域；include 先解析其目标
    fn place(&mut self, ctx: &mut ParseContext, rule: Rule) -> PolicyResult<()> {
        if let Rule::Include(include) = &rule {
            ctx.resolve_include(include)?;
        }

        match (self.mode, self.stack.last_mut()) {
            (ScanMode::Include, _) => {
                if rule.kind().is_preamble_only() || rule.kind() == RuleKind::Alias {
                    self.file.preamble.add(rule)
                } else {
                    self.fragment_rules.add(rule)
                }
            }
            (ScanMode::Profile, None) => self.file.preamble.add(rule),
            (ScanMode::Profile, Some(scope)) => match rule.kind() {
                RuleKind::Variable | RuleKind::Boolean => Err(PolicyError::syntax(format!(
                    "Unexpected {} definition found inside profile {}",
                    rule.kind(),
                    scope.full_name()
                ))),
                _ => scope.add_rule(rule),
            },
        }
    }

    pub(crate) fn into_parsed(self) -> ParsedProfiles {
        ParsedProfiles {
            file: self.file,
            profiles: self.roots,
        }
    }

    pub(crate) fn into_fragment(self) -> (ProfileFile, ScopeRules) {
        (self.file, self.fragment_rules)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ParserConfig;
    use crate::error::PolicyError;
    use crate::parser::ParseContext;
    use crate::profile::{ParsedProfiles, ScopeKind};

    fn context() -> ParseContext {
        let _ = env_logger::builder().is_test(true).try_init();
        ParseContext::new(ParserConfig::builder().resolve_includes(false).build())
    }

    fn parse(text: &str) -> ParsedProfiles {
        context().parse_profile_text(text, "test").unwrap()
    }

    fn parse_err(text: &str) -> PolicyError {
        context().parse_profile_text(text, "test").unwrap_err()
    }

    fn error_line(text: &str) -> usize {
        let err = parse_err(text);
        assert!(err.is_syntax(), "{}", err);
        let location = err.location().unwrap();
        assert_eq!(location.file, "test");
        location.line
    }

    #[test]
    fn test_end_to_end_single_profile() {
        // 测试场景：deny 组在前，组间空行，} 前没有空行
        let parsed = parse("/usr/bin/foo {\n  /usr/bin/foo r,\n  deny /etc/shadow rw,\n}\n");
        assert_eq!(parsed.profiles.len(), 1);
        let scope = parsed.get("/usr/bin/foo").unwrap();
        assert_eq!(scope.rules.file.len(), 2);
        assert_eq!(
            scope.get_clean(0),
            vec!["/usr/bin/foo {", "  deny /etc/shadow rw,", "", "  /usr/bin/foo r,", "}"]
        );
        assert_eq!(parsed.file.profiles, vec!["/usr/bin/foo".to_string()]);
    }

    #[test]
    fn test_header_variants() {
        let text = "# a comment\n# Last Modified: today\nprofile foo /usr/bin/foo flags=(complain) { # hdr\n}\n\nprofile \"foo bar\" xattrs=(user.foo=bar) (audit,enforce) {\n}\n";
        let parsed = parse(text);
        assert_eq!(
            parsed.get("foo").unwrap().get_clean(0),
            vec!["# a comment", "profile foo /usr/bin/foo flags=(complain) { # hdr", "}"]
        );
        let quoted = parsed.get("foo bar").unwrap();
        assert_eq!(quoted.xattrs.as_deref(), Some("user.foo=bar"));
        assert_eq!(
            quoted.get_header(0),
            "profile \"foo bar\" xattrs=(user.foo=bar) flags=(audit, enforce) {"
        );
        assert_eq!(
            parsed.get_clean(),
            vec![
                "# a comment",
                "profile foo /usr/bin/foo flags=(complain) { # hdr",
                "}",
                "",
                "profile \"foo bar\" xattrs=(user.foo=bar) flags=(audit, enforce) {",
                "}",
            ]
        );
    }

    #[test]
    fn test_hats_and_child_profiles() {
        let text = "/usr/bin/foo {\n  ^bar {\n    /bar r,\n  }\n  hat baz {\n  }\n  profile child /usr/bin/child {\n  }\n}\n";
        let parsed = parse(text);
        let scope = parsed.get("/usr/bin/foo").unwrap();
        assert_eq!(scope.children.len(), 3);
        assert_eq!(scope.children["bar"].kind, ScopeKind::Hat);
        assert_eq!(scope.children["bar"].full_name(), "/usr/bin/foo//bar");
        assert_eq!(scope.children["child"].kind, ScopeKind::Child);
        assert_eq!(
            scope.get_clean(0),
            vec![
                "/usr/bin/foo {",
                "  ^bar {",
                "    /bar r,",
                "  }",
                "",
                "  ^baz {",
                "  }",
                "",
                "  profile child /usr/bin/child {",
                "  }",
                "}",
            ]
        );
    }

    #[test]
    fn test_external_hat() {
        let parsed = parse("/usr/bin/foo {\n}\nprofile /usr/bin/foo//bar {\n  /bar r,\n}\n");
        assert_eq!(parsed.profiles.len(), 1);
        let hat = &parsed.get("/usr/bin/foo").unwrap().children["bar"];
        assert!(hat.external);
        assert_eq!(hat.rules.file.len(), 1);

        assert_eq!(error_line("profile /usr/bin/foo//bar {\n}\n"), 1);
    }

    #[test]
    fn test_nesting_errors() {
        assert_eq!(
            error_line("/usr/bin/foo {\n  profile child {\n    profile grandchild {\n    }\n  }\n}\n"),
            3
        );
        assert_eq!(error_line("/usr/bin/foo {\n  profile child {\n    ^hat {\n"), 3);
        assert_eq!(error_line("/usr/bin/foo {\n  /usr/bin/child {\n  }\n}\n"), 2);
        assert_eq!(error_line("/usr/bin/foo {\n  ^a {\n  }\n  ^a {\n  }\n}\n"), 4);
        assert_eq!(error_line("^hat {\n}\n"), 1);
    }

    #[test]
    fn test_unbalanced_blocks() {
        assert_eq!(error_line("}\n"), 1);
        assert_eq!(error_line("/usr/bin/foo {\n  /foo r,\n"), 2);
        assert_eq!(error_line("/usr/bin/foo {\n}\n/usr/bin/foo {\n}\n"), 4);
    }

    #[test]
    fn test_unknown_and_unterminated_lines() {
        assert_eq!(error_line("/usr/bin/foo {\n  frobnicate everything,\n}\n"), 2);
        // 缺逗号的语句一直吞到文件末尾，错误指向语句起始行
        assert_eq!(error_line("/usr/bin/foo {\n  /foo r\n}\n"), 2);
    }

    #[test]
    fn test_multiline_statement() {
        let text = "/usr/bin/foo {\n  dbus send\n       bus=session   # trailing\n       path=/org/foo,\n}\n";
        let parsed = parse(text);
        let scope = parsed.get("/usr/bin/foo").unwrap();
        assert_eq!(scope.rules.dbus.len(), 1);
        assert_eq!(
            scope.get_clean(0)[1],
            "  dbus send bus=session path=/org/foo,"
        );
    }

    #[test]
    fn test_conditional_blocks_are_skipped() {
        let text = "/usr/bin/foo {\n  if $foo {\n    /bar r,\n    if defined @{x} {\n    }\n  } else {\n    /baz r,\n  }\n  /qux r,\n}\n";
        let parsed = parse(text);
        let scope = parsed.get("/usr/bin/foo").unwrap();
        assert_eq!(scope.rules.file.len(), 1);
        assert_eq!(error_line("/usr/bin/foo {\n  } else {\n}\n"), 2);
    }

    #[test]
    fn test_variable_placement_and_redefinition() {
        let parsed = parse("@{x} = /a\n@{x} += /b\n$enabled = true\n/usr/bin/foo {\n}\n");
        let merged = parsed.file.preamble.variable.get_merged_variables();
        assert_eq!(merged.set["@{x}"].iter().collect::<Vec<_>>(), vec!["/a"]);
        assert_eq!(merged.add["@{x}"].iter().collect::<Vec<_>>(), vec!["/b"]);
        assert_eq!(parsed.file.preamble.boolean.get("$enabled"), Some(true));

        assert_eq!(error_line("@{x} = /a\n@{x} = /b\n"), 2);
        assert_eq!(error_line("/usr/bin/foo {\n  @{x} = /a\n}\n"), 2);
        assert_eq!(error_line("/usr/bin/foo {\n  $x = false\n}\n"), 2);
        assert_eq!(error_line("capability chown,\n"), 1);
    }

    #[test]
    fn test_required_hats() {
        let config = ParserConfig::builder()
            .resolve_includes(false)
            .required_hats("/usr/sbin/apache*", &["DEFAULT_URI", "HANDLING_UNTRUSTED_INPUT"])
            .build();
        let mut ctx = ParseContext::new(config);
        let parsed = ctx
            .parse_profile_text("/usr/sbin/apache2 {\n  ^DEFAULT_URI {\n    /var/www/** r,\n  }\n}\n/usr/bin/foo {\n}\n", "apache")
            .unwrap();
        let apache = parsed.get("/usr/sbin/apache2").unwrap();
        assert_eq!(apache.children.len(), 2);
        assert_eq!(apache.children["DEFAULT_URI"].rules.file.len(), 1);
        assert!(apache.children["HANDLING_UNTRUSTED_INPUT"].rules.is_empty());
        assert!(parsed.get("/usr/bin/foo").unwrap().children.is_empty());
    }

    #[test]
    fn test_clean_output_reparses_to_same_text() {
        let text = "include <tunables/global>\n@{x} = /a\n\n# header\n/usr/bin/foo flags=(complain) {\n  include <abstractions/base>\n  capability chown,\n  network inet stream,\n  owner @{HOME}/** rw,\n  deny /etc/shadow r,\n  ^hat {\n    /tmp/ r,\n  }\n}\n";
        let first = parse(text).get_clean();
        let second = parse(&(first.join("\n") + "\n")).get_clean();
        assert_eq!(first, second);
        assert_eq!(first[0], "@{x} = /a");
    }
}
