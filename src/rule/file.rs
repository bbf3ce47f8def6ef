//! file 规则
//! 语法三种形态：`path perms`、`perms path`（leading perms）与裸 `file,`

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleType;
use crate::aare::Pattern;
use crate::core::grammar::{re_audit_deny, re_comma_eol, re_path_or_var, re_profile_name};
use crate::core::{quote_if_needed, strip_quotes, AllOr, Origin, RuleBase, RuleKind, Severity, SeverityDb};
use crate::error::{PolicyError, PolicyResult};

static RE_PROFILE_FILE_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        re_audit_deny!(),
        r"(?P<owner>owner\s+)?",
        r"(",
        r"(?P<bare_file>file)",
        r"|",
        r"(?P<file_keyword>file\s+)?",
        r"((?P<path>",
        re_path_or_var!(),
        r")\s+(?P<perms>[a-zA-Z]+)|(?P<perms2>[a-zA-Z]+)\s+(?P<path2>",
        re_path_or_var!(),
        r"))",
        r"(\s+->\s*(?P<target>",
        re_profile_name!(),
        r"))?",
        r")",
        re_comma_eol!()
    ))
    .unwrap()
});

/// 普通权限，同时定义了规范输出顺序
pub const FILE_PERMISSIONS: &[char] = &['m', 'r', 'w', 'a', 'l', 'k'];
pub const EXEC_TRANSITIONS: &[&str] = &["ix", "ux", "Ux", "px", "Px", "cx", "Cx"];
pub const EXEC_FALLBACK_TRANSITIONS: &[&str] = &["pix", "Pix", "cix", "Cix", "pux", "PUx", "cux", "CUx"];
/// deny 规则只允许裸 x
pub const DENY_EXEC: &str = "x";

/// 拆分权限串为普通权限集合与 exec 模式
pub fn split_perms(text: &str, deny: bool) -> PolicyResult<(BTreeSet<char>, Option<String>)> {
    let mut perms = BTreeSet::new();
    let mut exec: Option<String> = None;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if FILE_PERMISSIONS.contains(&c) {
            perms.insert(c);
            rest = &rest[1..];
            continue;
        }
        let mode = if c == 'x' {
            if !deny {
                return Err(PolicyError::syntax(
                    "'x' must be preceded by an exec qualifier (i, P, C or U)",
                ));
            }
            DENY_EXEC
        } else if let Some(mode) = EXEC_FALLBACK_TRANSITIONS.iter().copied().find(|m| rest.starts_with(m)) {
            mode
        } else if let Some(mode) = EXEC_TRANSITIONS.iter().copied().find(|m| rest.starts_with(m)) {
            mode
        } else {
            return Err(PolicyError::syntax(format!(
                "Permission contains unknown character(s) '{}'",
                rest
            )));
        };
        if let Some(prev) = &exec {
            if prev != mode {
                return Err(PolicyError::syntax(format!(
                    "Conflicting execute permissions found: {} and {}",
                    prev, mode
                )));
            }
        }
        exec = Some(mode.to_string());
        rest = &rest[mode.len()..];
    }

    Ok((perms, exec))
}

/// file 规则
#[derive(Debug, Clone)]
pub struct FileRule {
    base: RuleBase,
    pub path: AllOr<Pattern>,
    pub perms: AllOr<BTreeSet<char>>,
    pub exec_perms: Option<String>,
    pub target: AllOr<Pattern>,
    pub owner: bool,
    /// 以下两项只影响书写形式
    pub file_keyword: bool,
    pub leading_perms: bool,
}

impl FileRule {
    /// perms 中不得包含 exec 模式，exec 模式单独通过 `exec_perms` 给出
    pub fn new(
        path: AllOr<Pattern>,
        perms: AllOr<BTreeSet<char>>,
        exec_perms: Option<&str>,
        target: AllOr<Pattern>,
        owner: bool,
        base: RuleBase,
    ) -> PolicyResult<Self> {
        if let AllOr::Value(set) = &perms {
            if let Some(bad) = set.iter().find(|p| !FILE_PERMISSIONS.contains(*p)) {
                return Err(PolicyError::internal(format!("Unknown file permission '{}'", bad)));
            }
            if set.contains(&'a') && set.contains(&'w') {
                return Err(PolicyError::syntax("Conflicting permissions found: 'a' and 'w'"));
            }
            if set.is_empty() && exec_perms.is_none() {
                return Err(PolicyError::internal("Empty permissions in file rule"));
            }
        }

        if let Some(mode) = exec_perms {
            if base.deny {
                if mode != DENY_EXEC {
                    return Err(PolicyError::syntax(format!(
                        "File deny rules only allow 'x' as execute mode, but not {}",
                        mode
                    )));
                }
            } else if mode == DENY_EXEC {
                return Err(PolicyError::syntax(
                    "Execute flag ('x') in file rule must specify the exec mode (ix, Px, Cx etc.)",
                ));
            } else if !EXEC_TRANSITIONS.contains(&mode) && !EXEC_FALLBACK_TRANSITIONS.contains(&mode) {
                return Err(PolicyError::internal(format!("Unknown execute mode '{}'", mode)));
            }
        }

        if path.is_all() != perms.is_all() {
            return Err(PolicyError::internal(
                "Either specify path and perms, or none of them",
            ));
        }
        if path.is_all() && (exec_perms.is_some() || !target.is_all()) {
            return Err(PolicyError::internal(
                "Exec perms or target specified for bare file rule",
            ));
        }
        let links = perms.value().is_some_and(|set| set.contains(&'l'));
        if !target.is_all() && exec_perms.is_none() && !links {
            return Err(PolicyError::syntax(
                "Exec target requires an exec mode or link permission",
            ));
        }

        Ok(Self {
            base,
            path,
            perms,
            exec_perms: exec_perms.map(str::to_string),
            target,
            owner,
            file_keyword: false,
            leading_perms: false,
        })
    }

    /// 裸 `file,` 规则
    pub fn all(owner: bool, base: RuleBase) -> Self {
        Self {
            base,
            path: AllOr::All,
            perms: AllOr::All,
            exec_perms: None,
            target: AllOr::All,
            owner,
            file_keyword: false,
            leading_perms: false,
        }
    }

    /// 由日志事件的路径与权限合成
    pub fn from_log_event(path: &str, perms: &str, owner: bool) -> PolicyResult<Self> {
        let base = RuleBase::default().with_origin(Origin::LogEvent);
        let (perms, exec) = split_perms(perms, false)?;
        Self::new(
            AllOr::Value(Pattern::from_log_event(path, true)?),
            AllOr::Value(perms),
            exec.as_deref(),
            AllOr::All,
            owner,
            base,
        )
    }

    pub fn with_style(mut self, file_keyword: bool, leading_perms: bool) -> Self {
        self.file_keyword = file_keyword;
        self.leading_perms = leading_perms;
        self
    }

    pub fn set_owner(&mut self, owner: bool) {
        if self.owner != owner {
            self.owner = owner;
            self.base.mark_stale();
        }
    }

    /// 替换路径（通常是放宽为更通用的通配符）
    pub fn set_path(&mut self, path: Pattern) -> PolicyResult<()> {
        if self.path.is_all() {
            return Err(PolicyError::internal("Cannot set a path on a bare file rule"));
        }
        self.path = AllOr::Value(path);
        self.base.mark_stale();
        Ok(())
    }

    /// 合并额外权限；合并后允许同时持有 a 与 w（规范输出会省略 a）
    pub fn add_perms(&mut self, extra: &BTreeSet<char>) -> PolicyResult<()> {
        if let Some(bad) = extra.iter().find(|p| !FILE_PERMISSIONS.contains(*p)) {
            return Err(PolicyError::internal(format!("Unknown file permission '{}'", bad)));
        }
        if let AllOr::Value(set) = &mut self.perms {
            let before = set.len();
            set.extend(extra.iter().copied());
            if set.len() != before {
                self.base.mark_stale();
            }
        }
        Ok(())
    }

    /// 按规范顺序拼接权限串；持有 w 时省略 a
    pub fn joint_perms(&self) -> String {
        let mut out = String::new();
        if let AllOr::Value(set) = &self.perms {
            for perm in FILE_PERMISSIONS {
                if *perm == 'a' && set.contains(&'w') {
                    continue;
                }
                if set.contains(perm) {
                    out.push(*perm);
                }
            }
        }
        if let Some(mode) = &self.exec_perms {
            out.push_str(mode);
        }
        out
    }

    fn perms_cover(&self, other: &Self) -> bool {
        match (&self.perms, &other.perms) {
            (AllOr::All, _) => true,
            (AllOr::Value(_), AllOr::All) => false,
            (AllOr::Value(mine), AllOr::Value(theirs)) => theirs
                .iter()
                .all(|p| mine.contains(p) || (*p == 'a' && mine.contains(&'w'))),
        }
    }
}

impl RuleType for FileRule {
    const KIND: RuleKind = RuleKind::File;

    fn matches(raw: &str) -> bool {
        RE_PROFILE_FILE_ENTRY.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_PROFILE_FILE_ENTRY
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid file rule '{}'", raw.trim())))?;
        let base = RuleBase::from_captures(&caps, raw);
        let owner = caps.name("owner").is_some();

        if caps.name("bare_file").is_some() {
            return Ok(Self::all(owner, base));
        }

        let (path, perms, leading_perms) = match (caps.name("path"), caps.name("path2")) {
            (Some(path), _) => (path.as_str(), &caps["perms"], false),
            (None, Some(path)) => (path.as_str(), &caps["perms2"], true),
            (None, None) => return Err(PolicyError::syntax(format!("Invalid file rule '{}'", raw.trim()))),
        };
        let path = Pattern::new(strip_quotes(path), true)?;
        let (perms, exec) = split_perms(perms, base.deny)?;
        let target = match caps.name("target") {
            Some(m) => AllOr::Value(Pattern::new(strip_quotes(m.as_str()), false)?),
            None => AllOr::All,
        };
        let file_keyword = caps.name("file_keyword").is_some();

        Ok(Self::new(AllOr::Value(path), AllOr::Value(perms), exec.as_deref(), target, owner, base)?
            .with_style(file_keyword, leading_perms))
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let owner = if self.owner { "owner " } else { "" };
        let path = match &self.path {
            AllOr::All => return format!("{}{}file,{}", self.base.modifiers_str(), owner, self.base.comment),
            AllOr::Value(path) => quote_if_needed(path.glob()),
        };
        let perms = self.joint_perms();
        let path_and_perms = if self.leading_perms {
            format!("{} {}", perms, path)
        } else {
            format!("{} {}", path, perms)
        };
        let target = match &self.target {
            AllOr::All => String::new(),
            AllOr::Value(target) => format!(" -> {}", quote_if_needed(target.glob())),
        };
        format!(
            "{}{}{}{}{},{}",
            self.base.modifiers_str(),
            owner,
            if self.file_keyword { "file " } else { "" },
            path_and_perms,
            target,
            self.base.comment
        )
    }

    fn is_covered_local(&self, other: &Self) -> bool {
        if !self.path.covers(&other.path) || !self.perms_cover(other) {
            return false;
        }
        if other.exec_perms.is_some() && self.exec_perms != other.exec_perms {
            return false;
        }
        let links = other.perms.value().is_some_and(|set| set.contains(&'l'));
        if other.exec_perms.is_some() || links {
            // 目标不同意味着不同的安全上下文
            if !self.target.covers(&other.target) || self.target.is_all() != other.target.is_all() {
                return false;
            }
        }
        !(self.owner && !other.owner)
    }

    fn is_equal_local(&self, other: &Self, strict: bool) -> bool {
        if self.owner != other.owner
            || self.path != other.path
            || self.perms != other.perms
            || self.exec_perms != other.exec_perms
            || self.target != other.target
        {
            return false;
        }
        !strict || (self.file_keyword == other.file_keyword && self.leading_perms == other.leading_perms)
    }

    fn severity(&self, db: &dyn SeverityDb) -> Severity {
        let path = self.path.value().map_or("/**", |p| p.glob());
        let perms = match &self.perms {
            AllOr::All => "mrwlkix".to_string(),
            AllOr::Value(_) => self.joint_perms(),
        };
        db.rank_path(path, &perms).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(raw: &str) -> FileRule {
        FileRule::parse(raw).unwrap()
    }

    fn perms(text: &str) -> BTreeSet<char> {
        text.chars().collect()
    }

    #[test]
    fn test_parse_file_rules() {
        let rule = file("/foo r,");
        assert_eq!(rule.path.value().map(|p| p.glob()), Some("/foo"));
        assert_eq!(rule.perms, AllOr::Value(perms("r")));

        let exec = file("audit deny owner /usr/bin/** x, # no exec");
        assert!(exec.owner && exec.base().deny && exec.base().audit);
        assert_eq!(exec.exec_perms.as_deref(), Some("x"));

        let leading = file("file rw \"/tmp/foo bar\",");
        assert!(leading.leading_perms && leading.file_keyword);
        assert_eq!(leading.get_clean(0), "file rw \"/tmp/foo bar\",");

        let target = file("/usr/bin/foo Cx -> child,");
        assert_eq!(target.exec_perms.as_deref(), Some("Cx"));
        assert_eq!(target.target.value().map(|p| p.glob()), Some("child"));

        assert!(file("owner file,").path.is_all());
        assert_eq!(file("@{HOME}/.foo/** rwk,").get_clean(1), "  @{HOME}/.foo/** rwk,");
    }

    #[test]
    fn test_write_file_rules() {
        for (raw, clean) in [
            ("  /foo  wr ,", "/foo rw,"),
            ("/usr/bin/foo rPix,", "/usr/bin/foo rPix,"),
            ("owner file /foo/{a,b} kmlr,", "owner file /foo/{a,b} mrlk,"),
            ("deny   file ,  # all", "deny file, # all"),
            ("allow /bin/ls ix,", "allow /bin/ls ix,"),
            ("/foo l -> /bar,", "/foo l -> /bar,"),
        ] {
            assert_eq!(file(raw).get_clean(0), clean);
        }
    }

    #[test]
    fn test_invalid_file_rules() {
        assert!(FileRule::parse("/foo aw,").unwrap_err().is_syntax());
        assert!(FileRule::parse("/foo rx,").unwrap_err().is_syntax());
        assert!(FileRule::parse("/foo ixPx,").unwrap_err().is_syntax());
        assert!(FileRule::parse("/foo rq,").is_err());
        assert!(FileRule::parse("deny /foo ix,").is_err());
        assert!(FileRule::parse("/foo r -> /bar,").is_err());
        assert!(!FileRule::matches("foo r,"));
        assert!(!FileRule::matches("/foo r"));

        let bare = FileRule::new(AllOr::All, AllOr::All, Some("ix"), AllOr::All, false, RuleBase::default());
        assert!(bare.unwrap_err().is_internal());
        let mixed = FileRule::new(AllOr::All, AllOr::Value(perms("r")), None, AllOr::All, false, RuleBase::default());
        assert!(mixed.unwrap_err().is_internal());
        let empty = FileRule::new(
            AllOr::Value(Pattern::new("/foo", true).unwrap()),
            AllOr::Value(BTreeSet::new()),
            None,
            AllOr::All,
            false,
            RuleBase::default(),
        );
        assert!(empty.unwrap_err().is_internal());
    }

    #[test]
    fn test_file_coverage() {
        // 测试场景：通配路径 + 超集权限覆盖具体请求，反之不成立
        assert!(file("/foo/* rw,").is_covered(&file("/foo/bar r,"), true, false));
        assert!(!file("/foo/bar r,").is_covered(&file("/foo/* rw,"), true, false));
        assert!(file("/foo w,").is_covered(&file("/foo a,"), true, false));
        assert!(!file("/foo a,").is_covered(&file("/foo w,"), true, false));
        assert!(file("file,").is_covered(&file("/foo rwk,"), true, false));
        assert!(!file("/** r,").is_covered(&file("file,"), true, false));
        assert!(!file("owner /foo r,").is_covered(&file("/foo r,"), true, false));
        assert!(file("/foo r,").is_covered(&file("owner /foo r,"), true, false));
    }

    #[test]
    fn test_file_exec_coverage() {
        let px = file("/usr/bin/* Px -> foo_*,");
        assert!(px.is_covered(&file("/usr/bin/ls Px -> foo_ls,"), true, false));
        assert!(!px.is_covered(&file("/usr/bin/ls Px,"), true, false));
        assert!(!px.is_covered(&file("/usr/bin/ls Cx -> foo_ls,"), true, false));
        assert!(!file("/usr/bin/* r,").is_covered(&file("/usr/bin/ls ix,"), true, false));
        assert!(file("/usr/bin/* rix,").is_covered(&file("/usr/bin/ls ix,"), true, false));
    }

    #[test]
    fn test_widen_perms_drops_append() {
        let mut rule = file("/var/log/foo a,");
        rule.add_perms(&perms("w")).unwrap();
        assert_eq!(rule.get_raw(0), "/var/log/foo w,");
        assert!(rule.is_covered(&file("/var/log/foo a,"), true, false));
    }

    #[test]
    fn test_mutators_mark_stale() {
        let mut rule = file("/foo/bar   r,");
        assert_eq!(rule.get_raw(0), "/foo/bar   r,");
        rule.set_owner(true);
        assert_eq!(rule.get_raw(0), "owner /foo/bar r,");
        rule.set_path(Pattern::new("/foo/*", true).unwrap()).unwrap();
        assert_eq!(rule.get_raw(0), "owner /foo/* r,");
        rule.set_audit(true);
        assert_eq!(rule.get_raw(0), "audit owner /foo/* r,");
    }

    #[test]
    fn test_file_from_log_event() {
        let rule = FileRule::from_log_event("/tmp/a*b", "rw", false).unwrap();
        assert_eq!(rule.base().origin, Origin::LogEvent);
        assert!(!file("/tmp/a r,").is_covered(&rule, true, false));
        assert!(file("/tmp/* rw,").is_covered(&rule, true, false));
    }
}
