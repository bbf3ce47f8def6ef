//! include 规则与路径展开

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use super::RuleType;
use crate::core::grammar::re_eol;
use crate::core::{RuleBase, RuleKind};
use crate::error::{PolicyError, PolicyResult};
use crate::utils::{is_skippable_dir, is_skippable_file};

static RE_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*#?include(?P<ifexists>\s+if\s+exists)?",
        r##"(\s*<(?P<magicpath>[^>]*)>|\s*"(?P<quotedpath>[^"]*)"|\s+(?P<unquotedpath>[^<>"#\s][^<>"#]*?))"##,
        re_eol!()
    ))
    .unwrap()
});

/// include 规则
/// `<path>` 为 magic 路径（相对 profile 目录），`"path"` 或裸路径为普通路径
#[derive(Debug, Clone)]
pub struct IncludeRule {
    base: RuleBase,
    pub path: String,
    pub ifexists: bool,
    pub ismagic: bool,
}

impl IncludeRule {
    pub fn new(path: &str, ifexists: bool, ismagic: bool, base: RuleBase) -> PolicyResult<Self> {
        base.forbid_modifiers("include")?;
        if path.is_empty() {
            return Err(PolicyError::syntax("Empty include path"));
        }
        Ok(Self {
            base,
            path: path.to_string(),
            ifexists,
            ismagic,
        })
    }

    /// 展开为实际文件列表
    /// - 绝对路径直接使用，否则拼接到 profile 目录下
    /// - 目录递归展开为其中所有非忽略文件，按文件名排序
    /// - 不存在的路径：非 if exists 时仍返回（由调用方报告缺失）
    pub fn get_full_paths(&self, profile_dir: &Path) -> Vec<PathBuf> {
        let full_path = if self.path.starts_with('/') {
            PathBuf::from(&self.path)
        } else {
            profile_dir.join(&self.path)
        };

        if full_path.is_dir() {
            return WalkDir::new(&full_path)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    !(entry.file_type().is_dir()
                        && (is_skippable_dir(entry.path()) || is_skippable_file(entry.path())))
                })
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        log::warn!("Include directory walk failed | path: {} | error: {}", full_path.display(), e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file() && !is_skippable_file(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
        }

        if full_path.exists() || !self.ifexists {
            vec![full_path]
        } else {
            Vec::new()
        }
    }
}

impl RuleType for IncludeRule {
    const KIND: RuleKind = RuleKind::Include;

    fn matches(raw: &str) -> bool {
        RE_INCLUDE.is_match(raw)
    }

    fn parse(raw: &str) -> PolicyResult<Self> {
        let caps = RE_INCLUDE
            .captures(raw)
            .ok_or_else(|| PolicyError::syntax(format!("Invalid include rule '{}'", raw.trim())))?;
        let ifexists = caps.name("ifexists").is_some();
        let base = RuleBase::from_captures(&caps, raw);

        let (path, ismagic) = if let Some(m) = caps.name("magicpath") {
            (m.as_str().trim(), true)
        } else if let Some(m) = caps.name("quotedpath") {
            (m.as_str(), false)
        } else if let Some(m) = caps.name("unquotedpath") {
            let path = m.as_str().trim();
            if path.contains(char::is_whitespace) {
                return Err(PolicyError::syntax(format!(
                    "Include path with spaces requires quotes: '{}'",
                    path
                )));
            }
            (path, false)
        } else {
            return Err(PolicyError::syntax(format!("Invalid include rule '{}'", raw.trim())));
        };

        Self::new(path, ifexists, ismagic, base)
    }

    fn base(&self) -> &RuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleBase {
        &mut self.base
    }

    fn clean(&self) -> String {
        let ifexists = if self.ifexists { " if exists" } else { "" };
        if self.ismagic {
            format!("include{} <{}>{}", ifexists, self.path, self.base.comment)
        } else {
            format!("include{} \"{}\"{}", ifexists, self.path, self.base.comment)
        }
    }

    /// 未声明 if exists 的 include 覆盖声明了 if exists 的同一路径
    fn is_covered_local(&self, other: &Self) -> bool {
        self.path == other.path && self.ismagic == other.ismagic && !(self.ifexists && !other.ifexists)
    }

    fn is_equal_local(&self, other: &Self, _strict: bool) -> bool {
        self.path == other.path && self.ifexists == other.ifexists && self.ismagic == other.ismagic
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn include(raw: &str) -> IncludeRule {
        IncludeRule::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_include_rules() {
        let magic = include("#include <abstractions/base>");
        assert!(magic.ismagic && !magic.ifexists);
        assert_eq!(magic.path, "abstractions/base");
        assert_eq!(magic.get_clean(1), "  include <abstractions/base>");

        let quoted = include("include if exists \"/etc/foo bar\"  # local");
        assert!(quoted.ifexists && !quoted.ismagic);
        assert_eq!(quoted.get_clean(0), "include if exists \"/etc/foo bar\" # local");

        let bare = include("include /etc/apparmor.d/local/foo");
        assert_eq!(bare.get_clean(0), "include \"/etc/apparmor.d/local/foo\"");
    }

    #[test]
    fn test_invalid_include_rules() {
        assert!(IncludeRule::parse("include <>").unwrap_err().is_syntax());
        assert!(IncludeRule::parse("include foo bar").unwrap_err().is_syntax());
        assert!(!IncludeRule::matches("# include <foo>"));
        assert!(!IncludeRule::matches("includes <foo>"));
    }

    #[test]
    fn test_include_coverage() {
        let plain = include("include <abstractions/base>");
        let optional = include("include if exists <abstractions/base>");
        assert!(plain.is_covered(&optional, true, true));
        assert!(!optional.is_covered(&plain, true, true));
        assert!(!plain.is_covered(&include("include \"abstractions/base\""), true, true));
    }

    #[test]
    fn test_full_paths_for_directory() {
        // 测试场景：目录递归展开、排序、忽略备份文件与特殊子目录
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("abstractions");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("disable")).unwrap();
        fs::write(root.join("b"), "").unwrap();
        fs::write(root.join("a"), "").unwrap();
        fs::write(root.join("a.dpkg-old"), "").unwrap();
        fs::write(root.join("sub").join("c"), "").unwrap();
        fs::write(root.join("disable").join("d"), "").unwrap();

        let paths = include("include <abstractions>").get_full_paths(dir.path());
        assert_eq!(paths, vec![root.join("a"), root.join("b"), root.join("sub").join("c")]);

        fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert!(include("include <empty>").get_full_paths(dir.path()).is_empty());
    }

    #[test]
    fn test_full_paths_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            include("include <missing>").get_full_paths(dir.path()),
            vec![dir.path().join("missing")]
        );
        assert!(include("include if exists <missing>").get_full_paths(dir.path()).is_empty());
        let absolute = dir.path().join("abs");
        fs::write(&absolute, "").unwrap();
        let raw = format!("include \"{}\"", absolute.display());
        assert_eq!(include(&raw).get_full_paths(Path::new("/nonexistent")), vec![absolute]);
    }
}
