use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

static RE_SKIPPABLE_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*/)?(disable|cache|force-complain|lxc)/?$").unwrap());

/// 包管理器残留文件后缀
const SKIPPABLE_SUFFIXES: &[&str] = &[
    ".dpkg-new", ".dpkg-old", ".dpkg-dist", ".dpkg-bak", ".rpmnew", ".rpmsave", ".orig", ".rej", "~",
];

/// 读取 profile 目录时应忽略的文件（隐藏文件、README、备份文件等）
/// 参数可带目录前缀，只检查文件名部分
pub fn is_skippable_file(path: impl AsRef<Path>) -> bool {
    let basename = match path.as_ref().file_name().and_then(|name| name.to_str()) {
        Some(name) => name,
        None => return true,
    };
    basename.is_empty()
        || basename.starts_with('.')
        || basename == "README"
        || SKIPPABLE_SUFFIXES.iter().any(|suffix| basename.ends_with(suffix))
}

/// 不含 profile 的特殊子目录
pub fn is_skippable_dir(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref().to_string_lossy();
    RE_SKIPPABLE_DIR.is_match(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skippable_files() {
        for name in ["README", ".hidden", "foo.dpkg-old", "/etc/apparmor.d/bar.rpmnew", "baz~", ""] {
            assert!(is_skippable_file(name), "{} should be skipped", name);
        }
        for name in ["usr.bin.foo", "/etc/apparmor.d/abstractions/base", "README.md"] {
            assert!(!is_skippable_file(name), "{} should be kept", name);
        }
    }

    #[test]
    fn test_skippable_dirs() {
        assert!(is_skippable_dir("disable"));
        assert!(is_skippable_dir("/etc/apparmor.d/cache/"));
        assert!(is_skippable_dir("force-complain"));
        assert!(!is_skippable_dir("/etc/apparmor.d/abstractions"));
        assert!(!is_skippable_dir("disabled"));
    }
}
