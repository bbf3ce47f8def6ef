//! profile 注册表：profile 名称 / attachment → 源文件，并持有各文件的 preamble
use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use super::file::{IncludeFragment, ParsedProfiles, ProfileFile};
use crate::aare::Pattern;
use crate::error::{PolicyError, PolicyResult};
use crate::ruleset::{DedupStats, MergedVariables};

#[derive(Debug, Default)]
pub struct ProfileRegistry {
    files: FxHashMap<String, ProfileFile>,
    /// profile 名称 → 文件名
    profile_names: FxHashMap<String, String>,
    /// attachment 源码 → (文件名, 编译后的模式)
    attachments: FxHashMap<String, (String, Pattern)>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记源文件（包括 include 片段）；重复登记属于调用方错误
    pub fn add_file(&mut self, file: ProfileFile) -> PolicyResult<()> {
        if self.files.contains_key(&file.filename) {
            return Err(PolicyError::internal(format!("{} already listed in registry files", file.filename)));
        }
        self.files.insert(file.filename.clone(), file);
        Ok(())
    }

    /// 登记 profile；同名 profile 或同一 attachment 出现在两处视为冲突
    pub fn add_profile(&mut self, filename: &str, name: &str, attachment: Option<&str>) -> PolicyResult<()> {
        if !self.files.contains_key(filename) {
            return Err(PolicyError::internal(format!("{} not listed in registry files", filename)));
        }
        let entry = self.check_profile(filename, name, attachment)?;
        self.insert_profile(filename, name, entry);
        Ok(())
    }

    /// 登记一次解析的结果：文件本身与其中的全部顶层 profile
    /// 先校验全部名称与 attachment，任何冲突都不会留下部分登记
    pub fn add_parsed(&mut self, parsed: &ParsedProfiles) -> PolicyResult<()> {
        let filename = parsed.file.filename.as_str();
        if self.files.contains_key(filename) {
            return Err(PolicyError::internal(format!("{} already listed in registry files", filename)));
        }

        let mut names = FxHashSet::default();
        let mut attachments = FxHashSet::default();
        let mut pending = Vec::with_capacity(parsed.profiles.len());
        for scope in &parsed.profiles {
            let attachment = scope.attachment.as_ref().map(|pattern| pattern.glob());
            let entry = self.check_profile(filename, &scope.name, attachment)?;
            if !names.insert(scope.name.as_str()) {
                return Err(PolicyError::Conflict(format!(
                    "Profile {} defined twice in {}",
                    scope.name, filename
                )));
            }
            if let Some((key, _)) = &entry {
                if !attachments.insert(key.clone()) {
                    return Err(PolicyError::Conflict(format!(
                        "Attachment {} defined twice in {}",
                        key, filename
                    )));
                }
            }
            pending.push((scope.name.as_str(), entry));
        }

        let mut file = parsed.file.clone();
        file.profiles.clear();
        self.files.insert(filename.to_string(), file);
        for (name, entry) in pending {
            self.insert_profile(filename, name, entry);
        }
        Ok(())
    }

    /// 登记 include 片段的 preamble（变量合并时使用）
    pub fn add_fragment(&mut self, fragment: &IncludeFragment) -> PolicyResult<()> {
        self.add_file(fragment.file.clone())
    }

    pub fn contains_file(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    pub fn file(&self, filename: &str) -> Option<&ProfileFile> {
        self.files.get(filename)
    }

    pub fn filename_from_profile_name(&self, name: &str) -> Option<&str> {
        self.profile_names.get(name).map(String::as_str)
    }

    /// 先按 attachment 原文精确查找，再按文件名稳定顺序做 AARE 匹配
    pub fn filename_from_attachment(&self, attachment: &str) -> Option<&str> {
        if let Some((filename, _)) = self.attachments.get(attachment) {
            return Some(filename.as_str());
        }

        let mut candidates: Vec<(&String, &(String, Pattern))> = self.attachments.iter().collect();
        candidates.sort_by(|a, b| a.0.cmp(b.0));
        candidates
            .into_iter()
            .find(|(_, (_, pattern))| pattern.matches(attachment))
            .map(|(_, (filename, _))| filename.as_str())
    }

    pub fn profiles_in_file(&self, filename: &str) -> PolicyResult<&[String]> {
        self.files
            .get(filename)
            .map(|file| file.profiles.as_slice())
            .ok_or_else(|| PolicyError::internal(format!("{} not listed in registry files", filename)))
    }

    pub fn get_raw(&self, filename: &str, depth: usize) -> PolicyResult<Vec<String>> {
        Ok(self.listed(filename)?.preamble.get_raw(depth))
    }

    pub fn get_clean(&self, filename: &str, depth: usize) -> PolicyResult<Vec<String>> {
        Ok(self.listed(filename)?.preamble.get_clean(depth))
    }

    /// 文件内 preamble 去重（abi、alias、include、变量）
    pub fn delete_preamble_duplicates(&mut self, filename: &str) -> PolicyResult<DedupStats> {
        let file = self
            .files
            .get_mut(filename)
            .ok_or_else(|| PolicyError::internal(format!("{} not listed in registry files", filename)))?;
        let stats = file.preamble.delete_duplicates();
        stats.print_stats(filename);
        Ok(stats)
    }

    /// 合并主文件与其 include 文件中的变量
    /// - 同名变量在两个文件中都用 `=` 定义 → 冲突
    /// - `+=` 追加到任何文件都未定义的变量 → 冲突
    /// - 追加与定义的先后顺序不影响结果
    pub fn get_all_merged_variables(&self, filename: &str, include_files: &[String]) -> PolicyResult<MergedVariables> {
        let main = self.listed(filename)?.preamble.variable.get_merged_variables();

        let mut merged = MergedVariables::default();
        let mut set_in: FxHashMap<String, &str> = FxHashMap::default();
        for (name, values) in main.set {
            set_in.insert(name.clone(), filename);
            merged.set.insert(name, values);
        }

        let mut additions = vec![(filename, main.add)];
        for include in include_files {
            // 只含规则的片段不会登记在注册表中
            let Some(file) = self.files.get(include) else {
                continue;
            };
            let variables = file.preamble.variable.get_merged_variables();
            for (name, values) in variables.set {
                if let Some(first) = set_in.get(&name) {
                    return Err(PolicyError::Conflict(format!(
                        "While parsing {}: Conflicting variable definitions for variable {} found in {} and {}",
                        filename, name, first, include
                    )));
                }
                set_in.insert(name.clone(), include.as_str());
                merged.set.insert(name, values);
            }
            additions.push((include.as_str(), variables.add));
        }

        for (source, added) in additions {
            for (name, values) in added {
                if !merged.set.contains_key(&name) {
                    return Err(PolicyError::Conflict(format!(
                        "While parsing {}: Variable {} was not previously declared, but is being assigned additional value in file {}",
                        filename, name, source
                    )));
                }
                merged.add.entry(name).or_insert_with(BTreeSet::new).extend(values);
            }
        }
        Ok(merged)
    }

    /// 冲突检查；返回待登记的 attachment（缺省时以 / 开头的名称本身即为 attachment）
    fn check_profile(&self, filename: &str, name: &str, attachment: Option<&str>) -> PolicyResult<Option<(String, Pattern)>> {
        if let Some(existing) = self.profile_names.get(name) {
            return Err(PolicyError::Conflict(format!(
                "Profile {} exists in {} and {}",
                name, existing, filename
            )));
        }
        let Some(key) = attachment.or_else(|| name.starts_with('/').then_some(name)) else {
            return Ok(None);
        };
        if let Some((existing, _)) = self.attachments.get(key) {
            return Err(PolicyError::Conflict(format!(
                "Attachment {} exists in {} and {}",
                key, existing, filename
            )));
        }
        Ok(Some((key.to_string(), Pattern::new(key, true)?)))
    }

    fn insert_profile(&mut self, filename: &str, name: &str, attachment: Option<(String, Pattern)>) {
        if let Some((key, pattern)) = attachment {
            self.attachments.insert(key, (filename.to_string(), pattern));
        }
        self.profile_names.insert(name.to_string(), filename.to_string());
        if let Some(file) = self.files.get_mut(filename) {
            if !file.profiles.iter().any(|known| known == name) {
                file.profiles.push(name.to_string());
            }
        }
    }

    fn listed(&self, filename: &str) -> PolicyResult<&ProfileFile> {
        self.files
            .get(filename)
            .ok_or_else(|| PolicyError::internal(format!("{} not listed in registry files", filename)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ProfileScope, ScopeKind};
    use crate::rule::Rule;

    fn file_with(filename: &str, lines: &[&str]) -> ProfileFile {
        let mut file = ProfileFile::new(filename);
        for line in lines {
            file.preamble.add(Rule::parse_line(line).unwrap().unwrap()).unwrap();
        }
        file
    }

    #[test]
    fn test_profile_and_attachment_lookup() {
        let mut registry = ProfileRegistry::new();
        registry.add_file(ProfileFile::new("usr.bin.foo")).unwrap();
        registry.add_file(ProfileFile::new("bar")).unwrap();
        registry.add_profile("usr.bin.foo", "/usr/bin/foo", None).unwrap();
        registry.add_profile("bar", "bar", Some("/opt/bar/**")).unwrap();

        assert_eq!(registry.filename_from_profile_name("/usr/bin/foo"), Some("usr.bin.foo"));
        assert_eq!(registry.filename_from_profile_name("baz"), None);
        assert_eq!(registry.filename_from_attachment("/usr/bin/foo"), Some("usr.bin.foo"));
        assert_eq!(registry.filename_from_attachment("/opt/bar/bin/bar"), Some("bar"));
        assert_eq!(registry.filename_from_attachment("/usr/bin/baz"), None);
        assert_eq!(registry.profiles_in_file("bar").unwrap(), &["bar".to_string()]);
        assert!(registry.profiles_in_file("missing").unwrap_err().is_internal());
    }

    #[test]
    fn test_duplicate_registrations() {
        let mut registry = ProfileRegistry::new();
        registry.add_file(ProfileFile::new("a")).unwrap();
        registry.add_file(ProfileFile::new("b")).unwrap();
        assert!(registry.add_file(ProfileFile::new("a")).unwrap_err().is_internal());

        registry.add_profile("a", "foo", Some("/usr/bin/foo")).unwrap();
        assert!(matches!(
            registry.add_profile("b", "foo", None),
            Err(PolicyError::Conflict(_))
        ));
        assert!(matches!(
            registry.add_profile("b", "other", Some("/usr/bin/foo")),
            Err(PolicyError::Conflict(_))
        ));
        assert!(registry.add_profile("missing", "x", None).unwrap_err().is_internal());
    }

    #[test]
    fn test_add_parsed_leaves_nothing_on_conflict() {
        // 测试场景：第二个 profile 冲突时，文件与第一个 profile 都不登记
        let mut registry = ProfileRegistry::new();
        registry.add_file(ProfileFile::new("existing")).unwrap();
        registry.add_profile("existing", "/usr/bin/bar", None).unwrap();

        let mut parsed = ParsedProfiles {
            file: ProfileFile::new("new"),
            profiles: Vec::new(),
        };
        parsed.profiles.push(ProfileScope::new("/usr/bin/foo", ScopeKind::Profile, "new"));
        parsed.profiles.push(ProfileScope::new("/usr/bin/bar", ScopeKind::Profile, "new"));
        assert!(matches!(registry.add_parsed(&parsed), Err(PolicyError::Conflict(_))));
        assert!(!registry.contains_file("new"));
        assert_eq!(registry.filename_from_profile_name("/usr/bin/foo"), None);
        assert_eq!(registry.filename_from_attachment("/usr/bin/foo"), None);

        parsed.profiles.pop();
        registry.add_parsed(&parsed).unwrap();
        assert_eq!(registry.profiles_in_file("new").unwrap(), &["/usr/bin/foo".to_string()]);
    }

    #[test]
    fn test_preamble_output_and_dedup() {
        let mut registry = ProfileRegistry::new();
        registry
            .add_file(file_with(
                "foo",
                &["alias /a -> /b,", "alias /a -> /b,", "include <tunables/global>"],
            ))
            .unwrap();
        let stats = registry.delete_preamble_duplicates("foo").unwrap();
        assert_eq!(stats.removed(), 1);
        assert_eq!(
            registry.get_clean("foo", 0).unwrap(),
            vec!["alias /a -> /b,", "", "include <tunables/global>", ""]
        );
        assert_eq!(registry.get_raw("foo", 1).unwrap()[0], "  alias /a -> /b,");
    }

    #[test]
    fn test_merged_variables_across_files() {
        // 测试场景：追加可以出现在定义所在文件之外，且与顺序无关
        let mut registry = ProfileRegistry::new();
        registry.add_file(file_with("main", &["@{x} += /main"])).unwrap();
        registry
            .add_file(file_with("tunables/global", &["@{x} = /a", "@{y} = /y"]))
            .unwrap();
        registry.add_file(file_with("tunables/extra", &["@{x} += /b"])).unwrap();

        let includes = vec!["tunables/global".to_string(), "tunables/extra".to_string()];
        let merged = registry.get_all_merged_variables("main", &includes).unwrap();
        assert_eq!(merged.set["@{x}"].iter().collect::<Vec<_>>(), vec!["/a"]);
        assert_eq!(merged.add["@{x}"].iter().collect::<Vec<_>>(), vec!["/b", "/main"]);
        assert!(merged.set.contains_key("@{y}"));
    }

    #[test]
    fn test_merged_variable_conflicts() {
        let mut registry = ProfileRegistry::new();
        registry.add_file(file_with("main", &["@{x} = /a"])).unwrap();
        registry.add_file(file_with("other", &["@{x} = /b"])).unwrap();
        registry.add_file(file_with("orphan", &["@{z} += /z"])).unwrap();

        assert!(matches!(
            registry.get_all_merged_variables("main", &["other".to_string()]),
            Err(PolicyError::Conflict(_))
        ));
        assert!(matches!(
            registry.get_all_merged_variables("main", &["orphan".to_string()]),
            Err(PolicyError::Conflict(_))
        ));
        assert!(registry
            .get_all_merged_variables("missing", &[])
            .unwrap_err()
            .is_internal());
    }
}
