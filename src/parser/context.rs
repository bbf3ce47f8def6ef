//! 解析上下文：配置 + include 片段缓存
//! 缓存以片段的绝对路径为键，同一根目录下重复 include 只解析一次；切换根目录前调用 clear()
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::scanner::{ScanMode, Scanner};
use crate::config::ParserConfig;
use crate::error::{PolicyError, PolicyResult};
use crate::profile::{IncludeFragment, ParsedProfiles, ScopeRules};
use crate::rule::IncludeRule;
use crate::ruleset::IncludeRuleset;
use crate::utils::{is_skippable_dir, is_skippable_file};

#[derive(Debug, Default)]
pub struct ParseContext {
    config: ParserConfig,
    include_memo: FxHashMap<PathBuf, Arc<IncludeFragment>>,
    /// 正在解析的 include 链，用于发现循环
    in_progress: FxHashSet<PathBuf>,
}

impl ParseContext {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            include_memo: FxHashMap::default(),
            in_progress: FxHashSet::default(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// 清空 include 缓存
    pub fn clear(&mut self) {
        self.include_memo.clear();
        self.in_progress.clear();
    }

    /// 已缓存的片段数量
    pub fn memo_len(&self) -> usize {
        self.include_memo.len()
    }

    pub fn included(&self, path: &Path) -> Option<Arc<IncludeFragment>> {
        self.include_memo.get(&include_key(path)).cloned()
    }

    /// 全部已解析片段（按路径排序）
    pub fn fragments(&self) -> Vec<(&Path, &IncludeFragment)> {
        let mut fragments: Vec<(&Path, &IncludeFragment)> = self
            .include_memo
            .iter()
            .map(|(path, fragment)| (path.as_path(), fragment.as_ref()))
            .collect();
        fragments.sort_by(|a, b| a.0.cmp(b.0));
        fragments
    }

    // ===== 对外解析入口 =====

    /// 解析一个 profile 文件
    pub fn parse_profile_file(&mut self, path: impl AsRef<Path>) -> PolicyResult<ParsedProfiles> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PolicyError::io(path, e))?;
        self.parse_profile_text(&text, &path.display().to_string())
    }

    /// 解析 profile 文本；filename 用于错误定位与注册表索引
    pub fn parse_profile_text(&mut self, text: &str, filename: &str) -> PolicyResult<ParsedProfiles> {
        let mut scanner = Scanner::new(ScanMode::Profile, filename);
        scanner.scan(self, text)?;
        let parsed = scanner.into_parsed();
        log::debug!(
            "Profile file parsed | file: {} | profiles: {} | preamble rules: {}",
            filename,
            parsed.profiles.len(),
            parsed.file.preamble.len()
        );
        Ok(parsed)
    }

    /// 以单作用域模式解析一个 include 片段；已缓存时直接返回
    /// 缓存键为规范化后的绝对路径，同一文件的不同写法只解析一次
    pub fn parse_include(&mut self, path: impl AsRef<Path>) -> PolicyResult<Arc<IncludeFragment>> {
        let path = include_key(path.as_ref());
        if let Some(fragment) = self.include_memo.get(&path) {
            log::debug!("Include memo hit | path: {}", path.display());
            return Ok(Arc::clone(fragment));
        }
        if self.in_progress.contains(&path) {
            return Err(PolicyError::syntax(format!("Include cycle detected at {}", path.display())));
        }
        if !path.is_file() {
            return Err(PolicyError::syntax(format!("Include file not found: {}", path.display())));
        }

        log::debug!("Include memo miss | path: {}", path.display());
        let text = std::fs::read_to_string(&path).map_err(|e| PolicyError::io(&path, e))?;
        let filename = path.display().to_string();

        self.in_progress.insert(path.clone());
        let mut scanner = Scanner::new(ScanMode::Include, &filename);
        let scanned = scanner.scan(self, &text);
        self.in_progress.remove(&path);
        scanned?;

        let (file, rules) = scanner.into_fragment();
        let fragment = Arc::new(IncludeFragment { file, rules });
        self.include_memo.insert(path, Arc::clone(&fragment));
        Ok(fragment)
    }

    /// 解析 include 规则指向的全部文件（关闭 include 展开时什么都不做）
    pub fn resolve_include(&mut self, rule: &IncludeRule) -> PolicyResult<()> {
        if !self.config.resolve_includes {
            return Ok(());
        }
        for path in rule.get_full_paths(&self.config.profile_dir) {
            self.parse_include(&path)?;
        }
        Ok(())
    }

    /// 解析目录下所有 profile 文件（不递归，跳过备份文件与特殊目录）
    pub fn read_profiles(&mut self, dir: impl AsRef<Path>) -> PolicyResult<Vec<ParsedProfiles>> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| PolicyError::io(dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PolicyError::io(dir, e))?.path();
            if path.is_dir() || is_skippable_dir(&path) || is_skippable_file(&path) {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        let mut parsed = Vec::with_capacity(paths.len());
        for path in paths {
            parsed.push(self.parse_profile_file(&path)?);
        }
        log::info!("Profiles read | dir: {} | files: {}", dir.display(), parsed.len());
        Ok(parsed)
    }

    // ===== include 结果汇总 =====

    /// include 规则（递归）引用的所有片段文件名，按首次出现排序、去重
    pub fn included_files(&self, includes: &IncludeRuleset) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut files = Vec::new();
        self.walk_includes(includes, &mut seen, &mut |path, _| files.push(path.display().to_string()));
        files
    }

    /// include 规则（递归）引入的全部规则
    pub fn included_rules(&self, includes: &IncludeRuleset) -> ScopeRules {
        let mut seen = FxHashSet::default();
        let mut merged = ScopeRules::default();
        self.walk_includes(includes, &mut seen, &mut |_, fragment| merged.merge(&fragment.rules));
        merged
    }

    fn walk_includes<'a>(
        &'a self,
        includes: &IncludeRuleset,
        seen: &mut FxHashSet<&'a Path>,
        visit: &mut dyn FnMut(&Path, &IncludeFragment),
    ) {
        for rule in includes {
            for path in rule.get_full_paths(&self.config.profile_dir) {
                let Some((key, fragment)) = self.include_memo.get_key_value(&include_key(&path)) else {
                    continue;
                };
                if !seen.insert(key.as_path()) {
                    continue;
                }
                visit(key, fragment);
                self.walk_includes(&fragment.rules.include, seen, visit);
            }
        }
    }
}

/// include 缓存键：存在的文件取 canonicalize 结果，否则取绝对路径
fn include_key(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
