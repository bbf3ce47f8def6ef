//! 解析器配置，可由代码构建或从 JSON 文件加载

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aare::Pattern;
use crate::error::{PolicyError, PolicyResult};

/// 必须存在的 hat：名称匹配 `profile_glob` 的 profile 解析后补齐缺失的 hat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredHats {
    pub profile_glob: String,
    #[serde(default)]
    pub hats: Vec<String>,
}

impl RequiredHats {
    /// profile 名称是否匹配；通配符非法时视为不匹配
    pub fn applies_to(&self, profile_name: &str) -> bool {
        Pattern::new(self.profile_glob.as_str(), false)
            .map(|pattern| pattern.glob() == profile_name || pattern.matches(profile_name))
            .unwrap_or(false)
    }
}

/// 解析器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 相对 include（`<abstractions/base>`）的搜索根目录
    pub profile_dir: PathBuf,
    /// 是否展开并解析 include 片段
    pub resolve_includes: bool,
    pub required_hats: Vec<RequiredHats>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            profile_dir: PathBuf::from("/etc/apparmor.d"),
            resolve_includes: true,
            required_hats: Vec::new(),
        }
    }
}

impl ParserConfig {
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder::new()
    }

    pub fn from_json_str(json: &str) -> PolicyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PolicyError::io(path, e))?;
        let config = Self::from_json_str(&text)?;
        log::debug!("Parser config loaded | path: {}", path.display());
        Ok(config)
    }

    /// 指定 profile 必须存在的所有 hat
    pub fn required_hats_for(&self, profile_name: &str) -> Vec<&str> {
        self.required_hats
            .iter()
            .filter(|entry| entry.applies_to(profile_name))
            .flat_map(|entry| entry.hats.iter().map(String::as_str))
            .collect()
    }
}

/// 配置构建器
#[derive(Debug, Clone, Default)]
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl ParserConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.profile_dir = dir.into();
        self
    }

    pub fn resolve_includes(mut self, resolve: bool) -> Self {
        self.config.resolve_includes = resolve;
        self
    }

    pub fn required_hats(mut self, profile_glob: &str, hats: &[&str]) -> Self {
        self.config.required_hats.push(RequiredHats {
            profile_glob: profile_glob.to_string(),
            hats: hats.iter().map(|hat| hat.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> ParserConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ParserConfig::default();
        assert_eq!(config.profile_dir, PathBuf::from("/etc/apparmor.d"));
        assert!(config.resolve_includes);
        assert!(config.required_hats.is_empty());
    }

    #[test]
    fn test_builder_and_required_hats() {
        let config = ParserConfig::builder()
            .profile_dir("/tmp/profiles")
            .resolve_includes(false)
            .required_hats("/usr/sbin/apache2*", &["DEFAULT_URI", "HANDLING_UNTRUSTED_INPUT"])
            .build();
        assert_eq!(config.profile_dir, PathBuf::from("/tmp/profiles"));
        assert!(!config.resolve_includes);
        assert_eq!(config.required_hats_for("/usr/sbin/apache2").len(), 2);
        assert!(config.required_hats_for("/usr/sbin/nginx").is_empty());
    }

    #[test]
    fn test_json_config() {
        // 测试场景：缺省字段回退到默认值
        let config = ParserConfig::from_json_str(r#"{"resolve_includes": false}"#).unwrap();
        assert!(!config.resolve_includes);
        assert_eq!(config.profile_dir, PathBuf::from("/etc/apparmor.d"));

        let full = ParserConfig::from_json_str(
            r#"{"profile_dir": "/x", "required_hats": [{"profile_glob": "/bin/foo", "hats": ["a"]}]}"#,
        )
        .unwrap();
        assert_eq!(full.required_hats_for("/bin/foo"), vec!["a"]);

        assert!(matches!(ParserConfig::from_json_str("{"), Err(PolicyError::Config(_))));
    }

    #[test]
    fn test_json_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parser.json");
        std::fs::write(&path, r#"{"profile_dir": "/srv/apparmor"}"#).unwrap();
        let config = ParserConfig::from_json_file(&path).unwrap();
        assert_eq!(config.profile_dir, PathBuf::from("/srv/apparmor"));
        assert!(matches!(
            ParserConfig::from_json_file(dir.path().join("missing.json")),
            Err(PolicyError::Io { .. })
        ));
    }
}
