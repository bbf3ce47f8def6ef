//! rsapparmor 错误定义
//! 区分两类互不相交的错误：用户策略语法错误（可恢复）与内部不变量破坏（调用方 bug）
use std::path::PathBuf;

use thiserror::Error;

/// 语法错误在源文件中的位置（行号从 1 开始）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
}

/// 策略语法错误
/// 规则级解析只产生 message，解析器在错误离开解析流程前补齐文件名与行号
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Syntax error: {message}{}", location_suffix(.location))]
pub struct PolicySyntaxError {
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// 内部不变量被破坏（调用方传入了内部不一致的参数）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Internal invariant violated: {0}")]
pub struct InternalInvariantError(pub String);

fn location_suffix(location: &Option<SourceLocation>) -> String {
    match location {
        Some(loc) => format!(" (file: {}, line: {})", loc.file, loc.line),
        None => String::new(),
    }
}

/// 全局错误枚举
#[derive(Error, Debug)]
pub enum PolicyError {
    // ===================== 策略相关错误 =====================
    /// 用户输入的策略文本不合法
    #[error(transparent)]
    Syntax(#[from] PolicySyntaxError),

    /// 内部调用约束被违反
    #[error(transparent)]
    Internal(#[from] InternalInvariantError),

    /// 注册表合并冲突（重复的 profile 名称/attachment、变量冲突等）
    #[error("Registry conflict: {0}")]
    Conflict(String),

    // ===================== 基础错误 =====================
    #[error("IO operation failed on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse failed: {0}")]
    Config(#[from] serde_json::Error),
}

impl PolicyError {
    pub fn syntax(message: impl Into<String>) -> Self {
        PolicyError::Syntax(PolicySyntaxError {
            message: message.into(),
            location: None,
        })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PolicyError::Internal(InternalInvariantError(message.into()))
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PolicyError::Io {
            path: path.into(),
            source,
        }
    }

    /// 为尚未定位的语法错误补齐文件与行号；已定位的错误（来自嵌套 include）保持不变
    pub fn located(self, file: &str, line: usize) -> Self {
        match self {
            PolicyError::Syntax(mut err) => {
                if err.location.is_none() {
                    err.location = Some(SourceLocation {
                        file: file.to_string(),
                        line,
                    });
                }
                PolicyError::Syntax(err)
            }
            other => other,
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, PolicyError::Syntax(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, PolicyError::Internal(_))
    }

    /// 语法错误的位置信息
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            PolicyError::Syntax(err) => err.location.as_ref(),
            _ => None,
        }
    }
}

/// 全局 Result 类型
pub type PolicyResult<T> = Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_sets_location_once() {
        // 测试场景：外层解析器不能覆盖内层 include 已经写入的位置
        let err = PolicyError::syntax("bad rule").located("inner", 3).located("outer", 10);
        let loc = err.location().unwrap();
        assert_eq!(loc.file, "inner");
        assert_eq!(loc.line, 3);
        assert_eq!(
            err.to_string(),
            "Syntax error: bad rule (file: inner, line: 3)"
        );
    }

    #[test]
    fn test_internal_is_not_located() {
        let err = PolicyError::internal("empty permission list").located("f", 1);
        assert!(err.is_internal());
        assert!(err.location().is_none());
        assert_eq!(
            err.to_string(),
            "Internal invariant violated: empty permission list"
        );
    }
}
