//! 风险等级查询接口（外部协作者）

/// 规则的风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// 数据库给出的等级
    Rank(u8),
    /// 数据库中没有该条目
    Unknown,
    /// 该规则类型不参与评分
    NotImplemented,
}

impl Severity {
    /// 取两者中较高的风险（Unknown 低于任何已知等级）
    pub fn max(self, other: Severity) -> Severity {
        match (self, other) {
            (Severity::Rank(a), Severity::Rank(b)) => Severity::Rank(a.max(b)),
            (Severity::Rank(a), _) | (_, Severity::Rank(a)) => Severity::Rank(a),
            (Severity::Unknown, _) | (_, Severity::Unknown) => Severity::Unknown,
            _ => Severity::NotImplemented,
        }
    }
}

/// 风险数据库
pub trait SeverityDb {
    /// 路径 + 权限字符串的等级
    fn rank_path(&self, path: &str, perms: &str) -> Option<u8>;
    /// capability 名称的等级；ALL 以 `__ALL__` 查询
    fn rank_capability(&self, capability: &str) -> Option<u8>;
}

impl From<Option<u8>> for Severity {
    fn from(rank: Option<u8>) -> Self {
        rank.map_or(Severity::Unknown, Severity::Rank)
    }
}
