//! 去重统计

/// 一次去重操作的统计信息
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    /// 去重前规则数
    pub total_before: usize,
    /// 被 include 片段覆盖而删除的规则数
    pub removed_by_include: usize,
    /// 被同一规则集中其他规则覆盖而删除的规则数
    pub removed_internal: usize,
}

impl DedupStats {
    pub fn removed(&self) -> usize {
        self.removed_by_include + self.removed_internal
    }

    pub fn kept(&self) -> usize {
        self.total_before.saturating_sub(self.removed())
    }

    /// 累加另一份统计（注册表批量去重时汇总）
    pub fn merge(&mut self, other: &DedupStats) {
        self.total_before += other.total_before;
        self.removed_by_include += other.removed_by_include;
        self.removed_internal += other.removed_internal;
    }

    pub fn print_stats(&self, scope: &str) {
        if self.total_before == 0 {
            return;
        }
        log::debug!(
            "Dedup completed | scope: {} | before: {} | kept: {} | covered by include: {} | covered internally: {}",
            scope,
            self.total_before,
            self.kept(),
            self.removed_by_include,
            self.removed_internal
        );
    }
}
