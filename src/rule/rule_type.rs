use std::fmt::Debug;

use crate::core::{indent, RuleBase, RuleKind, Severity, SeverityDb, Text};
use crate::error::PolicyResult;

/// 所有规则类型共享的契约
/// 具体类型只需提供语法识别、解析、规范输出与本类型字段的比较逻辑，
/// 修饰符（audit/deny）层面的判定由默认方法统一完成
pub trait RuleType: Clone + Debug {
    const KIND: RuleKind;

    /// 廉价的语法预检，供解析器选择规则类型；从不报错
    fn matches(raw: &str) -> bool;

    /// 完整解析一条语句
    fn parse(raw: &str) -> PolicyResult<Self>;

    fn base(&self) -> &RuleBase;

    fn base_mut(&mut self) -> &mut RuleBase;

    /// 不带缩进的规范形式
    fn clean(&self) -> String;

    /// 本类型字段层面的覆盖判定
    fn is_covered_local(&self, other: &Self) -> bool;

    /// 本类型字段层面的相等判定
    fn is_equal_local(&self, other: &Self, strict: bool) -> bool;

    fn severity(&self, _db: &dyn SeverityDb) -> Severity {
        Severity::NotImplemented
    }

    fn get_clean(&self, depth: usize) -> String {
        format!("{}{}", indent(depth), self.clean())
    }

    /// 未修改时返回原文，否则回退到规范形式
    fn get_raw(&self, depth: usize) -> String {
        match &self.base().raw {
            Text::Pristine(raw) => format!("{}{}", indent(depth), raw),
            Text::Stale => self.get_clean(depth),
        }
    }

    fn is_covered(&self, other: &Self, check_allow_deny: bool, check_audit: bool) -> bool {
        self.base()
            .is_covered(other.base(), check_allow_deny, check_audit)
            && self.is_covered_local(other)
    }

    fn is_equal(&self, other: &Self, strict: bool) -> bool {
        self.base().is_equal(other.base(), strict) && self.is_equal_local(other, strict)
    }

    fn set_audit(&mut self, audit: bool) {
        let base = self.base_mut();
        if base.audit != audit {
            base.audit = audit;
            base.mark_stale();
        }
    }

    /// deny 与 allow 关键字互斥，设置 deny 时清除 allow 关键字
    fn set_deny(&mut self, deny: bool) {
        let base = self.base_mut();
        if base.deny != deny {
            base.deny = deny;
            if deny {
                base.allow_keyword = false;
            }
            base.mark_stale();
        }
    }
}
