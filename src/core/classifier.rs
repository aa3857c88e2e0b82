use crate::domain::model::{Fragment, Verdict};
use crate::rules::{builtin_rules, RuleSet};

/// 依 fragment 的類別查規則並判定
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'r> {
    rules: &'r RuleSet,
}

impl<'r> Classifier<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self { rules }
    }

    /// 沒有對應規則時回傳 `Unknown`；不會失敗
    pub fn classify(&self, fragment: &Fragment) -> Verdict {
        match self.rules.lookup_rule(fragment.category()) {
            Some(rule) => {
                let verdict = rule.apply(fragment);
                tracing::debug!("🔎 {} [{}] → {}", fragment.id(), fragment.category(), verdict);
                verdict
            }
            None => {
                tracing::warn!("❔ {} [{}] has no rule", fragment.id(), fragment.category());
                Verdict::Unknown
            }
        }
    }
}

impl Default for Classifier<'static> {
    fn default() -> Self {
        Self::new(builtin_rules())
    }
}
