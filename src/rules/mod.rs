// 缺陷類別 → 偵測規則

pub mod lexer;
pub mod patterns;
pub mod predicates;

use crate::domain::model::{DefectCategory, Fragment, Verdict};
use crate::utils::error::{BenchError, Result};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub type Predicate = fn(&Fragment) -> Verdict;

static BUILTIN_RULES: LazyLock<RuleSet> = LazyLock::new(RuleSet::with_builtin_rules);

/// 內建規則集（唯讀，程式啟動後共用）
pub fn builtin_rules() -> &'static RuleSet {
    &BUILTIN_RULES
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    category: DefectCategory,
    predicate: Predicate,
}

impl Rule {
    pub fn new(category: DefectCategory, predicate: Predicate) -> Self {
        Self {
            category,
            predicate,
        }
    }

    pub fn category(&self) -> DefectCategory {
        self.category
    }

    pub fn apply(&self, fragment: &Fragment) -> Verdict {
        (self.predicate)(fragment)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<DefectCategory, Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One rule per category for all eight categories.
    pub fn with_builtin_rules() -> Self {
        let builtin: [(DefectCategory, Predicate); 8] = [
            (DefectCategory::BufferOverflow, predicates::buffer_overflow),
            (DefectCategory::NullDeref, predicates::null_deref),
            (DefectCategory::IntegerOverflow, predicates::integer_overflow),
            (DefectCategory::DivisionByZero, predicates::division_by_zero),
            (DefectCategory::DataRace, predicates::data_race),
            (DefectCategory::MemoryLeak, predicates::memory_leak),
            (DefectCategory::UnboundedLoop, predicates::unbounded_loop),
            (DefectCategory::UnsafeCast, predicates::unsafe_cast),
        ];

        let mut rules = BTreeMap::new();
        for (category, predicate) in builtin {
            rules.entry(category).or_insert(Rule::new(category, predicate));
        }
        Self { rules }
    }

    /// 註冊規則；類別已存在時回傳 DuplicateRuleError，原規則保留
    pub fn register_rule(&mut self, category: DefectCategory, predicate: Predicate) -> Result<&Rule> {
        if self.rules.contains_key(&category) {
            return Err(BenchError::DuplicateRuleError { category });
        }
        tracing::debug!("📐 registered rule for {}", category);
        Ok(self
            .rules
            .entry(category)
            .or_insert(Rule::new(category, predicate)))
    }

    pub fn lookup_rule(&self, category: DefectCategory) -> Option<&Rule> {
        self.rules.get(&category)
    }

    /// A copy without the given categories (`--disable-rule`).
    pub fn without(&self, disabled: &[DefectCategory]) -> Self {
        let rules = self
            .rules
            .iter()
            .filter(|(category, _)| !disabled.contains(category))
            .map(|(category, rule)| (*category, *rule))
            .collect();
        Self { rules }
    }

    pub fn categories(&self) -> impl Iterator<Item = DefectCategory> + '_ {
        self.rules.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_unsafe(_: &Fragment) -> Verdict {
        Verdict::Unsafe
    }

    fn always_safe(_: &Fragment) -> Verdict {
        Verdict::Safe
    }

    #[test]
    fn test_builtin_rules_cover_every_category() {
        let rules = builtin_rules();
        assert_eq!(rules.len(), DefectCategory::ALL.len());
        for category in DefectCategory::ALL {
            assert_eq!(rules.lookup_rule(category).map(Rule::category), Some(category));
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_first_rule() {
        let mut rules = RuleSet::new();
        rules
            .register_rule(DefectCategory::IntegerOverflow, always_unsafe)
            .unwrap();

        let err = rules
            .register_rule(DefectCategory::IntegerOverflow, always_safe)
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::DuplicateRuleError {
                category: DefectCategory::IntegerOverflow
            }
        ));

        let fragment = Fragment::new("f", DefectCategory::IntegerOverflow, "a + b", Verdict::Unsafe).unwrap();
        let rule = rules.lookup_rule(DefectCategory::IntegerOverflow).unwrap();
        assert_eq!(rule.apply(&fragment), Verdict::Unsafe);
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_lookup_missing_rule() {
        let rules = RuleSet::new();
        assert!(rules.lookup_rule(DefectCategory::DataRace).is_none());
        assert!(rules.is_empty());
    }

    #[test]
    fn test_without_drops_disabled_categories() {
        let rules = builtin_rules().without(&[DefectCategory::UnsafeCast, DefectCategory::DataRace]);
        assert_eq!(rules.len(), 6);
        assert!(rules.lookup_rule(DefectCategory::UnsafeCast).is_none());
        assert!(rules.lookup_rule(DefectCategory::NullDeref).is_some());
    }
}
