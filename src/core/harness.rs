use crate::core::classifier::Classifier;
use crate::domain::model::{Fragment, ScoreReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 可跨執行緒共享的取消旗標（Ctrl-C 時設定）
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 評分：逐一分類並與預期比對
pub struct ScoringHarness;

impl ScoringHarness {
    pub fn run(fragments: &[Fragment], classifier: &Classifier<'_>) -> ScoreReport {
        Self::run_with_cancel(fragments, classifier, &CancelToken::new())
    }

    /// 每個 fragment 之間檢查取消；被取消時回傳已完成部分的報表
    pub fn run_with_cancel(
        fragments: &[Fragment],
        classifier: &Classifier<'_>,
        cancel: &CancelToken,
    ) -> ScoreReport {
        let mut builder = ScoreReport::builder();

        for (scored, fragment) in fragments.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "⏹️ Scoring cancelled after {}/{} fragments",
                    scored,
                    fragments.len()
                );
                return builder.finish(false);
            }
            let verdict = classifier.classify(fragment);
            builder.record(fragment, verdict);
        }

        builder.finish(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{DefectCategory, Verdict};
    use crate::rules::RuleSet;

    fn fragment(id: &str, category: DefectCategory, source: &str, expected: Verdict) -> Fragment {
        Fragment::new(id, category, source, expected).unwrap()
    }

    #[test]
    fn test_empty_run() {
        let report = ScoringHarness::run(&[], &Classifier::default());
        assert_eq!(report.total(), 0);
        assert_eq!(report.correct(), 0);
        assert!(report.per_category().is_empty());
        assert!(report.is_complete());
    }

    #[test]
    fn test_single_division_fragment() {
        let fragments = [fragment("d", DefectCategory::DivisionByZero, "a/b with no zero check", Verdict::Unsafe)];
        let report = ScoringHarness::run(&fragments, &Classifier::default());
        assert_eq!(report.total(), 1);
        assert_eq!(report.correct(), 1);
    }

    #[test]
    fn test_unknown_counts_against_its_category() {
        let mut rules = RuleSet::new();
        rules
            .register_rule(DefectCategory::DivisionByZero, crate::rules::predicates::division_by_zero)
            .unwrap();
        let classifier = Classifier::new(&rules);

        let fragments = [
            fragment("d", DefectCategory::DivisionByZero, "a/b with no zero check", Verdict::Unsafe),
            fragment("r", DefectCategory::DataRace, "counter++;", Verdict::Unsafe),
        ];
        let report = ScoringHarness::run(&fragments, &classifier);

        assert_eq!(report.total(), 2);
        assert_eq!(report.correct(), 1);
        assert_eq!(report.unknown(), 1);
        let race = report.category(DefectCategory::DataRace).unwrap();
        assert_eq!((race.total, race.correct, race.unknown), (1, 0, 1));
    }

    #[test]
    fn test_cancelled_run_is_partial() {
        let fragments = [fragment("d", DefectCategory::DivisionByZero, "a / 2", Verdict::Safe)];
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = ScoringHarness::run_with_cancel(&fragments, &Classifier::default(), &cancel);
        assert!(!report.is_complete());
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_run_is_deterministic() {
        let fragments = [
            fragment("a", DefectCategory::NullDeref, "int f(int *p) { return *p; }", Verdict::Unsafe),
            fragment("b", DefectCategory::MemoryLeak, "void f() { char *p = malloc(2); free(p); }", Verdict::Safe),
        ];
        let classifier = Classifier::default();
        assert_eq!(
            ScoringHarness::run(&fragments, &classifier),
            ScoringHarness::run(&fragments, &classifier)
        );
    }
}
