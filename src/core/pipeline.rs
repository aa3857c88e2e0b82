use crate::core::classifier::Classifier;
use crate::core::corpus::{filter_categories, load_corpus, CorpusFormat};
use crate::core::harness::{CancelToken, ScoringHarness};
use crate::core::report::{
    bundle_zip, fragments_csv, per_category_csv, ReportDocument, CATEGORY_CSV_FILE, FRAGMENTS_CSV_FILE,
    JSON_REPORT_FILE,
};
use crate::core::{ConfigProvider, Pipeline, Storage};
use crate::domain::model::{Fragment, ScoreReport};
use crate::rules::{builtin_rules, RuleSet};
use crate::utils::error::{BenchError, Result};
use std::path::Path;
use std::time::Duration;

/// 讀語料、評分、寫報表檔
pub struct BenchPipeline<S: Storage, C: ConfigProvider> {
    pub(crate) storage: S,
    pub(crate) config: C,
    rules: RuleSet,
    cancel: CancelToken,
}

impl<S: Storage, C: ConfigProvider> BenchPipeline<S, C> {
    pub fn new(storage: S, config: C) -> Self {
        let rules = builtin_rules().without(config.disabled_rules());
        for category in config.disabled_rules() {
            tracing::info!("🚫 Rule disabled: {}", category);
        }
        Self {
            storage,
            config,
            rules,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn output_path(dir: &str, name: &str) -> String {
        Path::new(dir).join(name).to_string_lossy().into_owned()
    }
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider> Pipeline for BenchPipeline<S, C> {
    async fn extract(&self) -> Result<Vec<Fragment>> {
        let corpus_path = self.config.corpus_path();
        let format = CorpusFormat::from_path(corpus_path)?;

        tracing::debug!("Reading corpus {} as {:?}", corpus_path, format);
        let bytes = self.storage.read_file(corpus_path).await?;
        let text = String::from_utf8(bytes).map_err(|e| BenchError::ValidationError {
            message: format!("Corpus {} is not valid UTF-8: {}", corpus_path, e),
        })?;

        let fragments = load_corpus(&text, format, corpus_path)?;
        let loaded = fragments.len();
        let fragments = filter_categories(fragments, self.config.categories());
        if fragments.len() != loaded {
            tracing::info!(
                "🔍 Category filter kept {} of {} fragments",
                fragments.len(),
                loaded
            );
        }
        Ok(fragments)
    }

    async fn score(&self, fragments: Vec<Fragment>) -> Result<ScoreReport> {
        let rules = self.rules.clone();
        let cancel = self.cancel.clone();

        // 分類是純 CPU 工作，不佔用 async worker
        tokio::task::spawn_blocking(move || {
            let classifier = Classifier::new(&rules);
            ScoringHarness::run_with_cancel(&fragments, &classifier, &cancel)
        })
        .await
        .map_err(|e| BenchError::ProcessingError {
            message: format!("Scoring task failed: {}", e),
        })
    }

    async fn report(&self, report: &ScoreReport, elapsed: Duration) -> Result<Vec<String>> {
        let settings = self.config.report_settings();
        let Some(output_dir) = settings.output_dir.as_deref() else {
            tracing::debug!("No output directory configured, skipping report files");
            return Ok(Vec::new());
        };

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for format in &settings.formats {
            match format.as_str() {
                "json" => {
                    let document = ReportDocument::new(
                        report,
                        self.config.corpus_path(),
                        self.config.threshold(),
                        elapsed,
                    );
                    files.push((JSON_REPORT_FILE.to_string(), document.to_json()?.into_bytes()));
                }
                "csv" => {
                    files.push((CATEGORY_CSV_FILE.to_string(), per_category_csv(report)?.into_bytes()));
                    files.push((FRAGMENTS_CSV_FILE.to_string(), fragments_csv(report)?.into_bytes()));
                }
                other => {
                    return Err(BenchError::InvalidConfigValueError {
                        field: "report.formats".to_string(),
                        value: other.to_string(),
                        reason: "Unsupported report format".to_string(),
                    })
                }
            }
        }

        let mut written = Vec::with_capacity(files.len() + 1);
        for (name, data) in &files {
            let path = Self::output_path(output_dir, name);
            tracing::debug!("Writing {} ({} bytes)", path, data.len());
            self.storage.write_file(&path, data).await?;
            written.push(path);
        }

        if let Some(archive) = settings.archive_filename.as_deref() {
            let zip_data = bundle_zip(&files)?;
            let path = Self::output_path(output_dir, archive);
            tracing::debug!("Writing ZIP file ({} bytes) to storage", zip_data.len());
            self.storage.write_file(&path, &zip_data).await?;
            written.push(path);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{DefectCategory, Verdict};
    use crate::domain::ports::ReportSettings;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStorage {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryStorage {
        fn with_file(path: &str, data: &str) -> Self {
            let storage = Self::default();
            storage
                .files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.as_bytes().to_vec());
            storage
        }

        fn names(&self) -> Vec<String> {
            let mut names: Vec<_> = self.files.lock().unwrap().keys().cloned().collect();
            names.sort();
            names
        }
    }

    impl Storage for MemoryStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned().ok_or_else(|| {
                BenchError::IoError(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files.lock().unwrap().insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    struct TestConfig {
        categories: Vec<DefectCategory>,
        disabled: Vec<DefectCategory>,
        report: ReportSettings,
    }

    impl ConfigProvider for TestConfig {
        fn corpus_path(&self) -> &str {
            "corpus.json"
        }

        fn categories(&self) -> &[DefectCategory] {
            &self.categories
        }

        fn threshold(&self) -> f64 {
            100.0
        }

        fn disabled_rules(&self) -> &[DefectCategory] {
            &self.disabled
        }

        fn report_settings(&self) -> ReportSettings {
            self.report.clone()
        }
    }

    const CORPUS: &str = r#"[
        {"id": "dz", "category": "DivisionByZero", "source_text": "int f(int a, int b) { return a / b; }", "expected_verdict": "Unsafe"},
        {"id": "np", "category": "NullDeref", "source_text": "void f(int *p) { if (p) *p = 1; }", "expected_verdict": "Safe"}
    ]"#;

    fn config() -> TestConfig {
        TestConfig {
            categories: Vec::new(),
            disabled: Vec::new(),
            report: ReportSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_extract_applies_category_filter() {
        let mut config = config();
        config.categories = vec![DefectCategory::NullDeref];
        let pipeline = BenchPipeline::new(MemoryStorage::with_file("corpus.json", CORPUS), config);

        let fragments = pipeline.extract().await.unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].id(), "np");
    }

    #[tokio::test]
    async fn test_disabled_rule_turns_unknown() {
        let mut config = config();
        config.disabled = vec![DefectCategory::DivisionByZero];
        let pipeline = BenchPipeline::new(MemoryStorage::with_file("corpus.json", CORPUS), config);

        let fragments = pipeline.extract().await.unwrap();
        let report = pipeline.score(fragments).await.unwrap();
        assert_eq!(report.total(), 2);
        assert_eq!(report.correct(), 1);
        assert_eq!(report.unknown(), 1);
        assert_eq!(report.outcomes()[0].actual, Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_report_writes_requested_files() {
        let mut config = config();
        config.report = ReportSettings {
            output_dir: Some("out".to_string()),
            formats: vec!["json".to_string(), "csv".to_string()],
            archive_filename: Some("bundle.zip".to_string()),
        };
        let pipeline = BenchPipeline::new(MemoryStorage::with_file("corpus.json", CORPUS), config);

        let fragments = pipeline.extract().await.unwrap();
        let report = pipeline.score(fragments).await.unwrap();
        let written = pipeline.report(&report, Duration::from_millis(42)).await.unwrap();

        assert_eq!(written.len(), 4);
        let names = pipeline.storage.names();
        for expected in ["out/bundle.zip", "out/fragments.csv", "out/per_category.csv", "out/report.json"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }

        let json = pipeline.storage.read_file("out/report.json").await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["execution_time_ms"], 42);
    }

    #[tokio::test]
    async fn test_no_output_dir_writes_nothing() {
        let pipeline = BenchPipeline::new(MemoryStorage::with_file("corpus.json", CORPUS), config());
        let report = ScoreReport::builder().finish(true);
        assert!(pipeline.report(&report, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(pipeline.storage.names(), vec!["corpus.json".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_token_yields_partial_report() {
        let pipeline = BenchPipeline::new(MemoryStorage::with_file("corpus.json", CORPUS), config());
        pipeline.cancel_token().cancel();

        let fragments = pipeline.extract().await.unwrap();
        let report = pipeline.score(fragments).await.unwrap();
        assert!(!report.is_complete());
    }
}
