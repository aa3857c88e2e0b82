use crate::core::corpus::CorpusFormat;
use crate::core::report::{DEFAULT_ARCHIVE_FILE, REPORT_FORMATS};
use crate::core::{ConfigProvider, ReportSettings};
use crate::domain::model::DefectCategory;
use crate::utils::error::{BenchError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub harness: HarnessSection,
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub report: ReportSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessSection {
    pub name: Option<String>,
    pub corpus_path: Option<String>,
    /// 百分比，預設 100
    pub threshold: Option<f64>,
    #[serde(default, deserialize_with = "lenient_categories")]
    pub categories: Vec<DefectCategory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesSection {
    #[serde(default, deserialize_with = "lenient_categories")]
    pub disabled: Vec<DefectCategory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSection {
    pub output_dir: Option<String>,
    pub formats: Option<Vec<String>>,
    pub archive: Option<ArchiveConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub filename: Option<String>,
}

/// 類別名稱用與語料相同的寬鬆解析（`buffer_overflow` 也可以）
fn lenient_categories<'de, D>(deserializer: D) -> std::result::Result<Vec<DefectCategory>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(deserializer)?
        .iter()
        .map(|name| name.parse().map_err(serde::de::Error::custom))
        .collect()
}

impl HarnessConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BenchError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| BenchError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CORPUS_DIR})；未設定的變數保留原文
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// 命令列參數優先於設定檔
    #[cfg(feature = "cli")]
    pub fn with_cli_overrides(mut self, cli: &crate::config::CliConfig) -> Self {
        if let Some(corpus) = &cli.corpus {
            self.harness.corpus_path = Some(corpus.clone());
        }
        if let Some(threshold) = cli.threshold {
            self.harness.threshold = Some(threshold);
        }
        if !cli.category.is_empty() {
            self.harness.categories = cli.category.clone();
        }
        for category in &cli.disable_rule {
            if !self.rules.disabled.contains(category) {
                self.rules.disabled.push(*category);
            }
        }
        if let Some(dir) = &cli.output_dir {
            self.report.output_dir = Some(dir.clone());
        }
        if let Some(archive) = &cli.archive {
            self.report.archive = Some(ArchiveConfig {
                enabled: true,
                filename: Some(archive.clone()),
            });
        }
        self
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if let Some(name) = &self.harness.name {
            validation::validate_non_empty_string("harness.name", name)?;
        }

        let corpus = validation::validate_required_field("harness.corpus_path", &self.harness.corpus_path)?;
        validation::validate_non_empty_string("harness.corpus_path", corpus)?;
        validation::validate_path("harness.corpus_path", corpus)?;
        if corpus.contains("${") {
            return Err(BenchError::ConfigValidationError {
                field: "harness.corpus_path".to_string(),
                message: format!("Unresolved environment variable in '{}'", corpus),
            });
        }
        validation::validate_file_extensions(
            "harness.corpus_path",
            std::slice::from_ref(corpus),
            &CorpusFormat::EXTENSIONS,
        )?;

        validation::validate_range("harness.threshold", self.threshold(), 0.0, 100.0)?;

        if let Some(dir) = &self.report.output_dir {
            validation::validate_path("report.output_dir", dir)?;
        }
        if let Some(formats) = &self.report.formats {
            validation::validate_one_of("report.formats", formats, &REPORT_FORMATS)?;
        }
        if let Some(filename) = self.archive_filename() {
            validation::validate_file_extensions("report.archive.filename", &[filename], &["zip"])?;
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        self.harness.name.as_deref().unwrap_or("defect-bench")
    }

    fn archive_filename(&self) -> Option<String> {
        self.report
            .archive
            .as_ref()
            .filter(|archive| archive.enabled)
            .map(|archive| {
                archive
                    .filename
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ARCHIVE_FILE.to_string())
            })
    }
}

impl ConfigProvider for HarnessConfig {
    fn corpus_path(&self) -> &str {
        self.harness.corpus_path.as_deref().unwrap_or_default()
    }

    fn categories(&self) -> &[DefectCategory] {
        &self.harness.categories
    }

    fn threshold(&self) -> f64 {
        self.harness.threshold.unwrap_or(100.0)
    }

    fn disabled_rules(&self) -> &[DefectCategory] {
        &self.rules.disabled
    }

    fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            output_dir: self.report.output_dir.clone(),
            formats: self
                .report
                .formats
                .clone()
                .unwrap_or_else(|| REPORT_FORMATS.iter().map(|f| f.to_string()).collect()),
            archive_filename: self.archive_filename(),
        }
    }
}

impl Validate for HarnessConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[harness]
name = "fixtures"
corpus_path = "bench/corpus.toml"
threshold = 90.0
categories = ["buffer_overflow", "NullDeref"]

[rules]
disabled = ["DataRace"]

[report]
output_dir = "./bench-report"
formats = ["json"]

[report.archive]
enabled = true
"#;

        let config = HarnessConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.name(), "fixtures");
        assert_eq!(config.corpus_path(), "bench/corpus.toml");
        assert_eq!(config.threshold(), 90.0);
        assert_eq!(
            config.categories(),
            &[DefectCategory::BufferOverflow, DefectCategory::NullDeref]
        );
        assert_eq!(config.disabled_rules(), &[DefectCategory::DataRace]);
        assert_eq!(
            config.report_settings(),
            ReportSettings {
                output_dir: Some("./bench-report".to_string()),
                formats: vec!["json".to_string()],
                archive_filename: Some(DEFAULT_ARCHIVE_FILE.to_string()),
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = HarnessConfig::from_toml_str("[harness]\ncorpus_path = \"c.json\"\n").unwrap();
        assert_eq!(config.threshold(), 100.0);
        assert!(config.categories().is_empty());
        assert_eq!(config.report_settings().formats, vec!["json", "csv"]);
        assert_eq!(config.report_settings().archive_filename, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("DEFECT_BENCH_TEST_CORPUS_DIR", "/data/bench");

        let toml_content = r#"
[harness]
corpus_path = "${DEFECT_BENCH_TEST_CORPUS_DIR}/corpus.csv"
"#;

        let config = HarnessConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.corpus_path(), "/data/bench/corpus.csv");

        std::env::remove_var("DEFECT_BENCH_TEST_CORPUS_DIR");
    }

    #[test]
    fn test_unset_env_var_fails_validation() {
        let toml_content = r#"
[harness]
corpus_path = "${DEFECT_BENCH_TEST_NEVER_SET}/corpus.csv"
"#;
        let config = HarnessConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        let missing_corpus = HarnessConfig::from_toml_str("[harness]\nthreshold = 50.0\n").unwrap();
        assert!(matches!(
            missing_corpus.validate(),
            Err(BenchError::MissingConfigError { .. })
        ));

        let bad_threshold =
            HarnessConfig::from_toml_str("[harness]\ncorpus_path = \"c.toml\"\nthreshold = 101.0\n").unwrap();
        assert!(bad_threshold.validate().is_err());

        let bad_format = HarnessConfig::from_toml_str(
            "[harness]\ncorpus_path = \"c.toml\"\n[report]\nformats = [\"xml\"]\n",
        )
        .unwrap();
        assert!(bad_format.validate().is_err());
    }

    #[test]
    fn test_unknown_category_fails_parsing() {
        let result = HarnessConfig::from_toml_str("[harness]\ncategories = [\"StackSmash\"]\n");
        assert!(matches!(result, Err(BenchError::ConfigValidationError { .. })));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_cli_overrides_file_values() {
        use crate::config::CliConfig;
        use clap::Parser;

        let config = HarnessConfig::from_toml_str(
            "[harness]\ncorpus_path = \"file.toml\"\nthreshold = 80.0\n[rules]\ndisabled = [\"DataRace\"]\n",
        )
        .unwrap();
        let cli = CliConfig::parse_from([
            "defect-bench",
            "cli.json",
            "--disable-rule",
            "UnsafeCast,DataRace",
            "--archive",
            "all.zip",
        ]);

        let merged = config.with_cli_overrides(&cli);
        assert_eq!(merged.corpus_path(), "cli.json");
        assert_eq!(merged.threshold(), 80.0);
        assert_eq!(
            merged.disabled_rules(),
            &[DefectCategory::DataRace, DefectCategory::UnsafeCast]
        );
        assert_eq!(merged.report_settings().archive_filename, Some("all.zip".to_string()));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[harness]\nname = \"file-test\"\ncorpus_path = \"corpus.toml\"\n")
            .unwrap();

        let config = HarnessConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.name(), "file-test");
    }
}
