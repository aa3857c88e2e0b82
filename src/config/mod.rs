pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use self::args::CliConfig;

#[cfg(feature = "cli")]
mod args {
    use crate::core::corpus::CorpusFormat;
    use crate::core::report::{OutputFormat, REPORT_FORMATS};
    use crate::core::{ConfigProvider, ReportSettings};
    use crate::domain::model::DefectCategory;
    use crate::utils::error::Result;
    use crate::utils::validation::{self, Validate};
    use clap::Parser;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, Parser)]
    #[command(name = "defect-bench")]
    #[command(about = "Score a rule-based C defect classifier against a labelled corpus")]
    pub struct CliConfig {
        /// Corpus file (.toml, .json, .csv, or a .c fixture)
        #[arg(value_name = "CORPUS")]
        pub corpus: Option<String>,

        /// Only score these categories (comma separated)
        #[arg(long, value_delimiter = ',')]
        pub category: Vec<DefectCategory>,

        /// Minimum overall accuracy in percent [default: 100]
        #[arg(long)]
        pub threshold: Option<f64>,

        /// TOML harness configuration; flags override its values
        #[arg(long)]
        pub config: Option<String>,

        /// Write report.json, per_category.csv and fragments.csv here
        #[arg(long)]
        pub output_dir: Option<String>,

        /// Also bundle the report files into this zip (needs --output-dir)
        #[arg(long)]
        pub archive: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        pub format: OutputFormat,

        /// Run without the rules for these categories (comma separated)
        #[arg(long, value_delimiter = ',')]
        pub disable_rule: Vec<DefectCategory>,

        /// Load and validate the corpus without scoring
        #[arg(long)]
        pub dry_run: bool,

        #[arg(long, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, help = "Emit logs as JSON lines")]
        pub log_json: bool,
    }

    impl ConfigProvider for CliConfig {
        fn corpus_path(&self) -> &str {
            self.corpus.as_deref().unwrap_or_default()
        }

        fn categories(&self) -> &[DefectCategory] {
            &self.category
        }

        fn threshold(&self) -> f64 {
            self.threshold.unwrap_or(100.0)
        }

        fn disabled_rules(&self) -> &[DefectCategory] {
            &self.disable_rule
        }

        fn report_settings(&self) -> ReportSettings {
            ReportSettings {
                output_dir: self.output_dir.clone(),
                formats: REPORT_FORMATS.iter().map(|f| f.to_string()).collect(),
                archive_filename: self.archive.clone(),
            }
        }
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            let corpus = validation::validate_required_field("corpus", &self.corpus)?;
            validation::validate_non_empty_string("corpus", corpus)?;
            validation::validate_path("corpus", corpus)?;
            validation::validate_file_extensions("corpus", std::slice::from_ref(corpus), &CorpusFormat::EXTENSIONS)?;

            validation::validate_range("threshold", self.threshold(), 0.0, 100.0)?;

            if let Some(dir) = &self.output_dir {
                validation::validate_path("output_dir", dir)?;
            }
            if let Some(archive) = &self.archive {
                validation::validate_file_extensions("archive", std::slice::from_ref(archive), &["zip"])?;
            }
            Ok(())
        }
    }

}
