pub mod config;
pub mod core;
pub mod domain;
pub mod rules;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{cli::LocalStorage, toml_config::HarnessConfig};

pub use core::{
    classifier::Classifier,
    corpus::{load_corpus, CorpusFormat},
    engine::{BenchEngine, BenchRun},
    extract::extract_fragments,
    harness::{CancelToken, ScoringHarness},
    pipeline::BenchPipeline,
};
pub use domain::model::{DefectCategory, Fragment, ScoreReport, Verdict};
pub use rules::{builtin_rules, Rule, RuleSet};
pub use utils::error::{BenchError, Result};
