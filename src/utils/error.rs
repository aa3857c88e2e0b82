use crate::domain::model::DefectCategory;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Corpus format error in fragment {fragment}: {reason}")]
    CorpusFormatError { fragment: String, reason: String },

    #[error("A rule is already registered for category {category}")]
    DuplicateRuleError { category: DefectCategory },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Corpus,
    Rules,
    Configuration,
    Io,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// 行程結束碼；失敗一律非 0
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl BenchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BenchError::CorpusFormatError { .. }
            | BenchError::CsvError(_)
            | BenchError::TomlError(_)
            | BenchError::SerializationError(_) => ErrorCategory::Corpus,
            BenchError::DuplicateRuleError { .. } => ErrorCategory::Rules,
            BenchError::ConfigError { .. }
            | BenchError::ConfigValidationError { .. }
            | BenchError::InvalidConfigValueError { .. }
            | BenchError::MissingConfigError { .. } => ErrorCategory::Configuration,
            BenchError::IoError(_) | BenchError::ZipError(_) => ErrorCategory::Io,
            BenchError::TomlSerializeError(_)
            | BenchError::ProcessingError { .. }
            | BenchError::ValidationError { .. } => ErrorCategory::Processing,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 規則集衝突代表程式本身有問題
            BenchError::DuplicateRuleError { .. } => ErrorSeverity::Critical,
            BenchError::IoError(_) | BenchError::ZipError(_) => ErrorSeverity::Medium,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            BenchError::CorpusFormatError { .. } => {
                "Every fragment needs id, category, source_text and expected_verdict (Safe or Unsafe)".to_string()
            }
            BenchError::DuplicateRuleError { category } => {
                format!("Register exactly one rule for {}", category)
            }
            BenchError::CsvError(_) => {
                "Check that the CSV corpus has a header row: id,category,source_text,expected_verdict".to_string()
            }
            BenchError::TomlError(_) => {
                "Check the TOML syntax; fragments go in [[fragments]] tables".to_string()
            }
            BenchError::SerializationError(_) => {
                "Check the JSON syntax; use an array of fragments or {\"fragments\": [...]}".to_string()
            }
            BenchError::IoError(_) => "Check that the path exists and is readable/writable".to_string(),
            BenchError::ZipError(_) => "Check free disk space in the output directory".to_string(),
            BenchError::ConfigError { .. }
            | BenchError::ConfigValidationError { .. }
            | BenchError::InvalidConfigValueError { .. }
            | BenchError::MissingConfigError { .. } => {
                "Review the configuration file and command line flags".to_string()
            }
            BenchError::TomlSerializeError(_)
            | BenchError::ProcessingError { .. }
            | BenchError::ValidationError { .. } => "Re-run with --verbose for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BenchError::CorpusFormatError { fragment, reason } => {
                format!("Corpus could not be loaded: fragment {} {}", fragment, reason)
            }
            BenchError::IoError(e) => format!("File access failed: {}", e),
            BenchError::MissingConfigError { field } => {
                format!("Missing setting '{}'", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
