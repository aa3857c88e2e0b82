use crate::domain::model::{DefectCategory, ScoreReport, Verdict};
use crate::utils::error::{BenchError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;
use zip::write::{FileOptions, ZipWriter};

pub const REPORT_FORMATS: [&str; 2] = ["json", "csv"];
pub const JSON_REPORT_FILE: &str = "report.json";
pub const CATEGORY_CSV_FILE: &str = "per_category.csv";
pub const FRAGMENTS_CSV_FILE: &str = "fragments.csv";
pub const DEFAULT_ARCHIVE_FILE: &str = "bench_report.zip";

/// stdout 的輸出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// `report.json` 的內容：報表本體加上執行資訊
#[derive(Debug, Serialize)]
pub struct ReportDocument<'a> {
    pub generated_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub corpus: &'a str,
    pub threshold: f64,
    pub accuracy: f64,
    pub passed: bool,
    pub report: &'a ScoreReport,
}

impl<'a> ReportDocument<'a> {
    pub fn new(report: &'a ScoreReport, corpus: &'a str, threshold: f64, elapsed: Duration) -> Self {
        Self {
            generated_at: Utc::now(),
            execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            corpus,
            threshold,
            accuracy: report.accuracy(),
            passed: passed(report, threshold),
            report,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 部分（被取消的）報表一律不算通過
pub fn passed(report: &ScoreReport, threshold: f64) -> bool {
    report.is_complete() && report.meets_threshold(threshold)
}

pub fn render_text(report: &ScoreReport, threshold: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>6} {:>8} {:>8} {:>4} {:>4} {:>9}",
        "Category", "Total", "Correct", "Unknown", "FP", "FN", "Accuracy"
    );
    for (category, score) in report.per_category() {
        let _ = writeln!(
            out,
            "{:<16} {:>6} {:>8} {:>8} {:>4} {:>4} {:>8.1}%",
            category.as_str(),
            score.total,
            score.correct,
            score.unknown,
            score.false_positives,
            score.false_negatives,
            score.accuracy()
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Overall: {}/{} correct ({:.1}%), {} unknown, {} misclassified",
        report.correct(),
        report.total(),
        report.accuracy(),
        report.unknown(),
        report.misclassified()
    );

    let wrong: Vec<_> = report.outcomes().iter().filter(|o| !o.is_correct()).collect();
    if !wrong.is_empty() {
        let _ = writeln!(out);
        for outcome in wrong {
            let marker = if outcome.actual == Verdict::Unknown { "?" } else { "✗" };
            let _ = writeln!(
                out,
                "  {} {} [{}] expected {}, got {}",
                marker, outcome.id, outcome.category, outcome.expected, outcome.actual
            );
        }
    }

    if !report.is_complete() {
        let _ = writeln!(out, "\n⚠️  Partial report: the run was cancelled");
    }
    let status = if passed(report, threshold) { "PASS" } else { "FAIL" };
    let _ = writeln!(out, "Threshold {:.1}%: {}", threshold, status);
    out
}

#[derive(Serialize)]
struct CategoryRow {
    category: DefectCategory,
    total: usize,
    correct: usize,
    unknown: usize,
    false_positives: usize,
    false_negatives: usize,
    accuracy: String,
}

#[derive(Serialize)]
struct FragmentRow<'a> {
    id: &'a str,
    category: DefectCategory,
    expected: Verdict,
    actual: Verdict,
    correct: bool,
}

pub fn per_category_csv(report: &ScoreReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for (category, score) in report.per_category() {
        writer.serialize(CategoryRow {
            category: *category,
            total: score.total,
            correct: score.correct,
            unknown: score.unknown,
            false_positives: score.false_positives,
            false_negatives: score.false_negatives,
            accuracy: format!("{:.2}", score.accuracy()),
        })?;
    }
    finish_csv(writer)
}

pub fn fragments_csv(report: &ScoreReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for outcome in report.outcomes() {
        writer.serialize(FragmentRow {
            id: &outcome.id,
            category: outcome.category,
            expected: outcome.expected,
            actual: outcome.actual,
            correct: outcome.is_correct(),
        })?;
    }
    finish_csv(writer)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| BenchError::IoError(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| BenchError::ProcessingError {
        message: format!("CSV output is not valid UTF-8: {}", e),
    })
}

/// 把已產生的報表檔打包成一個 zip
pub fn bundle_zip(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    tracing::debug!("Creating ZIP file with {} files", files.len());

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in files {
        zip.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
        zip.write_all(data)?;
    }

    // 完成並取回底層 Vec<u8>
    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}
