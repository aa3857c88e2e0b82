use crate::utils::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 缺陷類別，每個 fragment 恰好屬於一個
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DefectCategory {
    BufferOverflow,
    NullDeref,
    IntegerOverflow,
    DivisionByZero,
    DataRace,
    MemoryLeak,
    UnboundedLoop,
    UnsafeCast,
}

impl DefectCategory {
    pub const ALL: [DefectCategory; 8] = [
        DefectCategory::BufferOverflow,
        DefectCategory::NullDeref,
        DefectCategory::IntegerOverflow,
        DefectCategory::DivisionByZero,
        DefectCategory::DataRace,
        DefectCategory::MemoryLeak,
        DefectCategory::UnboundedLoop,
        DefectCategory::UnsafeCast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefectCategory::BufferOverflow => "BufferOverflow",
            DefectCategory::NullDeref => "NullDeref",
            DefectCategory::IntegerOverflow => "IntegerOverflow",
            DefectCategory::DivisionByZero => "DivisionByZero",
            DefectCategory::DataRace => "DataRace",
            DefectCategory::MemoryLeak => "MemoryLeak",
            DefectCategory::UnboundedLoop => "UnboundedLoop",
            DefectCategory::UnsafeCast => "UnsafeCast",
        }
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefectCategory {
    type Err = String;

    /// 忽略大小寫與 `_`、`-`、空白：`buffer_overflow` 等同 `BufferOverflow`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        DefectCategory::ALL
            .iter()
            .copied()
            .find(|category| category.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("unknown defect category '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Safe,
    Unsafe,
    /// 沒有對應規則時的結果，不是錯誤
    Unknown,
}

impl Verdict {
    /// 由布林判斷轉成 Safe/Unsafe
    pub fn unsafe_if(flagged: bool) -> Self {
        if flagged {
            Verdict::Unsafe
        } else {
            Verdict::Safe
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Safe => "Safe",
            Verdict::Unsafe => "Unsafe",
            Verdict::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Verdict::Safe),
            "unsafe" => Ok(Verdict::Unsafe),
            "unknown" => Ok(Verdict::Unknown),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// 一個基準單元：程式片段加上預期判定。載入後不可變。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    id: String,
    category: DefectCategory,
    source_text: String,
    expected_verdict: Verdict,
}

impl Fragment {
    pub fn new(
        id: impl Into<String>,
        category: DefectCategory,
        source_text: impl Into<String>,
        expected_verdict: Verdict,
    ) -> Result<Self> {
        let id = id.into();
        if expected_verdict == Verdict::Unknown {
            return Err(BenchError::CorpusFormatError {
                fragment: id,
                reason: "has expected_verdict Unknown; only Safe or Unsafe is allowed".to_string(),
            });
        }
        Ok(Self {
            id,
            category,
            source_text: source_text.into(),
            expected_verdict,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> DefectCategory {
        self.category
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn expected_verdict(&self) -> Verdict {
        self.expected_verdict
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryScore {
    pub total: usize,
    pub correct: usize,
    /// 沒有規則可用的 fragment 數
    pub unknown: usize,
    /// 預期 Safe 卻判 Unsafe
    pub false_positives: usize,
    /// 預期 Unsafe 卻判 Safe
    pub false_negatives: usize,
}

impl CategoryScore {
    fn record(&mut self, expected: Verdict, actual: Verdict) {
        self.total += 1;
        match (expected, actual) {
            (_, Verdict::Unknown) => self.unknown += 1,
            (e, a) if e == a => self.correct += 1,
            (Verdict::Safe, Verdict::Unsafe) => self.false_positives += 1,
            (Verdict::Unsafe, Verdict::Safe) => self.false_negatives += 1,
            _ => {}
        }
    }

    pub fn accuracy(&self) -> f64 {
        percentage(self.correct, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentOutcome {
    pub id: String,
    pub category: DefectCategory,
    pub expected: Verdict,
    pub actual: Verdict,
}

impl FragmentOutcome {
    pub fn is_correct(&self) -> bool {
        self.expected == self.actual
    }
}

/// 一次評分的結果。由 [`ScoreReportBuilder`] 建立，建立後唯讀。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreReport {
    total: usize,
    correct: usize,
    unknown: usize,
    per_category: BTreeMap<DefectCategory, CategoryScore>,
    outcomes: Vec<FragmentOutcome>,
    completed: bool,
}

impl ScoreReport {
    pub fn builder() -> ScoreReportBuilder {
        ScoreReportBuilder::default()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn unknown(&self) -> usize {
        self.unknown
    }

    /// 有規則但判錯的數量
    pub fn misclassified(&self) -> usize {
        self.total - self.correct - self.unknown
    }

    pub fn per_category(&self) -> &BTreeMap<DefectCategory, CategoryScore> {
        &self.per_category
    }

    pub fn category(&self, category: DefectCategory) -> Option<&CategoryScore> {
        self.per_category.get(&category)
    }

    pub fn outcomes(&self) -> &[FragmentOutcome] {
        &self.outcomes
    }

    /// 中途取消的 run 為 false
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// 整體正確率（百分比）。空報表為 0。
    pub fn accuracy(&self) -> f64 {
        percentage(self.correct, self.total)
    }

    pub fn meets_threshold(&self, threshold_percent: f64) -> bool {
        self.accuracy() >= threshold_percent
    }
}

#[derive(Debug, Default)]
pub struct ScoreReportBuilder {
    per_category: BTreeMap<DefectCategory, CategoryScore>,
    outcomes: Vec<FragmentOutcome>,
}

impl ScoreReportBuilder {
    pub fn record(&mut self, fragment: &Fragment, actual: Verdict) {
        let expected = fragment.expected_verdict();
        self.per_category
            .entry(fragment.category())
            .or_default()
            .record(expected, actual);
        self.outcomes.push(FragmentOutcome {
            id: fragment.id().to_string(),
            category: fragment.category(),
            expected,
            actual,
        });
    }

    pub fn finish(self, completed: bool) -> ScoreReport {
        let (total, correct, unknown) = self
            .per_category
            .values()
            .fold((0, 0, 0), |(t, c, u), score| {
                (t + score.total, c + score.correct, u + score.unknown)
            });

        ScoreReport {
            total,
            correct,
            unknown,
            per_category: self.per_category,
            outcomes: self.outcomes,
            completed,
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
