use crate::core::extract::extract_fragments;
use crate::domain::model::{DefectCategory, Fragment, Verdict};
use crate::utils::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 語料格式，依副檔名判斷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusFormat {
    Toml,
    Json,
    Csv,
    /// `.c` / `.h` fixtures, fragments come from function names
    CSource,
}

impl CorpusFormat {
    pub const EXTENSIONS: [&'static str; 5] = ["toml", "json", "csv", "c", "h"];

    pub fn from_path(path: &str) -> Result<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("toml") => Ok(CorpusFormat::Toml),
            Some("json") => Ok(CorpusFormat::Json),
            Some("csv") => Ok(CorpusFormat::Csv),
            Some("c") | Some("h") => Ok(CorpusFormat::CSource),
            _ => Err(BenchError::InvalidConfigValueError {
                field: "corpus_path".to_string(),
                value: path.to_string(),
                reason: format!(
                    "Unsupported corpus format. Valid extensions: {}",
                    Self::EXTENSIONS.join(", ")
                ),
            }),
        }
    }
}

/// 尚未驗證的原始紀錄，欄位全部可缺
#[derive(Debug, Default, Deserialize)]
struct RawFragment {
    id: Option<String>,
    category: Option<String>,
    #[serde(alias = "sourceText", alias = "source")]
    source_text: Option<String>,
    #[serde(alias = "expectedVerdict", alias = "expected")]
    expected_verdict: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlCorpus {
    #[serde(default)]
    fragments: Vec<RawFragment>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonCorpus {
    List(Vec<RawFragment>),
    Wrapped { fragments: Vec<RawFragment> },
}

#[derive(Serialize)]
struct CorpusFile<'a> {
    fragments: &'a [Fragment],
}

/// 解析語料文字；任何一筆有問題整批失敗
pub fn load_corpus(text: &str, format: CorpusFormat, origin: &str) -> Result<Vec<Fragment>> {
    let raws = match format {
        CorpusFormat::Toml => toml::from_str::<TomlCorpus>(text)?.fragments,
        CorpusFormat::Json => match serde_json::from_str::<JsonCorpus>(text)? {
            JsonCorpus::List(fragments) | JsonCorpus::Wrapped { fragments } => fragments,
        },
        CorpusFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::Headers)
                .from_reader(text.as_bytes());
            reader
                .deserialize::<RawFragment>()
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        CorpusFormat::CSource => return extract_fragments(text, origin),
    };

    let mut seen = HashSet::new();
    let mut fragments = Vec::with_capacity(raws.len());
    for (index, raw) in raws.into_iter().enumerate() {
        let fragment = into_fragment(raw, index)?;
        if !seen.insert(fragment.id().to_string()) {
            return Err(BenchError::CorpusFormatError {
                fragment: fragment.id().to_string(),
                reason: "appears more than once".to_string(),
            });
        }
        fragments.push(fragment);
    }

    tracing::debug!("📥 Parsed {} fragments from {}", fragments.len(), origin);
    Ok(fragments)
}

fn into_fragment(raw: RawFragment, index: usize) -> Result<Fragment> {
    let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    let label = present(raw.id.clone()).unwrap_or_else(|| format!("#{}", index + 1));
    let missing = |field: &str| BenchError::CorpusFormatError {
        fragment: label.clone(),
        reason: format!("is missing required field '{}'", field),
    };

    let id = present(raw.id).ok_or_else(|| missing("id"))?;
    let category = present(raw.category).ok_or_else(|| missing("category"))?;
    let source_text = present(raw.source_text).ok_or_else(|| missing("source_text"))?;
    let expected = present(raw.expected_verdict).ok_or_else(|| missing("expected_verdict"))?;

    let category: DefectCategory = category.parse().map_err(|e| BenchError::CorpusFormatError {
        fragment: label.clone(),
        reason: format!("has an invalid category: {}", e),
    })?;
    let expected: Verdict = expected.parse().map_err(|e| BenchError::CorpusFormatError {
        fragment: label.clone(),
        reason: format!("has an invalid expected_verdict: {}", e),
    })?;

    Fragment::new(id.trim(), category, source_text, expected)
}

/// 只保留指定類別；空集合代表全部保留
pub fn filter_categories(fragments: Vec<Fragment>, categories: &[DefectCategory]) -> Vec<Fragment> {
    if categories.is_empty() {
        return fragments;
    }
    fragments
        .into_iter()
        .filter(|f| categories.contains(&f.category()))
        .collect()
}

/// 輸出成可再載入的 TOML 語料（`[[fragments]]`）
pub fn to_toml_corpus(fragments: &[Fragment]) -> Result<String> {
    Ok(toml::to_string_pretty(&CorpusFile { fragments })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TOML_CORPUS: &str = r#"
[[fragments]]
id = "bo-1"
category = "BufferOverflow"
source_text = "char b[4]; b[4] = 0;"
expected_verdict = "Unsafe"

[[fragments]]
id = "dz-1"
category = "division_by_zero"
sourceText = "int f(int a) { return a / 2; }"
expectedVerdict = "safe"
"#;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CorpusFormat::from_path("a/corpus.TOML").unwrap(), CorpusFormat::Toml);
        assert_eq!(CorpusFormat::from_path("fixtures/x.c").unwrap(), CorpusFormat::CSource);
        assert!(CorpusFormat::from_path("corpus.yaml").is_err());
    }

    #[test]
    fn test_load_toml_with_aliases() {
        let fragments = load_corpus(TOML_CORPUS, CorpusFormat::Toml, "corpus.toml").unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].category(), DefectCategory::DivisionByZero);
        assert_eq!(fragments[1].expected_verdict(), Verdict::Safe);
    }

    #[test]
    fn test_load_json_array_and_wrapped() {
        let list = r#"[{"id": "a", "category": "NullDeref", "source_text": "*p = 1;", "expected_verdict": "Unsafe"}]"#;
        let wrapped = r#"{"fragments": [{"id": "a", "category": "NullDeref", "sourceText": "*p = 1;", "expectedVerdict": "Unsafe"}]}"#;
        let a = load_corpus(list, CorpusFormat::Json, "list.json").unwrap();
        let b = load_corpus(wrapped, CorpusFormat::Json, "wrapped.json").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_csv() {
        let csv = "id,category,source_text,expected_verdict\nr1,DataRace,\"counter++;\",Unsafe\n";
        let fragments = load_corpus(csv, CorpusFormat::Csv, "corpus.csv").unwrap();
        assert_eq!(fragments[0].id(), "r1");
        assert_eq!(fragments[0].source_text(), "counter++;");
    }

    #[test]
    fn test_missing_field_aborts_whole_load() {
        let json = r#"[
            {"id": "ok", "category": "NullDeref", "source_text": "x", "expected_verdict": "Safe"},
            {"id": "bad", "category": "NullDeref", "expected_verdict": "Safe"}
        ]"#;
        let err = load_corpus(json, CorpusFormat::Json, "c.json").unwrap_err();
        match err {
            BenchError::CorpusFormatError { fragment, reason } => {
                assert_eq!(fragment, "bad");
                assert!(reason.contains("source_text"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_values_and_duplicates() {
        let unknown = r#"[{"id": "u", "category": "NullDeref", "source_text": "x", "expected_verdict": "Unknown"}]"#;
        assert!(matches!(
            load_corpus(unknown, CorpusFormat::Json, "u.json"),
            Err(BenchError::CorpusFormatError { .. })
        ));

        let bad_category = r#"[{"id": "c", "category": "StackSmash", "source_text": "x", "expected_verdict": "Safe"}]"#;
        assert!(load_corpus(bad_category, CorpusFormat::Json, "c.json").is_err());

        let dup = r#"[
            {"id": "d", "category": "NullDeref", "source_text": "x", "expected_verdict": "Safe"},
            {"id": "d", "category": "DataRace", "source_text": "y", "expected_verdict": "Safe"}
        ]"#;
        assert!(load_corpus(dup, CorpusFormat::Json, "d.json").is_err());
    }

    #[test]
    fn test_filter_and_toml_output() {
        let fragments = load_corpus(TOML_CORPUS, CorpusFormat::Toml, "corpus.toml").unwrap();
        let only_bo = filter_categories(fragments.clone(), &[DefectCategory::BufferOverflow]);
        assert_eq!(only_bo.len(), 1);
        assert_eq!(filter_categories(fragments.clone(), &[]).len(), 2);

        let written = to_toml_corpus(&fragments).unwrap();
        let reloaded = load_corpus(&written, CorpusFormat::Toml, "written.toml").unwrap();
        assert_eq!(reloaded, fragments);
    }
}
