// 函式名稱帶有預期結果（buffer_overflow_unsafe、safe_division），每個這樣的函式成為一個 fragment

use crate::domain::model::{DefectCategory, Fragment, Verdict};
use crate::rules::lexer::{FunctionDef, SourceView};
use crate::utils::error::Result;
use std::path::Path;

/// 名稱關鍵字 → 類別，依序比對，第一個命中者勝出
const CATEGORY_KEYWORDS: [(&[&str], DefectCategory); 8] = [
    (&["buffer"], DefectCategory::BufferOverflow),
    (&["null"], DefectCategory::NullDeref),
    (&["division", "divide", "zero"], DefectCategory::DivisionByZero),
    (&["leak"], DefectCategory::MemoryLeak),
    (&["increment", "race", "producer", "consumer"], DefectCategory::DataRace),
    (&["overflow"], DefectCategory::IntegerOverflow),
    (&["loop", "bound"], DefectCategory::UnboundedLoop),
    (&["cast"], DefectCategory::UnsafeCast),
];

pub fn category_from_name(name: &str) -> Option<DefectCategory> {
    let lower = name.to_ascii_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, category)| *category)
}

pub fn verdict_from_name(name: &str) -> Option<Verdict> {
    let lower = name.to_ascii_lowercase();
    let words: Vec<&str> = lower.split('_').collect();
    if words.iter().any(|w| *w == "unsafe" || *w == "violation") {
        Some(Verdict::Unsafe)
    } else if words.contains(&"safe") {
        Some(Verdict::Safe)
    } else {
        None
    }
}

pub fn extract_fragments(source: &str, origin: &str) -> Result<Vec<Fragment>> {
    let view = SourceView::new(source);
    let functions = view.functions();
    let stem = Path::new(origin)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("fragment");
    let context = file_scope_context(&view, &functions);

    let mut fragments = Vec::new();
    for function in &functions {
        if function.name == "main" {
            continue;
        }
        let (Some(category), Some(verdict)) = (category_from_name(function.name), verdict_from_name(function.name)) else {
            tracing::debug!("⏭️ {}::{} carries no expectation, skipped", stem, function.name);
            continue;
        };

        let body = function_text(&view, function);
        let source_text = if context.is_empty() {
            body.to_string()
        } else {
            format!("{}\n\n{}", context, body)
        };
        fragments.push(Fragment::new(
            format!("{}::{}", stem, function.name),
            category,
            source_text,
            verdict,
        )?);
    }

    tracing::debug!("🧩 Extracted {} fragments from {}", fragments.len(), origin);
    Ok(fragments)
}

/// `#define` lines plus every top-level statement outside function bodies.
fn file_scope_context(view: &SourceView<'_>, functions: &[FunctionDef<'_>]) -> String {
    let mut parts: Vec<String> = view.define_lines().iter().map(|l| l.to_string()).collect();

    let inside_function = |idx: usize| functions.iter().any(|f| idx >= f.decl_start && idx <= f.body_close);
    let mut idx = 0;
    while idx < view.len() {
        if inside_function(idx) {
            idx += 1;
            continue;
        }
        let end = view.statement_end(idx);
        // `typedef struct { .. } name;` ends after the closing brace
        let end = if view.is_at(end, "}") && !view.is_at(end + 1, ";") {
            view.statement_end(end + 1)
        } else if view.is_at(end, "}") {
            end + 1
        } else {
            end
        };
        let end = end.max(idx);
        parts.push(view.text_between(idx, end).to_string());
        idx = end + 1;
    }

    parts.join("\n")
}

/// The function from its leading comment (if any) to the closing brace.
fn function_text<'a>(view: &SourceView<'a>, function: &FunctionDef<'_>) -> &'a str {
    let tokens = view.tokens();
    let source = view.source();
    let start = tokens[function.decl_start].start;
    let end = tokens[function.body_close].end;
    let floor = function
        .decl_start
        .checked_sub(1)
        .map(|i| tokens[i].end)
        .unwrap_or(0);

    let start = leading_comment_start(source, floor, start).unwrap_or(start);
    &source[start..end]
}

fn leading_comment_start(source: &str, floor: usize, start: usize) -> Option<usize> {
    let gap = &source[floor..start];
    let trimmed = gap.trim_end();

    if trimmed.ends_with("*/") {
        return trimmed.rfind("/*").map(|i| floor + i);
    }

    // consecutive `//` lines directly above
    let mut first = None;
    let mut offset = trimmed.len();
    for line in trimmed.split('\n').rev() {
        let line_start = offset - line.len();
        if !line.trim_start().starts_with("//") {
            break;
        }
        first = Some(floor + line_start + (line.len() - line.trim_start().len()));
        offset = line_start.saturating_sub(1);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names_to_expectations() {
        assert_eq!(verdict_from_name("buffer_overflow_unsafe"), Some(Verdict::Unsafe));
        assert_eq!(verdict_from_name("safe_division"), Some(Verdict::Safe));
        assert_eq!(verdict_from_name("misra_loop_violation"), Some(Verdict::Unsafe));
        assert_eq!(verdict_from_name("potential_infinite_loop"), None);

        assert_eq!(category_from_name("buffer_overflow_safe"), Some(DefectCategory::BufferOverflow));
        assert_eq!(category_from_name("integer_overflow_unsafe"), Some(DefectCategory::IntegerOverflow));
        assert_eq!(category_from_name("producer_unsafe"), Some(DefectCategory::DataRace));
        assert_eq!(category_from_name("real_time_bound_unsafe"), Some(DefectCategory::UnboundedLoop));
        assert_eq!(category_from_name("misra_unsafe_cast"), Some(DefectCategory::UnsafeCast));
        assert_eq!(category_from_name("regulate_speed_safe"), None);
    }

    #[test]
    fn test_extracts_contract_and_context() {
        let src = "#include <stdio.h>\n#define LIMIT 4\nint counter = 0;\n\n/*@ requires divisor != 0; */\nint safe_division(int n, int divisor) {\n    return n / divisor;\n}\n\nint main() { return safe_division(4, 2); }\n";
        let fragments = extract_fragments(src, "bench/functional.c").unwrap();
        assert_eq!(fragments.len(), 1);

        let fragment = &fragments[0];
        assert_eq!(fragment.id(), "functional::safe_division");
        assert_eq!(fragment.category(), DefectCategory::DivisionByZero);
        assert_eq!(fragment.expected_verdict(), Verdict::Safe);
        assert!(fragment.source_text().starts_with("#define LIMIT 4\nint counter = 0;"));
        assert!(fragment.source_text().contains("/*@ requires divisor != 0; */\nint safe_division"));
        assert!(!fragment.source_text().contains("main"));
    }

    #[test]
    fn test_typedefs_are_context() {
        let src = "typedef struct {\n    int speed;\n} car_t;\n\nvoid check_null_safe(car_t *c) { if (c) c->speed = 0; }\n";
        let fragments = extract_fragments(src, "car.c").unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].source_text().starts_with("typedef struct {\n    int speed;\n} car_t;"));
    }

    #[test]
    fn test_line_comments_stay_with_their_function() {
        let src = "int a;\n// B2: Null pointer dereference\n// second line\nvoid null_pointer_unsafe(int *p) { *p = 1; }\n";
        let fragments = extract_fragments(src, "np.c").unwrap();
        let text = fragments[0].source_text();
        assert!(text.contains("// B2: Null pointer dereference\n// second line\nvoid null_pointer_unsafe"));
    }
}
