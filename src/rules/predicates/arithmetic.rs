use crate::domain::model::{Fragment, Verdict};
use crate::rules::lexer::{parse_int, SourceView, Token, TokenKind};
use crate::rules::patterns::{
    contract_checks, contract_views, declaration_of, is_constant_name, is_guarded, is_limit_macro,
    is_type_word, last_write, member_chain, scope_start, Check,
};

const ADDITIVE_OPS: [&str; 4] = ["+", "-", "+=", "-="];
const DIVISION_OPS: [&str; 4] = ["/", "%", "/=", "%="];
const CHECKED_BUILTINS: [&str; 3] = ["ckd_add", "ckd_sub", "ckd_mul"];

pub fn integer_overflow(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_unchecked_addition(&view))
}

pub fn division_by_zero(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_unchecked_divisor(&view))
}

pub fn unsafe_cast(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_unjustified_cast(&view))
}

/// Binary operator at `idx`: operands on both sides.
fn is_binary(tokens: &[Token<'_>], idx: usize) -> bool {
    idx > 0
        && tokens[idx - 1].ends_operand()
        && tokens.get(idx + 1).is_some_and(|t| {
            t.starts_operand() || ["sizeof", "*", "&", "-", "!", "~"].contains(&t.text)
        })
}

fn is_constant_operand(view: &SourceView<'_>, token: &Token<'_>) -> bool {
    token.is_number() || token.kind == TokenKind::Char || is_constant_name(token.text) || view.resolve_const(token.text).is_some()
}

fn is_checked_builtin(text: &str) -> bool {
    (text.starts_with("__builtin_") && text.ends_with("_overflow")) || CHECKED_BUILTINS.contains(&text)
}

fn is_overflow_guard(token: &Token<'_>) -> bool {
    is_limit_macro(token.text) || is_checked_builtin(token.text)
}

/// Variable behind an operand: `a`, `a[i]`, `p->n`; constants have none.
fn operand_name<'a>(view: &SourceView<'a>, at: usize) -> Option<&'a str> {
    let tokens = view.tokens();
    let token = tokens.get(at)?;
    let token = if token.is(")") || token.is("]") {
        tokens.get(view.matching(at)?.checked_sub(1)?)?
    } else {
        token
    };
    (token.is_ident() && !is_constant_operand(view, token)).then_some(token.text)
}

/// Limit check or checked builtin on the operands of the addition at `idx`.
///
/// A limit macro counts inside an `if`/`while`/`assert` condition or a `?:`
/// statement that mentions an operand. A checked builtin has to be called
/// with every operand.
fn overflow_guarded(view: &SourceView<'_>, from: usize, idx: usize) -> bool {
    let tokens = view.tokens();
    let names: Vec<&str> = [operand_name(view, idx - 1), operand_name(view, idx + 1)]
        .into_iter()
        .flatten()
        .collect();
    if names.is_empty() {
        return false;
    }
    let mentions = |from: usize, to: usize| {
        tokens
            .get(from..to.min(tokens.len()))
            .unwrap_or_default()
            .iter()
            .filter(|t| t.is_ident())
            .map(|t| t.text)
            .collect::<Vec<_>>()
    };

    (from..idx).any(|i| {
        let token = &tokens[i];
        if is_checked_builtin(token.text) && view.is_at(i + 1, "(") {
            let Some(close) = view.matching(i + 1) else {
                return false;
            };
            let args = mentions(i + 2, close);
            return names.iter().all(|name| args.contains(name));
        }
        if !is_limit_macro(token.text) {
            return false;
        }

        let start = view.statement_start(i);
        let head = &tokens[start];
        let condition = ["if", "while", "assert"].contains(&head.text) && view.is_at(start + 1, "(");
        let region = match view.matching(start + 1) {
            Some(close) if condition && close > i => Some((start + 2, close)),
            _ => {
                let end = view.statement_end(i);
                tokens
                    .get(start..end.min(tokens.len()))
                    .unwrap_or_default()
                    .iter()
                    .any(|t| t.is("?"))
                    .then_some((start, end))
            }
        };
        region.is_some_and(|(from, to)| {
            let named = mentions(from, to);
            names.iter().any(|name| named.contains(name))
        })
    })
}

fn has_unchecked_addition(view: &SourceView<'_>) -> bool {
    let tokens = view.tokens();
    let functions = view.functions();
    let contract_guard = contract_views(view)
        .iter()
        .any(|contract| contract.tokens().iter().any(is_overflow_guard));
    if contract_guard {
        return false;
    }

    tokens.iter().enumerate().any(|(idx, token)| {
        if !ADDITIVE_OPS.contains(&token.text) || !is_binary(tokens, idx) {
            return false;
        }
        let left = &tokens[idx - 1];
        let right = &tokens[idx + 1];
        // `INT_MAX - b` is the guard itself
        if is_limit_macro(left.text) || is_limit_macro(right.text) {
            return false;
        }
        if is_constant_operand(view, left) && is_constant_operand(view, right) {
            return false;
        }

        let from = scope_start(&functions, idx);
        let guarded = overflow_guarded(view, from, idx);
        if !guarded {
            tracing::debug!("'{} {} {}' has no bounds pre-check", left.text, token.text, right.text);
        }
        !guarded
    })
}

fn has_unchecked_divisor(view: &SourceView<'_>) -> bool {
    let tokens = view.tokens();
    let functions = view.functions();

    tokens.iter().enumerate().any(|(idx, token)| {
        if !DIVISION_OPS.contains(&token.text) || !is_binary(tokens, idx) {
            return false;
        }
        let unchecked = !divisor_is_safe(view, &functions, idx, idx + 1);
        if unchecked {
            tracing::debug!("divisor at byte {} is never checked against zero", token.start);
        }
        unchecked
    })
}

fn divisor_is_safe(
    view: &SourceView<'_>,
    functions: &[crate::rules::lexer::FunctionDef<'_>],
    op: usize,
    at: usize,
) -> bool {
    let tokens = view.tokens();
    let Some(divisor) = tokens.get(at) else {
        return false;
    };

    if divisor.is_number() {
        return literal_is_nonzero(divisor.text);
    }
    if divisor.is("sizeof") {
        return true;
    }
    if divisor.is("(") {
        let Some(close) = view.matching(at) else {
            return false;
        };
        // (b) reads as b, a fully constant group is evaluated by the compiler
        if close == at + 2 {
            return divisor_is_safe(view, functions, op, at + 1);
        }
        let inner = &tokens[at + 1..close];
        return inner
            .iter()
            .all(|t| is_constant_operand(view, t) || t.kind == TokenKind::Punct)
            && inner.iter().any(|t| is_constant_operand(view, t));
    }
    if !divisor.is_ident() {
        return false;
    }

    let chain = member_chain(tokens, at);
    let after = at + chain.len();
    if view.is_at(after, "(") || view.is_at(after, "[") {
        return false;
    }
    if chain.len() == 1 {
        if let Some(value) = view.resolve_const(divisor.text) {
            return value != 0;
        }
        if is_constant_name(divisor.text) {
            return true;
        }
    }

    let from = scope_start(functions, op);
    let write = last_write(tokens, from, op, &chain);
    if let Some(write) = write {
        let rhs = write + chain.len() + 1;
        let assigns_literal = view.is_at(write + chain.len(), "=")
            && tokens.get(rhs).is_some_and(|t| t.is_number() && literal_is_nonzero(t.text))
            && view.is_at(rhs + 1, ";");
        if assigns_literal {
            return true;
        }
    }

    is_guarded(view, write.unwrap_or(from), op, &chain, Check::NonZero)
        || (write.is_none() && contract_checks(view, &chain, Check::NonZero))
}

fn literal_is_nonzero(text: &str) -> bool {
    match parse_int(text) {
        Some(value) => value != 0,
        None => text
            .trim_end_matches(['f', 'F', 'l', 'L'])
            .parse::<f64>()
            .is_ok_and(|v| v != 0.0),
    }
}

/// What a value is, as far as a cast is concerned.
#[derive(Debug, Clone, PartialEq)]
enum Repr<'a> {
    Pointer { base: Vec<&'a str> },
    Integer { bits: u32, signed: bool, pointer_sized: bool },
    Literal(i64),
    Float,
    Other,
}

fn integer_repr(words: &[&str]) -> Option<Repr<'static>> {
    let signed = !words.iter().any(|w| *w == "unsigned");
    let longs = words.iter().filter(|w| **w == "long").count();
    let named = |bits, signed| Some(Repr::Integer { bits, signed, pointer_sized: false });

    for word in words {
        let repr = match *word {
            "int8_t" => named(8, true),
            "uint8_t" => named(8, false),
            "int16_t" => named(16, true),
            "uint16_t" => named(16, false),
            "int32_t" => named(32, true),
            "uint32_t" => named(32, false),
            "int64_t" => named(64, true),
            "uint64_t" | "size_t" => named(64, false),
            "ssize_t" | "ptrdiff_t" => named(64, true),
            "intptr_t" => Some(Repr::Integer { bits: 64, signed: true, pointer_sized: true }),
            "uintptr_t" => Some(Repr::Integer { bits: 64, signed: false, pointer_sized: true }),
            "bool" | "_Bool" => named(8, false),
            _ => None,
        };
        if repr.is_some() {
            return repr;
        }
    }

    let bits = if words.contains(&"char") {
        8
    } else if words.contains(&"short") {
        16
    } else if longs > 0 {
        64
    } else if words.contains(&"int") || words.contains(&"unsigned") || words.contains(&"signed") {
        32
    } else {
        return None;
    };
    named(bits, signed)
}

fn type_repr<'a>(words: &[&'a str], pointer_depth: usize) -> Repr<'a> {
    if pointer_depth > 0 {
        return Repr::Pointer {
            base: words.iter().copied().filter(|w| !matches!(*w, "const" | "volatile" | "restrict")).collect(),
        };
    }
    if words.iter().any(|w| matches!(*w, "float" | "double")) {
        return Repr::Float;
    }
    integer_repr(words).unwrap_or(Repr::Other)
}

struct Cast<'a> {
    close: usize,
    target: Repr<'a>,
}

/// `(type)` at `open` followed by an operand.
fn cast_at<'a>(view: &SourceView<'a>, open: usize) -> Option<Cast<'a>> {
    let tokens = view.tokens();
    if !tokens.get(open)?.is("(") {
        return None;
    }
    if open > 0 {
        let prev = &tokens[open - 1];
        // calls, `sizeof(int)` and declarations such as `f(void)`
        if prev.is("sizeof") || (prev.is_ident() && !crate::rules::lexer::is_keyword(prev.text)) || prev.is(")") || prev.is("]") {
            return None;
        }
    }
    let close = view.matching(open)?;
    let inner = &tokens[open + 1..close];
    if inner.is_empty() {
        return None;
    }

    let mut words = Vec::new();
    let mut pointer_depth = 0;
    let mut k = 0;
    while k < inner.len() {
        let t = &inner[k];
        if t.is("*") {
            pointer_depth += 1;
        } else if matches!(t.text, "struct" | "union" | "enum") && inner.get(k + 1).is_some_and(|n| n.is_ident()) {
            words.push(t.text);
            words.push(inner[k + 1].text);
            k += 1;
        } else if t.is_ident() && is_type_word(view, t.text) && pointer_depth == 0 {
            words.push(t.text);
        } else {
            return None;
        }
        k += 1;
    }
    if words.is_empty() {
        return None;
    }

    let next = tokens.get(close + 1)?;
    let operand_follows = next.starts_operand()
        || next.kind == TokenKind::Str
        || ["&", "*", "-", "!", "~"].contains(&next.text);
    if !operand_follows {
        return None;
    }

    Some(Cast {
        close,
        target: type_repr(&words, pointer_depth),
    })
}

fn operand_repr<'a>(view: &SourceView<'a>, at: usize) -> Repr<'a> {
    let tokens = view.tokens();
    let Some(token) = tokens.get(at) else {
        return Repr::Other;
    };

    match token.kind {
        TokenKind::Number => {
            return match parse_int(token.text) {
                Some(value) => Repr::Literal(value),
                None => Repr::Float,
            }
        }
        TokenKind::Str => return Repr::Pointer { base: vec!["char"] },
        TokenKind::Char => return Repr::Integer { bits: 8, signed: true, pointer_sized: false },
        _ => {}
    }

    if token.is("&") {
        return Repr::Pointer { base: Vec::new() };
    }
    if token.is("-") {
        return match operand_repr(view, at + 1) {
            Repr::Literal(value) => Repr::Literal(-value),
            other => other,
        };
    }
    if token.is("(") {
        if let Some(inner) = cast_at(view, at) {
            return inner.target;
        }
        // a grouped expression takes the representation of its first operand
        return match view.matching(at) {
            Some(close) if close > at + 1 => operand_repr(view, at + 1),
            _ => Repr::Other,
        };
    }
    if !token.is_ident() {
        return Repr::Other;
    }
    if view.is_at(at + 1, "(") {
        // allocators hand out untyped memory
        return if matches!(token.text, "malloc" | "calloc" | "realloc" | "aligned_alloc") {
            Repr::Pointer { base: vec!["void"] }
        } else {
            Repr::Other
        };
    }
    if let Some(value) = view.resolve_const(token.text) {
        return Repr::Literal(value);
    }

    match declaration_of(view, token.text, 0, at) {
        Some(decl) if decl.is_array => Repr::Pointer { base: decl.words },
        Some(decl) => type_repr(&decl.words, decl.pointer_depth),
        None => Repr::Other,
    }
}

fn max_value(bits: u32, signed: bool) -> i128 {
    if signed {
        (1i128 << (bits - 1)) - 1
    } else {
        (1i128 << bits) - 1
    }
}

fn min_value(bits: u32, signed: bool) -> i128 {
    if signed {
        -(1i128 << (bits - 1))
    } else {
        0
    }
}

fn is_char_like(base: &[&str]) -> bool {
    base.iter()
        .all(|w| matches!(*w, "char" | "unsigned" | "signed" | "uint8_t" | "int8_t"))
}

fn has_unjustified_cast(view: &SourceView<'_>) -> bool {
    let tokens = view.tokens();
    let functions = view.functions();

    (0..tokens.len()).any(|open| {
        let Some(cast) = cast_at(view, open) else {
            return false;
        };
        let operand_at = cast.close + 1;
        let source = operand_repr(view, operand_at);

        let unsafe_cast = match (&source, &cast.target) {
            (Repr::Pointer { .. }, Repr::Integer { pointer_sized, .. }) => !pointer_sized,
            (Repr::Literal(value), Repr::Pointer { .. }) => *value != 0,
            (Repr::Integer { pointer_sized, .. }, Repr::Pointer { .. }) => !pointer_sized,
            (Repr::Float, Repr::Pointer { .. }) => true,
            (Repr::Pointer { base: from }, Repr::Pointer { base: to }) => {
                let compatible = from.is_empty()
                    || from.contains(&"void")
                    || to.contains(&"void")
                    || is_char_like(to)
                    || from == to;
                !compatible
            }
            (Repr::Literal(value), Repr::Integer { bits, signed, .. }) => {
                let value = *value as i128;
                value > max_value(*bits, *signed) || value < min_value(*bits, *signed)
            }
            (Repr::Integer { bits: from_bits, .. }, Repr::Integer { bits, signed, .. }) if from_bits > bits => {
                !narrowing_is_justified(view, &functions, open, operand_at, *bits, *signed)
            }
            (Repr::Float, Repr::Integer { bits, signed, .. }) => {
                !narrowing_is_justified(view, &functions, open, operand_at, *bits, *signed)
            }
            _ => false,
        };
        if unsafe_cast {
            tracing::debug!("cast at byte {} changes representation: {:?} -> {:?}", tokens[open].start, source, cast.target);
        }
        unsafe_cast
    })
}

/// A fitting mask on the operand or an earlier upper-bound check on it.
fn narrowing_is_justified(
    view: &SourceView<'_>,
    functions: &[crate::rules::lexer::FunctionDef<'_>],
    cast_open: usize,
    operand_at: usize,
    bits: u32,
    signed: bool,
) -> bool {
    let tokens = view.tokens();
    let max = max_value(bits, signed);
    let fits = |t: &Token<'_>| view.resolve_const(t.text).is_some_and(|v| (v as i128) <= max) || is_limit_macro(t.text);

    // (T)(x & 0xFF)
    if view.is_at(operand_at, "(") {
        if let Some(close) = view.matching(operand_at) {
            let masked = (operand_at + 1..close)
                .any(|i| tokens[i].is("&") && tokens.get(i + 1).is_some_and(|t| fits(t)));
            if masked {
                return true;
            }
        }
        return false;
    }

    let Some(operand) = tokens.get(operand_at).filter(|t| t.is_ident()) else {
        return false;
    };
    let from = scope_start(functions, cast_open);
    (from..cast_open).any(|i| {
        if !tokens[i].is(operand.text) {
            return false;
        }
        // x > LIMIT / x <= LIMIT
        let forward = tokens.get(i + 1).is_some_and(|op| [">", ">=", "<", "<="].contains(&op.text))
            && tokens.get(i + 2).is_some_and(|t| fits(t));
        // LIMIT < x / LIMIT >= x
        let backward = i >= 2
            && [">", ">=", "<", "<="].contains(&tokens[i - 1].text)
            && fits(&tokens[i - 2]);
        forward || backward
    })
}
