use crate::rules::lexer::{parse_int, FunctionDef, SourceView, Token};
use regex::Regex;
use std::sync::LazyLock;

/// `<limits.h>` / `<stdint.h>` bounds such as `INT_MAX` or `UINT8_MAX`
static LIMIT_MACRO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:U?(?:CHAR|SHRT|INT|LONG|LLONG)|SCHAR|S?SIZE|PTRDIFF|U?INTMAX|U?INTPTR|U?INT(?:8|16|32|64))_(?:MAX|MIN)$",
    )
    .unwrap()
});

const BUILTIN_TYPES: [&str; 10] = [
    "void", "char", "short", "int", "long", "float", "double", "bool", "_Bool", "wchar_t",
];

const QUALIFIERS: [&str; 10] = [
    "const", "volatile", "static", "extern", "register", "_Atomic", "unsigned", "signed",
    "inline", "restrict",
];

pub const ASSIGNMENT_OPS: [&str; 11] = [
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=",
];

pub fn is_limit_macro(text: &str) -> bool {
    LIMIT_MACRO.is_match(text)
}

pub fn is_qualifier(text: &str) -> bool {
    QUALIFIERS.contains(&text)
}

/// Words that can make up a declaration's type.
pub fn is_type_word(view: &SourceView<'_>, text: &str) -> bool {
    BUILTIN_TYPES.contains(&text)
        || is_qualifier(text)
        || text.ends_with("_t")
        || text.starts_with("atomic_")
        || view.is_typedef_name(text)
}

/// Identifier written in capitals, treated as a compile-time constant.
pub fn is_constant_name(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_uppercase())
        && text
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// A variable declaration found at a name token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'a> {
    pub name: &'a str,
    pub idx: usize,
    pub words: Vec<&'a str>,
    pub pointer_depth: usize,
    pub is_array: bool,
}

impl<'a> Declaration<'a> {
    pub fn is_atomic(&self) -> bool {
        self.words
            .iter()
            .any(|w| *w == "_Atomic" || w.starts_with("atomic_"))
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0
    }
}

/// Recognises `T name`, `T *name`, `struct S *name` at token `idx`
/// when followed by `=`, `;`, `,`, `)` or `[`.
pub fn declaration_at<'a>(view: &SourceView<'a>, idx: usize) -> Option<Declaration<'a>> {
    let tokens = view.tokens();
    let token = tokens.get(idx)?;
    if !token.is_ident() || is_type_word(view, token.text) || crate::rules::lexer::is_keyword(token.text) {
        return None;
    }
    let next = tokens.get(idx + 1)?;
    if !["=", ";", ",", ")", "["].contains(&next.text) {
        return None;
    }

    let mut j = idx;
    let mut pointer_depth = 0;
    while j > 0 && tokens[j - 1].is("*") {
        pointer_depth += 1;
        j -= 1;
    }

    let mut words = Vec::new();
    while j > 0 {
        let prev = &tokens[j - 1];
        if prev.is_ident() && is_type_word(view, prev.text) {
            words.push(prev.text);
            j -= 1;
        } else if prev.is_ident()
            && j >= 2
            && ["struct", "union", "enum"].contains(&tokens[j - 2].text)
        {
            words.push(prev.text);
            words.push(tokens[j - 2].text);
            j -= 2;
        } else {
            break;
        }
    }
    if words.is_empty() {
        return None;
    }

    // the type must start a declaration, not follow an operand
    if j > 0 && !["(", ",", ";", "{", "}"].contains(&tokens[j - 1].text) {
        return None;
    }

    words.reverse();
    Some(Declaration {
        name: token.text,
        idx,
        words,
        pointer_depth,
        is_array: next.is("["),
    })
}

pub fn declarations_in<'a>(view: &SourceView<'a>, from: usize, to: usize) -> Vec<Declaration<'a>> {
    (from..to.min(view.len()))
        .filter_map(|idx| declaration_at(view, idx))
        .collect()
}

pub fn declaration_of<'a>(
    view: &SourceView<'a>,
    name: &str,
    from: usize,
    before: usize,
) -> Option<Declaration<'a>> {
    (from..before.min(view.len()))
        .rev()
        .filter(|idx| view.tokens()[*idx].is(name))
        .find_map(|idx| declaration_at(view, idx))
}

/// 分析範圍的起點：所在函式的宣告開頭（含參數），不在函式內就是 0
pub fn scope_start(functions: &[FunctionDef<'_>], idx: usize) -> usize {
    functions
        .iter()
        .find(|f| f.contains(idx))
        .map(|f| f.decl_start)
        .unwrap_or(0)
}

/// Token range (`open..=close`) of the function containing `idx`, or the whole text.
pub fn scope_bounds(view: &SourceView<'_>, functions: &[FunctionDef<'_>], idx: usize) -> (usize, usize) {
    functions
        .iter()
        .find(|f| f.contains(idx))
        .map(|f| (f.decl_start, f.body_close))
        .unwrap_or((0, view.len()))
}

// 不是 `.x` / `->x` 這種成員存取
pub fn is_plain_name(tokens: &[Token<'_>], idx: usize) -> bool {
    let prev_is_member = idx > 0 && (tokens[idx - 1].is(".") || tokens[idx - 1].is("->"));
    tokens[idx].is_ident() && !prev_is_member
}

pub fn subject_at(tokens: &[Token<'_>], idx: usize, subject: &[&str]) -> bool {
    if idx + subject.len() > tokens.len() || !is_plain_name(tokens, idx) {
        return false;
    }
    let matches = subject
        .iter()
        .enumerate()
        .all(|(k, text)| tokens[idx + k].is(text));
    let continues = tokens
        .get(idx + subject.len())
        .is_some_and(|t| t.is(".") || t.is("->"));
    matches && !continues
}

/// Reads a member chain (`a`, `a->b`, `a.b->c`) starting at `idx`.
pub fn member_chain<'a>(tokens: &[Token<'a>], idx: usize) -> Vec<&'a str> {
    let mut chain = Vec::new();
    let mut i = idx;
    while let Some(token) = tokens.get(i) {
        if !token.is_ident() {
            break;
        }
        chain.push(token.text);
        match tokens.get(i + 1) {
            Some(sep) if sep.is(".") || sep.is("->") => {
                chain.push(sep.text);
                i += 2;
            }
            _ => break,
        }
    }
    chain
}

/// `from..before` 之間最後一次寫入 `subject`（`x = ..`、`x += ..`、`x++`）
pub fn last_write(tokens: &[Token<'_>], from: usize, before: usize, subject: &[&str]) -> Option<usize> {
    let n = subject.len();
    (from..before.min(tokens.len()))
        .rev()
        .find(|&i| subject_at(tokens, i, subject) && i + n < before && is_write_at(tokens, i, n))
}

pub fn is_write_at(tokens: &[Token<'_>], idx: usize, n: usize) -> bool {
    let next = tokens.get(idx + n);
    let prev = idx.checked_sub(1).and_then(|p| tokens.get(p));
    next.is_some_and(|t| ASSIGNMENT_OPS.contains(&t.text) || t.is("++") || t.is("--"))
        || prev.is_some_and(|t| t.is("++") || t.is("--"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    NonNull,
    NonZero,
}

impl Check {
    fn is_sentinel(self, token: &Token<'_>) -> bool {
        match self {
            Check::NonNull => {
                matches!(token.text, "NULL" | "nullptr" | "\\null") || parse_int(token.text) == Some(0)
            }
            Check::NonZero => parse_int(token.text) == Some(0) || matches!(token.text, "0.0" | "0.0f"),
        }
    }
}

/// 空值/零值測試的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    /// true 代表值可用：`p`、`p != NULL`、`b > 0`
    Holds,
    /// true 代表值為 null/0：`!p`、`p == NULL`、`b <= 0`
    Fails,
}

/// Every null/zero test of `subject` in `from..to`, with its direction.
fn tests_in(tokens: &[Token<'_>], from: usize, to: usize, subject: &[&str], check: Check) -> Vec<(usize, Polarity)> {
    let n = subject.len();
    if n == 0 {
        return Vec::new();
    }
    (from..to.min(tokens.len()))
        .filter(|&i| i + n <= to && subject_at(tokens, i, subject))
        .filter_map(|i| test_at(tokens, i, i + n, check).map(|polarity| (i, polarity)))
        .collect()
}

fn test_at(tokens: &[Token<'_>], start: usize, end: usize, check: Check) -> Option<Polarity> {
    let at = |i: Option<usize>| i.and_then(|i| tokens.get(i));
    let prev = at(start.checked_sub(1));
    let prev2 = at(start.checked_sub(2));
    let prev3 = at(start.checked_sub(3));
    let next = tokens.get(end);
    let next2 = tokens.get(end + 1);

    let is = |t: Option<&Token<'_>>, texts: &[&str]| t.is_some_and(|t| texts.contains(&t.text));
    let sentinel = |t: Option<&Token<'_>>| t.is_some_and(|t| check.is_sentinel(t));
    let equality = |op: Option<&Token<'_>>| {
        if is(op, &["=="]) {
            Polarity::Fails
        } else {
            Polarity::Holds
        }
    };

    // x == 0, x != NULL, 0 != x
    if is(next, &["==", "!="]) && sentinel(next2) {
        return Some(equality(next));
    }
    if is(prev, &["==", "!="]) && sentinel(prev2) {
        return Some(equality(prev));
    }
    if is(prev, &["!"]) {
        return Some(Polarity::Fails);
    }
    // x ? a : b
    if is(next, &["?"]) {
        return Some(Polarity::Holds);
    }
    // if (x), while (x && ..), (.. || x)
    if is(prev, &["("]) && is(next, &[")"]) && is(prev2, &["if", "while", "assert"]) {
        return Some(Polarity::Holds);
    }
    if is(prev, &["(", "&&", "||"]) && is(next, &["&&", "||"]) {
        return Some(Polarity::Holds);
    }
    if is(prev, &["&&", "||"]) && is(next, &[")"]) {
        return Some(Polarity::Holds);
    }

    if check == Check::NonZero {
        if is(next, &[">", "<"]) && sentinel(next2) {
            return Some(Polarity::Holds);
        }
        if is(prev, &["<", ">"]) && sentinel(prev2) {
            return Some(Polarity::Holds);
        }
        let value = |t: Option<&Token<'_>>| t.and_then(|t| parse_int(t.text));
        if is(next, &[">="]) && value(next2).is_some_and(|v| v >= 1) {
            return Some(Polarity::Holds);
        }
        if is(prev, &["<="]) && value(prev2).is_some_and(|v| v >= 1) && !is(prev3, &["-"]) {
            return Some(Polarity::Holds);
        }
        // b <= 0, 0 >= b
        if (is(next, &["<="]) && sentinel(next2)) || (is(prev, &[">="]) && sentinel(prev2)) {
            return Some(Polarity::Fails);
        }
    }
    None
}

/// Contract bodies tokenised, for guards stated as preconditions.
pub fn contract_views<'a>(view: &SourceView<'a>) -> Vec<SourceView<'a>> {
    view.contracts().iter().map(|c| SourceView::new(c)).collect()
}

/// Does any `requires` clause test `subject`?
pub fn contract_checks(view: &SourceView<'_>, subject: &[&str], check: Check) -> bool {
    contract_views(view).iter().any(|contract| {
        tests_in(contract.tokens(), 0, contract.len(), subject, check)
            .iter()
            .any(|(_, polarity)| *polarity == Polarity::Holds)
            || (check == Check::NonNull && contract_has_valid(contract, subject))
    })
}

fn contract_has_valid(contract: &SourceView<'_>, subject: &[&str]) -> bool {
    let tokens = contract.tokens();
    tokens.iter().enumerate().any(|(i, t)| {
        (t.is("\\valid") || t.is("\\valid_read"))
            && contract.is_at(i + 1, "(")
            && subject_at(tokens, i + 2, subject)
    })
}

/// Where a token sits relative to the conditionals around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Body of `if (cond)`; the indices are the condition's parentheses
    If { cond_open: usize, cond_close: usize, body_end: usize },
    Else,
    Loop,
    Switch,
}

/// Conditionals enclosing token `idx`, innermost first, up to (not including) `limit`.
pub fn enclosing_branches(view: &SourceView<'_>, idx: usize, limit: usize) -> Vec<Branch> {
    let tokens = view.tokens();
    let mut branches = Vec::new();

    // unbraced body: `if (c) stmt;`
    let start = view.statement_start(idx);
    if let Some(branch) = branch_before_body(view, start, view.statement_end(idx)) {
        if start > limit {
            branches.push(branch);
        }
    }

    let mut cursor = start;
    while cursor > limit {
        let Some(open) = (limit..cursor)
            .rev()
            .find(|&i| tokens[i].is("{") && view.matching(i).is_some_and(|c| c > idx))
        else {
            break;
        };
        let close = view.matching(open).unwrap_or(open);
        if let Some(branch) = branch_before_body(view, open, close) {
            branches.push(branch);
        }
        cursor = open;
    }
    branches
}

/// The construct owning a body that begins at token `body_start`.
fn branch_before_body(view: &SourceView<'_>, body_start: usize, body_end: usize) -> Option<Branch> {
    let tokens = view.tokens();
    let first = tokens.get(body_start)?;

    // statement-start case: the statement itself begins with a keyword
    if first.is("if") || first.is("while") || first.is("for") || first.is("switch") {
        let cond_open = body_start + 1;
        let cond_close = view.matching(cond_open)?;
        return Some(keyword_branch(first.text, cond_open, cond_close, body_end));
    }
    if first.is("else") {
        return Some(Branch::Else);
    }
    if first.is("do") {
        return Some(Branch::Loop);
    }

    // brace case: `{` preceded by `)` or `else` / `do`
    if !first.is("{") || body_start == 0 {
        return None;
    }
    let prev = &tokens[body_start - 1];
    if prev.is("else") {
        return Some(Branch::Else);
    }
    if prev.is("do") {
        return Some(Branch::Loop);
    }
    if prev.is(")") {
        let cond_open = view.matching(body_start - 1)?;
        let keyword = tokens.get(cond_open.checked_sub(1)?)?;
        if ["if", "while", "for", "switch"].contains(&keyword.text) {
            return Some(keyword_branch(keyword.text, cond_open, body_start - 1, body_end));
        }
    }
    None
}

fn keyword_branch(keyword: &str, cond_open: usize, cond_close: usize, body_end: usize) -> Branch {
    match keyword {
        "if" => Branch::If {
            cond_open,
            cond_close,
            body_end,
        },
        "switch" => Branch::Switch,
        _ => Branch::Loop,
    }
}

const EXIT_CALLS: [&str; 5] = ["exit", "abort", "_Exit", "quick_exit", "longjmp"];

/// Is the use at `site` only reached once `subject` passed a null/zero test
/// made at or after `from`? Either the condition around the use asserts it
/// (`if (p) *p`, `p && *p`, `b ? a / b : 0`), or an earlier `if (!p)` in the
/// same block leaves it, or `assert(p)` ran first.
pub fn is_guarded(view: &SourceView<'_>, from: usize, site: usize, subject: &[&str], check: Check) -> bool {
    if subject.is_empty() {
        return false;
    }
    guarded_by_branch(view, from, site, subject, check)
        || guarded_in_statement(view, from, site, subject, check)
        || guarded_by_bailout(view, from, site, subject, check)
}

fn guarded_by_branch(view: &SourceView<'_>, from: usize, site: usize, subject: &[&str], check: Check) -> bool {
    enclosing_branches(view, site, from).into_iter().any(|branch| match branch {
        Branch::If {
            cond_open,
            cond_close,
            ..
        } => {
            cond_open >= from
                && site > cond_close
                && tests_in(view.tokens(), cond_open + 1, cond_close, subject, check)
                    .into_iter()
                    .any(|(i, polarity)| {
                        polarity == Polarity::Holds && !joined_by(view, cond_open, cond_close, i, "||")
                    })
        }
        _ => false,
    })
}

fn guarded_in_statement(view: &SourceView<'_>, from: usize, site: usize, subject: &[&str], check: Check) -> bool {
    let tokens = view.tokens();
    let start = view.statement_start(site).max(from);
    tests_in(tokens, start, site, subject, check)
        .into_iter()
        .any(|(i, polarity)| {
            let after = i + subject.len();
            let Some(join) = (after..site).find(|&k| tokens[k].is("&&") || tokens[k].is("?")) else {
                return false;
            };
            polarity == Polarity::Holds && !(join..site).any(|k| tokens[k].is("||") || tokens[k].is(":"))
        })
}

fn guarded_by_bailout(view: &SourceView<'_>, from: usize, site: usize, subject: &[&str], check: Check) -> bool {
    let tokens = view.tokens();
    tests_in(tokens, from, site, subject, check)
        .into_iter()
        .any(|(i, polarity)| {
            let start = view.statement_start(i);
            if !view.is_at(start + 1, "(") || !same_block(view, start, site) {
                return false;
            }
            let Some(close) = view.matching(start + 1).filter(|&close| close > i) else {
                return false;
            };
            match (tokens[start].text, polarity) {
                ("if", Polarity::Fails) => {
                    !joined_by(view, start + 1, close, i, "&&") && body_exits(view, close + 1, site)
                }
                ("assert", Polarity::Holds) => !joined_by(view, start + 1, close, i, "||"),
                _ => false,
            }
        })
}

fn joined_by(view: &SourceView<'_>, open: usize, close: usize, i: usize, op: &str) -> bool {
    let tokens = view.tokens();
    (open + 1..close).any(|k| {
        if !tokens[k].is(op) {
            return false;
        }
        // 找出 op 所在的最內層括號
        let group = (open..k)
            .rev()
            .find(|&g| tokens[g].is("(") && view.matching(g).is_some_and(|c| c > k))
            .unwrap_or(open);
        group < i && view.matching(group).is_some_and(|c| c > i)
    })
}

// if 本體在 site 之前結束，且會離開區塊
fn body_exits(view: &SourceView<'_>, body_start: usize, site: usize) -> bool {
    let tokens = view.tokens();
    let body_end = if view.is_at(body_start, "{") {
        view.matching(body_start)
    } else {
        Some(view.statement_end(body_start))
    };
    let Some(body_end) = body_end.filter(|&end| end < site) else {
        return false;
    };
    (body_start..=body_end).any(|k| {
        let token = &tokens[k];
        ["return", "break", "continue", "goto"].contains(&token.text)
            || (EXIT_CALLS.contains(&token.text) && view.is_at(k + 1, "("))
    })
}

fn same_block(view: &SourceView<'_>, start: usize, site: usize) -> bool {
    let floor = view.depth(start);
    (start..=site).all(|k| view.depth(k) >= floor)
}

/// Does the condition between `open` and `close` test nothing but `name`?
pub fn condition_only_tests(tokens: &[Token<'_>], open: usize, close: usize, name: &str) -> bool {
    let mut mentions = false;
    for token in &tokens[open + 1..close] {
        if token.is(name) {
            mentions = true;
        } else if !(["(", ")", "!", "==", "!=", "NULL", "nullptr", "0"].contains(&token.text)) {
            return false;
        }
    }
    mentions
}
