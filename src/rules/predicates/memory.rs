use crate::domain::model::{Fragment, Verdict};
use crate::rules::lexer::{SourceView, Token};
use crate::rules::patterns::{
    condition_only_tests, contract_checks, declaration_at, enclosing_branches, is_guarded,
    is_plain_name, is_type_word, last_write, scope_bounds, scope_start, Branch, Check,
};
use std::collections::HashSet;

const ALLOCATORS: [&str; 7] = [
    "malloc", "calloc", "realloc", "strdup", "strndup", "aligned_alloc", "reallocarray",
];

/// Calls that use a buffer without taking ownership of it
const BORROWING_CALLS: [&str; 16] = [
    "memset", "memcpy", "memmove", "memcmp", "strcpy", "strncpy", "strcat", "strncat", "strlen",
    "printf", "fprintf", "sprintf", "snprintf", "puts", "fread", "fwrite",
];

pub fn buffer_overflow(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_out_of_bounds_access(&view))
}

pub fn null_deref(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_unchecked_deref(&view))
}

pub fn memory_leak(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_leak(&view))
}

struct ArrayDecl<'a> {
    name: &'a str,
    idx: usize,
    capacity_text: &'a str,
    capacity: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
struct Bound<'a> {
    inclusive: bool,
    base: &'a str,
    offset: i128,
}

fn array_decls<'a>(view: &SourceView<'a>) -> Vec<ArrayDecl<'a>> {
    let tokens = view.tokens();
    (0..tokens.len())
        .filter_map(|idx| {
            let decl = declaration_at(view, idx)?;
            if !decl.is_array || decl.is_pointer() {
                return None;
            }
            let size = tokens.get(idx + 2)?;
            if !view.is_at(idx + 3, "]") {
                return None;
            }
            Some(ArrayDecl {
                name: decl.name,
                idx,
                capacity_text: size.text,
                capacity: view.resolve_const(size.text),
            })
        })
        .collect()
}

fn has_out_of_bounds_access(view: &SourceView<'_>) -> bool {
    let tokens = view.tokens();
    let arrays = array_decls(view);
    let functions = view.functions();

    for (idx, token) in tokens.iter().enumerate() {
        if !is_plain_name(tokens, idx) || !view.is_at(idx + 1, "[") {
            continue;
        }
        let Some(array) = arrays.iter().rev().find(|a| a.name == token.text && a.idx <= idx) else {
            continue;
        };
        if array.idx == idx {
            continue;
        }
        let Some(close) = view.matching(idx + 1) else {
            continue;
        };

        if close == idx + 3 {
            let index = &tokens[idx + 2];
            if index.is_number() {
                if let (Some(value), Some(capacity)) = (view.resolve_const(index.text), array.capacity) {
                    if value >= capacity || value < 0 {
                        tracing::debug!("constant index {} past capacity {} of '{}'", value, capacity, array.name);
                        return true;
                    }
                }
                continue;
            }
            if index.is_ident() {
                let from = scope_start(&functions, idx);
                if let Some(bound) = last_bound(view, from, idx, index.text) {
                    if bound_exceeds(view, array, bound) {
                        tracing::debug!(
                            "index '{}' of '{}' admitted up to {} {}",
                            index.text,
                            array.name,
                            if bound.inclusive { "<=" } else { "<" },
                            bound.base
                        );
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Closest upper-bound comparison on `name` before `before`.
fn last_bound<'a>(view: &SourceView<'a>, from: usize, before: usize, name: &str) -> Option<Bound<'a>> {
    let tokens = view.tokens();
    (from..before).rev().find_map(|i| {
        if !tokens[i].is(name) || !is_plain_name(tokens, i) {
            return None;
        }
        // name < bound, name <= bound
        if let Some(op) = tokens.get(i + 1) {
            if op.is("<") || op.is("<=") {
                return bound_after(view, i + 2, op.is("<="));
            }
        }
        // bound > name, bound >= name
        if i >= 2 {
            let op = &tokens[i - 1];
            let base = &tokens[i - 2];
            if (op.is(">") || op.is(">=")) && (base.is_ident() || base.is_number()) {
                return Some(Bound {
                    inclusive: op.is(">="),
                    base: base.text,
                    offset: 0,
                });
            }
        }
        None
    })
}

fn bound_after<'a>(view: &SourceView<'a>, idx: usize, inclusive: bool) -> Option<Bound<'a>> {
    let tokens = view.tokens();
    let base = tokens.get(idx)?;

    // sizeof(buffer) counts as the array's own capacity
    if base.is("sizeof") && view.is_at(idx + 1, "(") {
        let name = tokens.get(idx + 2)?;
        return Some(Bound {
            inclusive,
            base: name.text,
            offset: 0,
        });
    }
    if !(base.is_ident() || base.is_number()) {
        return None;
    }

    let offset = match (tokens.get(idx + 1), tokens.get(idx + 2)) {
        (Some(op), Some(n)) if (op.is("-") || op.is("+")) && n.is_number() => {
            let n = i128::from(crate::rules::lexer::parse_int(n.text).unwrap_or(0));
            if op.is("-") {
                -n
            } else {
                n
            }
        }
        _ => 0,
    };
    Some(Bound {
        inclusive,
        base: base.text,
        offset,
    })
}

fn bound_exceeds(view: &SourceView<'_>, array: &ArrayDecl<'_>, bound: Bound<'_>) -> bool {
    // largest index the check lets through, relative to the bound
    // i128：`LLONG_MAX + 1` 這類界限不會溢位
    let slack: i128 = if bound.inclusive { 0 } else { -1 };

    if bound.base == array.capacity_text || bound.base == array.name {
        return bound.offset + slack >= 0;
    }
    match (view.resolve_const(bound.base), array.capacity) {
        (Some(value), Some(capacity)) => i128::from(value) + bound.offset + slack >= i128::from(capacity),
        _ => false,
    }
}

fn pointer_names<'a>(view: &SourceView<'a>) -> HashSet<&'a str> {
    (0..view.len())
        .filter_map(|idx| declaration_at(view, idx))
        .filter(|decl| decl.is_pointer() && !decl.is_array)
        .map(|decl| decl.name)
        .collect()
}

/// Token index of the pointer name for every dereference site.
fn deref_sites(view: &SourceView<'_>, pointers: &HashSet<&str>) -> Vec<usize> {
    let tokens = view.tokens();
    let mut sites = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        // *p
        if token.is("*") {
            let unary = idx == 0 || !tokens[idx - 1].ends_operand() || closes_condition(view, idx - 1);
            if let Some(next) = tokens.get(idx + 1) {
                if unary && next.is_ident() && pointers.contains(next.text) && !is_declaration_star(view, idx) {
                    sites.push(idx + 1);
                }
            }
            continue;
        }
        // p->field, p[i]
        if token.is_ident() && pointers.contains(token.text) && is_plain_name(tokens, idx) {
            if view.is_at(idx + 1, "->") || view.is_at(idx + 1, "[") {
                sites.push(idx);
            }
        }
    }
    sites
}

/// `)` ending `if (..)`, `while (..)` or `for (..)`
fn closes_condition(view: &SourceView<'_>, idx: usize) -> bool {
    view.is_at(idx, ")")
        && view
            .matching(idx)
            .and_then(|open| open.checked_sub(1))
            .is_some_and(|kw| ["if", "while", "for"].iter().any(|k| view.is_at(kw, k)))
}

fn is_declaration_star(view: &SourceView<'_>, star: usize) -> bool {
    declaration_at(view, star + 1).is_some()
}

fn has_unchecked_deref(view: &SourceView<'_>) -> bool {
    let tokens = view.tokens();
    let pointers = pointer_names(view);
    let functions = view.functions();

    deref_sites(view, &pointers).into_iter().any(|site| {
        let name = tokens[site].text;
        let from = scope_start(&functions, site);

        let write = last_write(tokens, from, site, &[name]);
        if let Some(write) = write {
            if tokens.get(write + 1).is_some_and(|t| t.is("=")) && points_at_object(tokens, write + 2) {
                return false;
            }
        }

        let checked_from = write.unwrap_or(from);
        if is_guarded(view, checked_from, site, &[name], Check::NonNull) {
            return false;
        }
        if write.is_none() && contract_checks(view, &[name], Check::NonNull) {
            return false;
        }

        tracing::debug!("'{}' dereferenced without a null check", name);
        true
    })
}

/// `&x` and string literals are never null
fn points_at_object(tokens: &[Token<'_>], rhs: usize) -> bool {
    tokens
        .get(rhs)
        .is_some_and(|t| t.is("&") || t.kind == crate::rules::lexer::TokenKind::Str)
}

struct Allocation<'a> {
    owner: &'a str,
    call: usize,
}

fn allocations<'a>(view: &SourceView<'a>) -> (Vec<Allocation<'a>>, bool) {
    let tokens = view.tokens();
    let mut found = Vec::new();
    let mut discarded = false;

    for (idx, token) in tokens.iter().enumerate() {
        if !ALLOCATORS.contains(&token.text) || !view.is_at(idx + 1, "(") {
            continue;
        }
        let start = view.statement_start(idx);
        let Some(assign) = (start..idx).rev().find(|&i| tokens[i].is("=")) else {
            if tokens[start].is("return") {
                continue;
            }
            // malloc(...) with the result thrown away
            discarded = true;
            continue;
        };
        if assign == 0 {
            continue;
        }
        let owner = &tokens[assign - 1];
        if !owner.is_ident() || !is_plain_name(tokens, assign - 1) {
            // stored into a structure or through a pointer
            continue;
        }
        if assign >= 2 && tokens[assign - 2].is("*") {
            let declares = assign >= 3 && is_type_word(view, tokens[assign - 3].text);
            if !declares {
                continue;
            }
        }
        found.push(Allocation {
            owner: owner.text,
            call: idx,
        });
    }
    (found, discarded)
}

fn has_leak(view: &SourceView<'_>) -> bool {
    let (allocations, discarded) = allocations(view);
    if discarded {
        return true;
    }
    let functions = view.functions();
    allocations
        .iter()
        .any(|alloc| leaks(view, &functions, alloc))
}

fn leaks(view: &SourceView<'_>, functions: &[crate::rules::lexer::FunctionDef<'_>], alloc: &Allocation<'_>) -> bool {
    let tokens = view.tokens();
    let (scope_open, scope_end) = scope_bounds(view, functions, alloc.call);
    let after = alloc.call + 1;
    let end = scope_end.min(tokens.len());

    if escapes(view, after, end, alloc.owner) {
        return false;
    }

    let releases: Vec<usize> = (after..end)
        .filter(|&i| {
            tokens[i].is("free") && view.is_at(i + 1, "(") && view.is_at(i + 2, alloc.owner) && view.is_at(i + 3, ")")
        })
        .collect();
    if releases.is_empty() {
        tracing::debug!("'{}' is never released", alloc.owner);
        return true;
    }

    let covered = releases
        .iter()
        .any(|&free| release_on_every_path(view, &releases, free, scope_open, alloc.owner));
    if !covered {
        tracing::debug!("'{}' is released only on some paths", alloc.owner);
        return true;
    }

    let first_release = releases[0];
    let early_return = (after..first_release).any(|i| {
        tokens[i].is("return")
            && !view.is_at(i + 1, alloc.owner)
            && !is_null_bailout(view, i, scope_open, alloc.owner)
    });
    if early_return {
        tracing::debug!("'{}' leaks on an early return", alloc.owner);
    }
    early_return
}

fn escapes(view: &SourceView<'_>, from: usize, to: usize, owner: &str) -> bool {
    let tokens = view.tokens();
    (from..to).any(|i| {
        if !tokens[i].is(owner) || !is_plain_name(tokens, i) {
            return false;
        }
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let next = tokens.get(i + 1);
        // return p;
        if prev.is_some_and(|t| t.is("return")) {
            return true;
        }
        // other = p;
        if prev.is_some_and(|t| t.is("=")) && next.is_some_and(|t| t.is(";")) {
            return true;
        }
        // handed to a callee that may keep it
        if prev.is_some_and(|t| t.is("(") || t.is(",")) && next.is_some_and(|t| t.is(")") || t.is(",")) {
            if let Some(callee) = callee_of(view, i) {
                return callee != "free" && !BORROWING_CALLS.contains(&callee);
            }
        }
        false
    })
}

/// Name of the function whose argument list contains token `idx`.
fn callee_of<'a>(view: &SourceView<'a>, idx: usize) -> Option<&'a str> {
    let tokens = view.tokens();
    let open = (0..idx)
        .rev()
        .find(|&i| tokens[i].is("(") && view.matching(i).is_some_and(|c| c > idx))?;
    let callee = tokens.get(open.checked_sub(1)?)?;
    (callee.is_ident() && !crate::rules::lexer::is_keyword(callee.text)).then_some(callee.text)
}

fn release_on_every_path(view: &SourceView<'_>, releases: &[usize], free: usize, scope_open: usize, owner: &str) -> bool {
    let tokens = view.tokens();
    let branches = enclosing_branches(view, free, scope_open);

    branches.iter().all(|branch| match branch {
        Branch::If {
            cond_open,
            cond_close,
            body_end,
        } => {
            condition_only_tests(tokens, *cond_open, *cond_close, owner)
                || else_also_releases(view, releases, *body_end)
        }
        _ => false,
    })
}

/// `if (..) { free(p); } else { free(p); }`
fn else_also_releases(view: &SourceView<'_>, releases: &[usize], if_body_end: usize) -> bool {
    let else_idx = if_body_end + 1;
    if !view.is_at(else_idx, "else") {
        return false;
    }
    let body_start = else_idx + 1;
    let body_end = if view.is_at(body_start, "{") {
        view.matching(body_start).unwrap_or(body_start)
    } else {
        view.statement_end(body_start)
    };
    releases.iter().any(|&r| r > body_start && r <= body_end)
}

/// `if (!p) return;` leaves nothing to free
fn is_null_bailout(view: &SourceView<'_>, ret: usize, scope_open: usize, owner: &str) -> bool {
    let tokens = view.tokens();
    match enclosing_branches(view, ret, scope_open).first() {
        Some(Branch::If {
            cond_open,
            cond_close,
            ..
        }) => condition_only_tests(tokens, *cond_open, *cond_close, owner),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::DefectCategory;

    fn fragment(category: DefectCategory, source: &str) -> Fragment {
        Fragment::new("t", category, source, Verdict::Safe).unwrap()
    }

    fn overflow(source: &str) -> Verdict {
        buffer_overflow(&fragment(DefectCategory::BufferOverflow, source))
    }

    fn deref(source: &str) -> Verdict {
        null_deref(&fragment(DefectCategory::NullDeref, source))
    }

    fn leak(source: &str) -> Verdict {
        memory_leak(&fragment(DefectCategory::MemoryLeak, source))
    }

    #[test]
    fn test_inclusive_bound_is_unsafe() {
        let src = "void f(int index) { char buffer[10]; if (index >= 0 && index <= 10) { buffer[index] = 'x'; } }";
        assert_eq!(overflow(src), Verdict::Unsafe);
    }

    #[test]
    fn test_strict_bound_is_safe() {
        let src = "void f(int index) { char buffer[10]; if (index >= 0 && index < 10) { buffer[index] = 'x'; } }";
        assert_eq!(overflow(src), Verdict::Safe);
    }

    #[test]
    fn test_symbolic_capacity_and_loops() {
        let unsafe_loop = "#define N 8\nint a[N];\nvoid f() { for (int i = 0; i <= N; i++) a[i] = 0; }";
        let safe_loop = "#define N 8\nint a[N];\nvoid f() { for (int i = 0; i < N; i++) a[i] = 0; }";
        let adjusted = "int a[8];\nvoid f(int i) { if (i <= 8 - 1) a[i] = 0; }";
        assert_eq!(overflow(unsafe_loop), Verdict::Unsafe);
        assert_eq!(overflow(safe_loop), Verdict::Safe);
        assert_eq!(overflow(adjusted), Verdict::Safe);
    }

    #[test]
    fn test_bound_near_integer_limit() {
        let literal = "int a[4]; void f(int i) { if (i < 9223372036854775807 + 5) a[i] = 0; }";
        let defined = "#define N 9223372036854775807\nint a[4]; void f(int i) { if (i <= N + 1) a[i] = 0; }";
        assert_eq!(overflow(literal), Verdict::Unsafe);
        assert_eq!(overflow(defined), Verdict::Unsafe);
    }

    #[test]
    fn test_constant_index_past_end() {
        assert_eq!(overflow("char b[4]; b[4] = 0;"), Verdict::Unsafe);
        assert_eq!(overflow("char b[4]; b[3] = 0;"), Verdict::Safe);
    }

    #[test]
    fn test_null_deref_after_conditional_null() {
        let src = "void f(int* ptr, int condition) { if (condition) ptr = NULL; printf(\"%d\", *ptr); }";
        assert_eq!(deref(src), Verdict::Unsafe);
    }

    #[test]
    fn test_null_deref_guarded() {
        let src = "void f(int* ptr, int condition) { if (condition) ptr = NULL; if (ptr != NULL) printf(\"%d\", *ptr); }";
        assert_eq!(deref(src), Verdict::Safe);
    }

    #[test]
    fn test_check_before_reassignment_does_not_count() {
        let src = "void f(node_t *n) { if (n) { n = NULL; } n->value = 1; }";
        assert_eq!(deref(src), Verdict::Unsafe);
    }

    #[test]
    fn test_address_of_needs_no_check() {
        assert_eq!(deref("void f() { int x = 1; int *p = &x; *p = 2; }"), Verdict::Safe);
    }

    #[test]
    fn test_contract_precondition_counts() {
        let src = "/*@ requires \\valid(p); */\nint get(int *p) { return *p; }";
        assert_eq!(deref(src), Verdict::Safe);
    }

    #[test]
    fn test_deref_as_conditional_body() {
        assert_eq!(deref("void f(int *p, int c) { if (c) *p = 1; }"), Verdict::Unsafe);
        assert_eq!(deref("void f(int *p) { if (p != NULL) *p = 1; }"), Verdict::Safe);
    }

    #[test]
    fn test_null_check_that_falls_through() {
        assert_eq!(deref("void f(int *p) { if (p == NULL) log_msg(); *p = 1; }"), Verdict::Unsafe);
        assert_eq!(deref("void f(int *p) { if (p == NULL) return; *p = 1; }"), Verdict::Safe);
        assert_eq!(deref("void f(int *p) { if (p) { g(); } *p = 1; }"), Verdict::Unsafe);
        assert_eq!(deref("void f(int *p) { if (p && p->next) { g(p->next); } }"), Verdict::Safe);
    }

    #[test]
    fn test_multiplication_is_not_a_deref() {
        assert_eq!(deref("int area(int w, int *h) { if (!h) return 0; return w * *h; }"), Verdict::Safe);
    }

    #[test]
    fn test_leak_without_free() {
        assert_eq!(leak("void f() { int* ptr = (int*)malloc(sizeof(int) * 100); }"), Verdict::Unsafe);
    }

    #[test]
    fn test_free_guarded_by_own_null_check() {
        let src = "void f() { int* ptr = (int*)malloc(sizeof(int) * 100); if (ptr) free(ptr); }";
        assert_eq!(leak(src), Verdict::Safe);
    }

    #[test]
    fn test_free_on_one_branch_only() {
        let src = "void f(int c) { char *p = malloc(8); if (c) { free(p); } }";
        assert_eq!(leak(src), Verdict::Unsafe);
        let both = "void f(int c) { char *p = malloc(8); if (c) { free(p); } else { free(p); } }";
        assert_eq!(leak(both), Verdict::Safe);
    }

    #[test]
    fn test_early_return_leaks() {
        let src = "int f(int c) { char *p = malloc(8); if (!p) return -1; if (c) return 1; free(p); return 0; }";
        assert_eq!(leak(src), Verdict::Unsafe);
        let ok = "int f() { char *p = malloc(8); if (!p) return -1; memset(p, 0, 8); free(p); return 0; }";
        assert_eq!(leak(ok), Verdict::Safe);
    }

    #[test]
    fn test_ownership_transfer() {
        assert_eq!(leak("char *dup() { char *p = malloc(4); return p; }"), Verdict::Safe);
        assert_eq!(leak("void f(list_t *l) { item_t *it = malloc(16); list_push(l, it); }"), Verdict::Safe);
        assert_eq!(leak("void f() { malloc(16); }"), Verdict::Unsafe);
    }
}
