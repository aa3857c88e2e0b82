// thread routine 一律假設會在多個執行緒上同時執行

use crate::domain::model::{Fragment, Verdict};
use crate::rules::lexer::{FunctionDef, SourceView, Token};
use crate::rules::patterns::{
    declaration_at, declarations_in, is_plain_name, is_write_at, member_chain, ASSIGNMENT_OPS,
};
use std::collections::HashSet;

pub fn data_race(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    Verdict::unsafe_if(has_unprotected_shared_write(&view))
}

fn has_unprotected_shared_write(view: &SourceView<'_>) -> bool {
    let functions = view.functions();

    if functions.is_empty() {
        // a bare snippet is read as the body of a thread routine
        let locals = loop_header_locals(view, 0, view.len());
        let atomics: HashSet<&str> = declarations_in(view, 0, view.len())
            .into_iter()
            .filter(|d| d.is_atomic())
            .map(|d| d.name)
            .collect();
        return find_unprotected_write(view, 0, view.len(), |name| {
            !locals.contains(name) && !atomics.contains(name)
        })
        .is_some();
    }

    let routines = thread_routines(view, &functions);
    if routines.is_empty() {
        return false;
    }
    let shared = shared_variables(view, &functions);

    routines.iter().any(|routine| {
        let locals: HashSet<&str> = declarations_in(view, routine.params_open, routine.body_close)
            .into_iter()
            .map(|d| d.name)
            .collect();
        let found = find_unprotected_write(view, routine.body_open + 1, routine.body_close, |name| {
            shared.contains(name) && !locals.contains(name)
        });
        if let Some(name) = found {
            tracing::debug!("thread routine '{}' writes shared '{}' without a lock", routine.name, name);
        }
        found.is_some()
    })
}

fn thread_routines<'a>(view: &SourceView<'a>, functions: &[FunctionDef<'a>]) -> Vec<FunctionDef<'a>> {
    let spawned = spawned_routines(view);
    functions
        .iter()
        .copied()
        .filter(|f| spawned.contains(f.name) || has_routine_signature(view, f))
        .collect()
}

/// `void *name(void *arg)`
fn has_routine_signature(view: &SourceView<'_>, function: &FunctionDef<'_>) -> bool {
    let tokens = view.tokens();
    let returns = &tokens[function.decl_start..function.name_idx];
    let params = &tokens[function.params_open + 1..function.params_close];
    let void_pointer = |part: &[Token<'_>]| part.iter().any(|t| t.is("void")) && part.iter().any(|t| t.is("*"));
    void_pointer(returns) && void_pointer(params)
}

/// Names passed as the start routine of `pthread_create(&t, attr, f, arg)`
/// or `thrd_create(&t, f, arg)`.
fn spawned_routines<'a>(view: &SourceView<'a>) -> HashSet<&'a str> {
    let tokens = view.tokens();
    let mut names = HashSet::new();
    for (idx, token) in tokens.iter().enumerate() {
        let position = match token.text {
            "pthread_create" => 2,
            "thrd_create" => 1,
            _ => continue,
        };
        if !view.is_at(idx + 1, "(") {
            continue;
        }
        if let Some(arg) = call_arguments(view, idx + 1).get(position) {
            // `f` or `&f`
            if let Some(name) = arg.iter().rev().find(|t| t.is_ident()) {
                names.insert(name.text);
            }
        }
    }
    names
}

fn call_arguments<'v, 'a>(view: &'v SourceView<'a>, open: usize) -> Vec<&'v [Token<'a>]> {
    let tokens = view.tokens();
    let Some(close) = view.matching(open) else {
        return Vec::new();
    };
    let mut args = Vec::new();
    let mut start = open + 1;
    let mut i = open + 1;
    while i < close {
        if tokens[i].is("(") || tokens[i].is("[") || tokens[i].is("{") {
            i = view.matching(i).unwrap_or(i) + 1;
            continue;
        }
        if tokens[i].is(",") {
            args.push(&tokens[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    args.push(&tokens[start..close]);
    args
}

/// File-scope, non-atomic variables.
fn shared_variables<'a>(view: &SourceView<'a>, functions: &[FunctionDef<'a>]) -> HashSet<&'a str> {
    let in_signature = |idx: usize| functions.iter().any(|f| idx > f.params_open && idx < f.params_close);
    declarations_in(view, 0, view.len())
        .into_iter()
        .filter(|d| view.depth(d.idx) == 0 && !in_signature(d.idx) && !d.is_atomic())
        .filter(|d| !d.words.contains(&"const"))
        .map(|d| d.name)
        .collect()
}

/// `for (int i = 0; ..)` counters are private to each thread.
fn loop_header_locals<'a>(view: &SourceView<'a>, from: usize, to: usize) -> HashSet<&'a str> {
    let tokens = view.tokens();
    let mut locals = HashSet::new();
    for idx in from..to.min(tokens.len()) {
        if !tokens[idx].is("for") || !view.is_at(idx + 1, "(") {
            continue;
        }
        if let Some(close) = view.matching(idx + 1) {
            locals.extend(declarations_in(view, idx + 2, close).into_iter().map(|d| d.name));
        }
    }
    locals
}

/// First write to a name accepted by `is_shared` in `from..to` made outside a lock.
fn find_unprotected_write<'a>(
    view: &SourceView<'a>,
    from: usize,
    to: usize,
    is_shared: impl Fn(&str) -> bool,
) -> Option<&'a str> {
    let tokens = view.tokens();
    let mut lock_depth: i32 = 0;

    for idx in from..to.min(tokens.len()) {
        let token = &tokens[idx];
        if token.is_ident() && view.is_at(idx + 1, "(") {
            if is_lock_call(token.text, "unlock") {
                lock_depth -= 1;
            } else if is_lock_call(token.text, "lock") || is_lock_call(token.text, "trylock") {
                lock_depth += 1;
            }
            continue;
        }
        if !is_plain_name(tokens, idx) || !is_shared(token.text) {
            continue;
        }
        // an initialiser is not a concurrent write
        if declaration_at(view, idx).is_some() {
            continue;
        }
        if is_shared_write(view, idx) && lock_depth <= 0 {
            return Some(token.text);
        }
    }
    None
}

/// `pthread_mutex_lock`, `mtx_lock`, `spin_lock`, plain `lock`
fn is_lock_call(name: &str, verb: &str) -> bool {
    name == verb || name.strip_suffix(verb).is_some_and(|prefix| prefix.ends_with('_'))
}

fn is_shared_write(view: &SourceView<'_>, idx: usize) -> bool {
    let tokens = view.tokens();
    // buffer[i] = v
    if view.is_at(idx + 1, "[") {
        let Some(close) = view.matching(idx + 1) else {
            return false;
        };
        return tokens
            .get(close + 1)
            .is_some_and(|t| ASSIGNMENT_OPS.contains(&t.text) || t.is("++") || t.is("--"));
    }
    let chain = member_chain(tokens, idx);
    is_write_at(tokens, idx, chain.len())
}
