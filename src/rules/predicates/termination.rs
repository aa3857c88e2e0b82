use crate::domain::model::{Fragment, Verdict};
use crate::rules::lexer::SourceView;
use crate::rules::patterns::{enclosing_branches, is_constant_name, subject_at, Branch};

pub fn unbounded_loop(fragment: &Fragment) -> Verdict {
    let view = SourceView::new(fragment.source_text());
    let loops = find_loops(&view);
    let unbounded = loops.iter().find(|l| !is_bounded(&view, l, &loops));
    if let Some(l) = unbounded {
        tracing::debug!("loop at byte {} has no provable bound", view.tokens()[l.keyword].start);
    }
    Verdict::unsafe_if(unbounded.is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Either,
}

/// Token ranges are half-open.
#[derive(Debug, Clone, Copy)]
struct Loop {
    keyword: usize,
    cond: (usize, usize),
    /// `for` step expression; for `while` the condition itself may step
    step: (usize, usize),
    body: (usize, usize),
}

fn find_loops(view: &SourceView<'_>) -> Vec<Loop> {
    let tokens = view.tokens();
    let mut loops = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        match token.text {
            "for" if view.is_at(idx + 1, "(") => {
                let Some(close) = view.matching(idx + 1) else {
                    continue;
                };
                let semis: Vec<usize> = (idx + 2..close)
                    .filter(|&i| tokens[i].is(";") && view.depth(i) == view.depth(idx))
                    .collect();
                if semis.len() != 2 {
                    continue;
                }
                loops.push(Loop {
                    keyword: idx,
                    cond: (semis[0] + 1, semis[1]),
                    step: (semis[1] + 1, close),
                    body: body_after(view, close),
                });
            }
            "while" if view.is_at(idx + 1, "(") && !is_do_tail(view, idx) => {
                let Some(close) = view.matching(idx + 1) else {
                    continue;
                };
                loops.push(Loop {
                    keyword: idx,
                    cond: (idx + 2, close),
                    step: (idx + 2, close),
                    body: body_after(view, close),
                });
            }
            "do" => {
                let body = body_after(view, idx);
                let tail = body.1;
                if !view.is_at(tail, "while") || !view.is_at(tail + 1, "(") {
                    continue;
                }
                let Some(close) = view.matching(tail + 1) else {
                    continue;
                };
                loops.push(Loop {
                    keyword: idx,
                    cond: (tail + 2, close),
                    step: (tail + 2, close),
                    body,
                });
            }
            _ => {}
        }
    }
    loops
}

/// Body range following the token at `head`; the end is one past the body.
fn body_after(view: &SourceView<'_>, head: usize) -> (usize, usize) {
    let start = head + 1;
    if view.is_at(start, "{") {
        let close = view.matching(start).unwrap_or(start);
        (start + 1, close + 1)
    } else {
        (start, view.statement_end(start) + 1)
    }
}

/// Is this `while` the tail of `do { .. } while (c);`?
fn is_do_tail(view: &SourceView<'_>, idx: usize) -> bool {
    if idx == 0 {
        return false;
    }
    let prev = idx - 1;
    if view.is_at(prev, "}") {
        if let Some(open) = view.matching(prev) {
            return open > 0 && view.is_at(open - 1, "do");
        }
    }
    // do stmt; while (c);
    let start = view.statement_start(prev);
    start > 0 && view.is_at(start - 1, "do")
}

fn is_bounded(view: &SourceView<'_>, l: &Loop, loops: &[Loop]) -> bool {
    bounded_by_condition(view, l) || bounded_by_exit(view, l, loops)
}

fn bounded_by_condition(view: &SourceView<'_>, l: &Loop) -> bool {
    let tokens = view.tokens();
    let (from, to) = l.cond;
    let disjunctive = tokens[from..to].iter().any(|t| t.is("||"));

    let mut verdicts = (from..to).filter_map(|i| comparison_bounds(view, l, i));
    if disjunctive {
        let verdicts: Vec<bool> = verdicts.collect();
        !verdicts.is_empty() && verdicts.iter().all(|b| *b)
    } else {
        verdicts.any(|b| b)
    }
}

/// For a comparison operator at `op`: does one side move toward the other?
fn comparison_bounds(view: &SourceView<'_>, l: &Loop, op: usize) -> Option<bool> {
    let tokens = view.tokens();
    let toward = match tokens[op].text {
        "<" | "<=" => Direction::Up,
        ">" | ">=" => Direction::Down,
        "!=" => Direction::Either,
        _ => return None,
    };
    if op == 0 || op + 1 >= tokens.len() {
        return None;
    }
    let left = op - 1;
    let right = op + 1;

    // v < bound, bound > v
    let forward = is_fixed_bound(view, l, right) && moves(view, l, left, toward);
    let backward = is_fixed_bound(view, l, left) && moves(view, l, right, flip(toward));
    Some(forward || backward)
}

fn flip(direction: Direction) -> Direction {
    match direction {
        Direction::Up => Direction::Down,
        Direction::Down => Direction::Up,
        Direction::Either => Direction::Either,
    }
}

/// A literal, a constant, or a variable the loop never writes.
fn is_fixed_bound(view: &SourceView<'_>, l: &Loop, idx: usize) -> bool {
    let tokens = view.tokens();
    let token = &tokens[idx];
    if token.is_number() || view.resolve_const(token.text).is_some() || is_constant_name(token.text) {
        return true;
    }
    // -5
    if token.is("-") && tokens.get(idx + 1).is_some_and(|t| t.is_number()) {
        return true;
    }
    if !token.is_ident() || view.is_at(idx + 1, "(") || view.is_at(idx + 1, "[") {
        return false;
    }
    steps_of(view, l, token.text).is_empty()
}

/// Does the variable at `idx` change only in `direction` inside the loop?
fn moves(view: &SourceView<'_>, l: &Loop, idx: usize, direction: Direction) -> bool {
    let tokens = view.tokens();
    let token = &tokens[idx];
    if !token.is_ident() || view.is_at(idx + 1, "(") {
        return false;
    }
    let steps = steps_of(view, l, token.text);
    if steps.is_empty() || steps.iter().any(Option::is_none) {
        return false;
    }
    let steps: Vec<Direction> = steps.into_iter().flatten().collect();
    match direction {
        Direction::Either => steps.iter().all(|s| *s == steps[0]),
        d => steps.iter().all(|s| *s == d),
    }
}

/// Direction of every write to `name` in the loop's step and body;
/// `None` for writes that do not move it monotonically.
fn steps_of(view: &SourceView<'_>, l: &Loop, name: &str) -> Vec<Option<Direction>> {
    let tokens = view.tokens();
    let ranges = [l.step, l.body];
    let mut steps = Vec::new();

    for (from, to) in ranges {
        for i in from..to.min(tokens.len()) {
            if !subject_at(tokens, i, &[name]) {
                continue;
            }
            if let Some(step) = write_direction(view, i, name) {
                steps.push(step);
            }
        }
    }
    steps
}

/// `Some(Some(dir))` for a monotone step, `Some(None)` for any other write.
fn write_direction(view: &SourceView<'_>, idx: usize, name: &str) -> Option<Option<Direction>> {
    let tokens = view.tokens();
    let next = tokens.get(idx + 1).map(|t| t.text);
    let prev = idx.checked_sub(1).map(|p| tokens[p].text);

    match (prev, next) {
        (Some("++"), _) | (_, Some("++")) => return Some(Some(Direction::Up)),
        (Some("--"), _) | (_, Some("--")) => return Some(Some(Direction::Down)),
        _ => {}
    }

    let amount = |at: usize| -> Option<i64> {
        let token = tokens.get(at)?;
        if !view.is_at(at + 1, ";") && !view.is_at(at + 1, ")") {
            return None;
        }
        view.resolve_const(token.text)
    };
    let signed_step = |value: Option<i64>, negate: bool| match value {
        Some(v) if v != 0 => Some(if (v > 0) != negate { Direction::Up } else { Direction::Down }),
        _ => None,
    };

    match next? {
        "+=" => Some(signed_step(amount(idx + 2), false)),
        "-=" => Some(signed_step(amount(idx + 2), true)),
        "=" => {
            // v = v + k, v = v - k
            let same = view.is_at(idx + 2, name);
            let op = tokens.get(idx + 3).map(|t| t.text);
            let step = match (same, op) {
                (true, Some("+")) => signed_step(amount(idx + 4), false),
                (true, Some("-")) => signed_step(amount(idx + 4), true),
                _ => None,
            };
            Some(step)
        }
        "*=" | "/=" | "%=" | "&=" | "|=" | "^=" | "<<=" | ">>=" => Some(None),
        _ => None,
    }
}

/// A `break` or `return` guarded by a comparison on a variable that the body
/// moves toward the compared bound.
fn bounded_by_exit(view: &SourceView<'_>, l: &Loop, loops: &[Loop]) -> bool {
    let tokens = view.tokens();
    let (from, to) = l.body;

    (from..to.min(tokens.len())).any(|i| {
        let exits = tokens[i].is("return") || (tokens[i].is("break") && innermost_loop(loops, i) == Some(l.keyword));
        if !exits {
            return false;
        }
        let branches = enclosing_branches(view, i, from.saturating_sub(1));
        if tokens[i].is("break") && branches.iter().any(|b| *b == Branch::Switch) {
            return false;
        }
        match branches.iter().find(|b| matches!(b, Branch::If { .. })) {
            Some(Branch::If { cond_open, cond_close, .. }) => {
                (cond_open + 1..*cond_close).any(|op| exit_comparison_reached(view, l, op))
            }
            _ => false,
        }
    })
}

/// `if (u > N) break;` is reached when u moves up, `if (u < N)` when it moves down.
fn exit_comparison_reached(view: &SourceView<'_>, l: &Loop, op: usize) -> bool {
    let tokens = view.tokens();
    let reached_by = match tokens[op].text {
        ">" | ">=" => Direction::Up,
        "<" | "<=" => Direction::Down,
        "==" => Direction::Either,
        _ => return false,
    };
    if op == 0 || op + 1 >= tokens.len() {
        return false;
    }
    (is_fixed_bound(view, l, op + 1) && moves(view, l, op - 1, reached_by))
        || (is_fixed_bound(view, l, op - 1) && moves(view, l, op + 1, flip(reached_by)))
}

fn innermost_loop(loops: &[Loop], idx: usize) -> Option<usize> {
    loops
        .iter()
        .filter(|l| idx >= l.body.0 && idx < l.body.1)
        .min_by_key(|l| l.body.1 - l.body.0)
        .map(|l| l.keyword)
}
