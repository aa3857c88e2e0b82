// C 片段 tokenizer，另外記下括號配對與 #define / ACSL 契約

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Char,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the first character in the source
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl<'a> Token<'a> {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }

    pub fn is_number(&self) -> bool {
        self.kind == TokenKind::Number
    }

    /// Tokens that can end an operand (`x`, `3`, `)`, `]`)
    pub fn ends_operand(&self) -> bool {
        (matches!(self.kind, TokenKind::Ident | TokenKind::Number | TokenKind::Char)
            && !is_keyword(self.text))
            || self.is(")")
            || self.is("]")
    }

    /// Tokens that can start an operand (`x`, `3`, `(`)
    pub fn starts_operand(&self) -> bool {
        (matches!(self.kind, TokenKind::Ident | TokenKind::Number | TokenKind::Char)
            && !is_keyword(self.text))
            || self.is("(")
    }
}

const PUNCT3: [&str; 3] = ["<<=", ">>=", "..."];
const PUNCT2: [&str; 19] = [
    "<=", ">=", "==", "!=", "&&", "||", "++", "--", "->", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "<<", ">>",
];

const KEYWORDS: [&str; 18] = [
    "if", "else", "while", "for", "do", "switch", "case", "default", "return", "break",
    "continue", "goto", "sizeof", "typedef", "static", "extern", "const", "volatile",
];

pub fn is_keyword(text: &str) -> bool {
    KEYWORDS.contains(&text)
}

#[derive(Debug)]
pub struct SourceView<'a> {
    source: &'a str,
    tokens: Vec<Token<'a>>,
    pairs: Vec<Option<usize>>,
    depths: Vec<usize>,
    defines: HashMap<&'a str, &'a str>,
    define_lines: Vec<&'a str>,
    contracts: Vec<&'a str>,
    typedefs: HashSet<&'a str>,
}

/// A top-level function definition, as token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDef<'a> {
    pub name: &'a str,
    /// First token of the declaration (return type)
    pub decl_start: usize,
    pub name_idx: usize,
    pub params_open: usize,
    pub params_close: usize,
    pub body_open: usize,
    pub body_close: usize,
}

impl<'a> FunctionDef<'a> {
    pub fn contains(&self, idx: usize) -> bool {
        idx > self.body_open && idx < self.body_close
    }
}

impl<'a> SourceView<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        lexer.run();

        let pairs = match_brackets(&lexer.tokens);
        let depths = brace_depths(&lexer.tokens);

        let mut view = Self {
            source,
            tokens: lexer.tokens,
            pairs,
            depths,
            defines: lexer.defines,
            define_lines: lexer.define_lines,
            contracts: lexer.contracts,
            typedefs: HashSet::new(),
        };
        view.typedefs = view.collect_typedefs();
        view
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn tokens(&self) -> &[Token<'a>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Token<'a>> {
        self.tokens.get(idx)
    }

    /// Does token `idx` exist and have exactly this text?
    pub fn is_at(&self, idx: usize, text: &str) -> bool {
        self.tokens.get(idx).is_some_and(|t| t.is(text))
    }

    /// Index of the bracket matching the one at `idx`
    pub fn matching(&self, idx: usize) -> Option<usize> {
        self.pairs.get(idx).copied().flatten()
    }

    /// Brace depth in effect at token `idx`
    pub fn depth(&self, idx: usize) -> usize {
        self.depths.get(idx).copied().unwrap_or(0)
    }

    pub fn defines(&self) -> &HashMap<&'a str, &'a str> {
        &self.defines
    }

    /// Raw `#define` lines, in source order
    pub fn define_lines(&self) -> &[&'a str] {
        &self.define_lines
    }

    /// Bodies of ACSL contract comments, without the comment markers
    pub fn contracts(&self) -> &[&'a str] {
        &self.contracts
    }

    pub fn is_typedef_name(&self, text: &str) -> bool {
        self.typedefs.contains(text)
    }

    /// Integer value of a literal or of an object-like `#define`.
    pub fn resolve_const(&self, text: &str) -> Option<i64> {
        self.resolve_const_depth(text, 0)
    }

    fn resolve_const_depth(&self, text: &str, depth: usize) -> Option<i64> {
        if depth > 8 {
            return None;
        }
        let text = text.trim().trim_start_matches('(').trim_end_matches(')').trim();
        if let Some(value) = parse_int(text) {
            return Some(value);
        }
        if let Some(rest) = text.strip_prefix('-') {
            return self.resolve_const_depth(rest, depth + 1).and_then(i64::checked_neg);
        }
        let value = self.defines.get(text)?;
        self.resolve_const_depth(value, depth + 1)
    }

    /// Top-level function definitions in source order.
    pub fn functions(&self) -> Vec<FunctionDef<'a>> {
        let mut functions = Vec::new();
        let mut decl_start = 0;
        let mut idx = 0;

        while idx < self.tokens.len() {
            let token = &self.tokens[idx];
            if self.depth(idx) > 0 {
                idx += 1;
                continue;
            }

            if token.is(";") || token.is("}") {
                decl_start = idx + 1;
                idx += 1;
                continue;
            }

            if token.is_ident() && !is_keyword(token.text) && self.is_at(idx + 1, "(") {
                if let Some(params_close) = self.matching(idx + 1) {
                    if self.is_at(params_close + 1, "{") {
                        if let Some(body_close) = self.matching(params_close + 1) {
                            functions.push(FunctionDef {
                                name: token.text,
                                decl_start,
                                name_idx: idx,
                                params_open: idx + 1,
                                params_close,
                                body_open: params_close + 1,
                                body_close,
                            });
                            decl_start = body_close + 1;
                            idx = body_close + 1;
                            continue;
                        }
                    }
                }
            }

            if token.is("{") {
                // struct/enum bodies at file scope
                if let Some(close) = self.matching(idx) {
                    idx = close;
                    continue;
                }
            }
            idx += 1;
        }

        functions
    }

    /// The function whose body contains token `idx`
    pub fn enclosing_function(&self, functions: &[FunctionDef<'a>], idx: usize) -> Option<FunctionDef<'a>> {
        functions.iter().copied().find(|f| f.contains(idx))
    }

    /// Start of the statement containing `idx`: the token after the previous
    /// `;`, `{` or `}` at or above the same nesting.
    pub fn statement_start(&self, idx: usize) -> usize {
        let mut i = idx;
        while i > 0 {
            let prev = &self.tokens[i - 1];
            if prev.is(";") || prev.is("{") || prev.is("}") {
                break;
            }
            if prev.is(")") {
                // skip whole parenthesised groups, `for (a; b; c)` included
                match self.pairs[i - 1] {
                    Some(open) => {
                        i = open;
                        continue;
                    }
                    None => break,
                }
            }
            i -= 1;
        }
        i
    }

    /// End (index of the terminating `;`) of the statement starting at or containing `idx`.
    pub fn statement_end(&self, idx: usize) -> usize {
        let mut i = idx;
        while i < self.tokens.len() {
            let token = &self.tokens[i];
            if token.is(";") {
                return i;
            }
            if token.is("(") || token.is("[") || token.is("{") {
                match self.pairs[i] {
                    Some(close) if token.is("{") => return close,
                    Some(close) => {
                        i = close + 1;
                        continue;
                    }
                    None => return self.tokens.len().saturating_sub(1),
                }
            }
            if token.is("}") {
                return i.saturating_sub(1);
            }
            i += 1;
        }
        self.tokens.len().saturating_sub(1)
    }

    /// Raw source text covering tokens `from..=to`.
    pub fn text_between(&self, from: usize, to: usize) -> &'a str {
        match (self.tokens.get(from), self.tokens.get(to)) {
            (Some(a), Some(b)) if a.start <= b.end => &self.source[a.start..b.end],
            _ => "",
        }
    }

    fn collect_typedefs(&self) -> HashSet<&'a str> {
        let mut names = HashSet::new();
        for (idx, token) in self.tokens.iter().enumerate() {
            if !token.is("typedef") {
                continue;
            }
            let end = self.statement_end(idx);
            // `typedef struct {..} name;` ends at the closing brace, so look past it
            let end = if self.is_at(end, "}") {
                self.statement_end(end + 1)
            } else {
                end
            };
            if end < idx || end >= self.tokens.len() {
                continue;
            }
            if let Some(name) = self.tokens[idx..=end]
                .iter()
                .rev()
                .find(|t| t.is_ident())
            {
                names.insert(name.text);
            }
        }
        names
    }
}

/// Parse a C integer literal (`10`, `0x1F`, `100u`, `5L`).
pub fn parse_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    trimmed.parse::<i64>().ok()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token<'a>>,
    defines: HashMap<&'a str, &'a str>,
    define_lines: Vec<&'a str>,
    contracts: Vec<&'a str>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            defines: HashMap::new(),
            define_lines: Vec::new(),
            contracts: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> u8 {
        self.bytes.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn at_line_start(&self) -> bool {
        self.source[..self.pos]
            .bytes()
            .rev()
            .take_while(|b| *b != b'\n')
            .all(|b| b == b' ' || b == b'\t')
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            text: &self.source[start..self.pos],
            start,
            end: self.pos,
        });
    }

    fn run(&mut self) {
        while self.pos < self.bytes.len() {
            let c = self.peek(0);
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'/' if self.peek(1) == b'/' => self.line_comment(),
                b'/' if self.peek(1) == b'*' => self.block_comment(),
                b'#' if self.at_line_start() => self.directive(),
                b'"' | b'\'' => self.quoted(c),
                b'0'..=b'9' => self.number(),
                b'.' if self.peek(1).is_ascii_digit() => self.number(),
                b'\\' if is_ident_start(self.peek(1)) => {
                    // ACSL built-ins such as `\valid` and `\null`
                    let start = self.pos;
                    self.pos += 1;
                    self.ident_tail();
                    self.push(TokenKind::Ident, start);
                }
                c if is_ident_start(c) => {
                    let start = self.pos;
                    self.ident_tail();
                    self.push(TokenKind::Ident, start);
                }
                c if c.is_ascii() => self.punct(),
                _ => {
                    let width = self.source[self.pos..]
                        .chars()
                        .next()
                        .map(char::len_utf8)
                        .unwrap_or(1);
                    self.pos += width;
                }
            }
        }
    }

    fn ident_tail(&mut self) {
        while is_ident_continue(self.peek(0)) {
            self.pos += 1;
        }
    }

    fn line_comment(&mut self) {
        let start = self.pos + 2;
        let end = self.source[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(self.bytes.len());
        if self.source[start..end].starts_with('@') {
            self.contracts.push(&self.source[start + 1..end]);
        }
        self.pos = end;
    }

    fn block_comment(&mut self) {
        let start = self.pos + 2;
        let (body_end, next) = match self.source[start..].find("*/") {
            Some(i) => (start + i, start + i + 2),
            None => (self.bytes.len(), self.bytes.len()),
        };
        if self.source[start..body_end].starts_with('@') {
            self.contracts.push(&self.source[start + 1..body_end]);
        }
        self.pos = next;
    }

    fn directive(&mut self) {
        let start = self.pos;
        let mut end = start;
        // honour `\` line continuations
        loop {
            match self.source[end..].find('\n') {
                Some(i) => {
                    let line_end = end + i;
                    if self.source[..line_end].trim_end_matches('\r').ends_with('\\') {
                        end = line_end + 1;
                        continue;
                    }
                    end = line_end;
                }
                None => end = self.bytes.len(),
            }
            break;
        }

        let line = &self.source[start..end];
        let body = line[1..].trim_start();
        if let Some(rest) = body.strip_prefix("define") {
            let rest = rest.trim_start();
            let name_len = rest
                .bytes()
                .take_while(|b| is_ident_continue(*b))
                .count();
            let name = &rest[..name_len];
            let after = &rest[name_len..];
            // function-like macros are not constants
            if !name.is_empty() && !after.starts_with('(') {
                let value = after.split("//").next().unwrap_or("").trim();
                self.defines.insert(name, value);
            }
            self.define_lines.push(line.trim_end());
        }
        self.pos = end;
    }

    fn quoted(&mut self, quote: u8) {
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.bytes.len() {
            match self.peek(0) {
                b'\\' => self.pos += 2,
                b'\n' => break,
                c if c == quote => {
                    self.pos += 1;
                    break;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.bytes.len());
        let kind = if quote == b'"' { TokenKind::Str } else { TokenKind::Char };
        self.push(kind, start);
    }

    fn number(&mut self) {
        let start = self.pos;
        let is_hex = self.peek(0) == b'0' && matches!(self.peek(1), b'x' | b'X');
        while self.pos < self.bytes.len() {
            let c = self.peek(0);
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                self.pos += 1;
            } else if (c == b'+' || c == b'-')
                && !is_hex
                && matches!(self.bytes[self.pos - 1], b'e' | b'E')
                && self.peek(1).is_ascii_digit()
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Number, start);
    }

    fn punct(&mut self) {
        let start = self.pos;
        let rest = &self.source[self.pos..];
        let width = PUNCT3
            .iter()
            .find(|p| rest.starts_with(*p))
            .map(|_| 3)
            .or_else(|| PUNCT2.iter().find(|p| rest.starts_with(*p)).map(|_| 2))
            .unwrap_or(1);
        self.pos += width;
        self.push(TokenKind::Punct, start);
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn match_brackets(tokens: &[Token<'_>]) -> Vec<Option<usize>> {
    let mut pairs = vec![None; tokens.len()];
    let mut stack: Vec<(usize, &str)> = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        match token.text {
            "(" | "[" | "{" if token.kind == TokenKind::Punct => stack.push((idx, token.text)),
            ")" | "]" | "}" if token.kind == TokenKind::Punct => {
                let opener = match token.text {
                    ")" => "(",
                    "]" => "[",
                    _ => "{",
                };
                // tolerate unbalanced input by unwinding to the nearest match
                if let Some(pos) = stack.iter().rposition(|(_, open)| *open == opener) {
                    let (open_idx, _) = stack[pos];
                    stack.truncate(pos);
                    pairs[open_idx] = Some(idx);
                    pairs[idx] = Some(open_idx);
                }
            }
            _ => {}
        }
    }
    pairs
}

fn brace_depths(tokens: &[Token<'_>]) -> Vec<usize> {
    let mut depths = Vec::with_capacity(tokens.len());
    let mut depth: usize = 0;
    for token in tokens {
        if token.is("}") && token.kind == TokenKind::Punct {
            depth = depth.saturating_sub(1);
        }
        depths.push(depth);
        if token.is("{") && token.kind == TokenKind::Punct {
            depth += 1;
        }
    }
    depths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(view: &SourceView<'a>) -> Vec<&'a str> {
        view.tokens().iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_skips_comments_and_keeps_contracts() {
        let view = SourceView::new(
            "/*@ requires divisor != 0; */\nint f(int n, int divisor) { // plain\n return n / divisor; }",
        );
        assert_eq!(view.contracts(), &[" requires divisor != 0; "]);
        assert!(!texts(&view).contains(&"plain"));
        assert!(texts(&view).contains(&"/"));
    }

    #[test]
    fn test_multi_char_operators() {
        let view = SourceView::new("if (i <= 10 && p->x != 0) i += 1;");
        assert_eq!(
            texts(&view),
            vec!["if", "(", "i", "<=", "10", "&&", "p", "->", "x", "!=", "0", ")", "i", "+=", "1", ";"]
        );
    }

    #[test]
    fn test_defines_resolve() {
        let view = SourceView::new("#define SIZE 10\n#define LIMIT (SIZE)\n#define SQ(x) ((x)*(x))\nint a[LIMIT];");
        assert_eq!(view.resolve_const("LIMIT"), Some(10));
        assert_eq!(view.resolve_const("0x20"), Some(32));
        assert_eq!(view.resolve_const("SQ"), None);
        assert_eq!(view.define_lines().len(), 3);
    }

    #[test]
    fn test_negated_minimum_does_not_resolve() {
        let view = SourceView::new("#define LOW -9223372036854775808\n#define FLIP -LOW\n#define NEG -8");
        assert_eq!(view.resolve_const("LOW"), Some(i64::MIN));
        assert_eq!(view.resolve_const("FLIP"), None);
        assert_eq!(view.resolve_const("NEG"), Some(-8));
    }

    #[test]
    fn test_functions_found_at_top_level() {
        let src = "int g = 0;\ntypedef struct { int a; } pair_t;\nvoid *worker(void *arg) { g++; return NULL; }\nint main() { if (g) { return 1; } return 0; }";
        let view = SourceView::new(src);
        let names: Vec<&str> = view.functions().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["worker", "main"]);
        assert!(view.is_typedef_name("pair_t"));
    }

    #[test]
    fn test_strings_are_single_tokens() {
        let view = SourceView::new("printf(\"Value: %d / 0\\n\", *ptr);");
        assert!(view.tokens().iter().any(|t| t.kind == TokenKind::Str));
        assert!(!texts(&view).contains(&"/"));
    }

    #[test]
    fn test_statement_bounds() {
        let view = SourceView::new("int x = 1; if (x) free(p); y = 2;");
        let free_idx = view.tokens().iter().position(|t| t.is("free")).unwrap();
        let start = view.statement_start(free_idx);
        assert_eq!(view.get(start).unwrap().text, "if");
        let end = view.statement_end(free_idx);
        assert!(view.is_at(end, ";"));
        assert_eq!(view.get(end - 1).unwrap().text, ")");
    }
}
