//! Lossless GLSL tokenizer.
//!
//! Every byte of the input lands in exactly one token, so concatenating the
//! token texts reproduces the source. Preprocessor lines (including
//! backslash continuations) are kept whole as `Directive` tokens.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Number,
    Punct,
    Whitespace,
    Comment,
    Directive,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

const OPERATORS: [&str; 21] = [
    "<<=", ">>=", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "==", "!=", "<=",
    ">=", "&&", "||", "^^", "<<", ">>",
];

/// Assignment operators, including the increment forms.
pub const ASSIGNMENT_OPS: [&str; 13] = [
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=", "++", "--",
];

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn ident(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Ident, text)
    }

    pub fn punct(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Punct, text)
    }

    pub fn space(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Whitespace, text)
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_assignment(&self) -> bool {
        self.kind == TokenKind::Punct && ASSIGNMENT_OPS.contains(&self.text.as_str())
    }

    /// Plain decimal integer literal (`3`, not `3.0`, `3u` or `0x3`).
    pub fn is_int_literal(&self) -> bool {
        self.kind == TokenKind::Number && self.text.bytes().all(|b| b.is_ascii_digit())
    }

    /// Unsigned literal such as `3u` or `0xFFu`.
    pub fn is_uint_literal(&self) -> bool {
        self.kind == TokenKind::Number
            && (self.text.ends_with('u') || self.text.ends_with('U'))
            && !self.text.contains('.')
    }

    pub fn is_float_literal(&self) -> bool {
        if self.kind != TokenKind::Number || self.text.starts_with("0x") || self.text.starts_with("0X") {
            return false;
        }
        self.text.contains('.')
            || self.text.contains(['e', 'E'])
            || self.text.ends_with(['f', 'F'])
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line_start: bool,
    directives: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, directives: bool) -> Self {
        Self {
            src,
            pos: 0,
            line_start: true,
            directives,
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let rest = &self.src[self.pos..];
        let first = rest.chars().next()?;

        let (kind, len) = if first.is_whitespace() {
            let len = rest
                .find(|c: char| !c.is_whitespace())
                .unwrap_or(rest.len());
            (TokenKind::Whitespace, len)
        } else if rest.starts_with("//") {
            (TokenKind::Comment, rest.find('\n').unwrap_or(rest.len()))
        } else if rest.starts_with("/*") {
            let len = rest[2..].find("*/").map(|end| end + 4).unwrap_or(rest.len());
            (TokenKind::Comment, len)
        } else if first == '#' && self.directives && self.line_start {
            (TokenKind::Directive, directive_len(rest))
        } else if first.is_ascii_alphabetic() || first == '_' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            (TokenKind::Ident, len)
        } else if first.is_ascii_digit()
            || (first == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            (TokenKind::Number, number_len(rest))
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            (TokenKind::Punct, op.len())
        } else if first.is_ascii_punctuation() {
            (TokenKind::Punct, 1)
        } else {
            (TokenKind::Unknown, first.len_utf8())
        };

        let text = &rest[..len];
        match kind {
            TokenKind::Whitespace => {
                if text.contains('\n') {
                    self.line_start = true;
                }
            }
            TokenKind::Comment => {}
            _ => self.line_start = false,
        }
        self.pos += len;
        Some(Token::new(kind, text))
    }
}

fn directive_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\n' {
            let mut back = index;
            if back > 0 && bytes[back - 1] == b'\r' {
                back -= 1;
            }
            if back > 0 && bytes[back - 1] == b'\\' {
                index += 1;
                continue;
            }
            return back;
        }
        index += 1;
    }
    bytes.len()
}

fn number_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut index = 0;
    let take_digits = |index: &mut usize, hex: bool| {
        while *index < bytes.len()
            && (bytes[*index].is_ascii_digit() || (hex && bytes[*index].is_ascii_hexdigit()))
        {
            *index += 1;
        }
    };

    if rest.starts_with("0x") || rest.starts_with("0X") {
        index = 2;
        take_digits(&mut index, true);
    } else {
        take_digits(&mut index, false);
        if index < bytes.len() && bytes[index] == b'.' {
            index += 1;
            take_digits(&mut index, false);
        }
        if index < bytes.len() && (bytes[index] == b'e' || bytes[index] == b'E') {
            let mut next = index + 1;
            if next < bytes.len() && (bytes[next] == b'+' || bytes[next] == b'-') {
                next += 1;
            }
            if next < bytes.len() && bytes[next].is_ascii_digit() {
                index = next;
                take_digits(&mut index, false);
            }
        }
    }

    let suffix = &rest[index..];
    if suffix.starts_with("lf") || suffix.starts_with("LF") {
        index += 2;
    } else if suffix.starts_with(['u', 'U', 'f', 'F']) {
        index += 1;
    }
    index
}

/// Tokenizes a full source, recognising preprocessor lines.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source, true).collect()
}

/// Tokenizes a code fragment (such as a macro body) without treating `#` as
/// the start of a directive.
pub fn tokenize_code(source: &str) -> Vec<Token> {
    Lexer::new(source, false).collect()
}

pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|token| token.text.as_str()).collect()
}

/// Index of the first non-trivia token at or after `from`.
pub fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&index| !tokens[index].is_trivia())
}

/// Index of the last non-trivia token strictly before `before`.
pub fn prev_significant(tokens: &[Token], before: usize) -> Option<usize> {
    (0..before.min(tokens.len()))
        .rev()
        .find(|&index| !tokens[index].is_trivia())
}

fn closer_for(open: &str) -> Option<&'static str> {
    match open {
        "(" => Some(")"),
        "[" => Some("]"),
        "{" => Some("}"),
        _ => None,
    }
}

fn opener_for(close: &str) -> Option<&'static str> {
    match close {
        ")" => Some("("),
        "]" => Some("["),
        "}" => Some("{"),
        _ => None,
    }
}

/// Finds the token closing the bracket opened at `open`.
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let opener = tokens.get(open)?;
    if opener.kind != TokenKind::Punct {
        return None;
    }
    let closer = closer_for(&opener.text)?;
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct(&opener.text) {
            depth += 1;
        } else if token.is_punct(closer) {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
        }
    }
    None
}

/// Finds the token opening the bracket closed at `close`.
pub fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let closer = tokens.get(close)?;
    if closer.kind != TokenKind::Punct {
        return None;
    }
    let opener = opener_for(&closer.text)?;
    let mut depth = 0usize;
    for index in (0..=close).rev() {
        let token = &tokens[index];
        if token.is_punct(&closer.text) {
            depth += 1;
        } else if token.is_punct(opener) {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
        }
    }
    None
}

/// Splits the tokens strictly between `open` and its matching closer at
/// depth-zero commas, returning index ranges.
pub fn split_args(tokens: &[Token], open: usize, close: usize) -> Vec<std::ops::Range<usize>> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = open + 1;
    for index in open + 1..close {
        let token = &tokens[index];
        if token.kind != TokenKind::Punct {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            "," if depth == 0 => {
                args.push(start..index);
                start = index + 1;
            }
            _ => {}
        }
    }
    if tokens[open + 1..close].iter().any(|token| !token.is_trivia()) {
        args.push(start..close);
    }
    args
}
