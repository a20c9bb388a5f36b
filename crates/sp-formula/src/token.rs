use serde::{Deserialize, Serialize};
use sp_columnar::ArithmeticOp;

use crate::FormulaError;
use crate::function::Function;

/// Half-open range of character offsets within one formula line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 1-based column of the first character.
    #[must_use]
    pub const fn column(self) -> usize {
        self.start + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TokenKind {
    /// Parameter or formula reference, canonicalised to upper case.
    Ident(String),
    Number(f64),
    Operator(ArithmeticOp),
    /// A known function name immediately followed by `(`.
    Function(Function),
    LParen,
    RParen,
    Comma,
    Assign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    fn new(kind: TokenKind, start: usize, end: usize) -> Self {
        Self {
            kind,
            span: Span::new(start, end),
        }
    }
}

/// Splits one formula line into tokens.
///
/// Blank lines and `#` comment lines produce no tokens. The function is pure,
/// so a whole formula file can be checked before any line is committed.
pub fn tokenize(line: &str, line_number: usize) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    if chars
        .iter()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| *c == '#')
    {
        return Ok(tokens);
    }

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                tokens.push(Token::new(TokenKind::Operator(ArithmeticOp::Add), i, i + 1));
                i += 1;
            }
            '-' => {
                tokens.push(Token::new(TokenKind::Operator(ArithmeticOp::Sub), i, i + 1));
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::new(TokenKind::Operator(ArithmeticOp::Pow), i, i + 2));
                    i += 2;
                } else {
                    tokens.push(Token::new(TokenKind::Operator(ArithmeticOp::Mul), i, i + 1));
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::new(TokenKind::Operator(ArithmeticOp::Div), i, i + 1));
                i += 1;
            }
            '^' => {
                tokens.push(Token::new(TokenKind::Operator(ArithmeticOp::Pow), i, i + 1));
                i += 1;
            }
            '(' => {
                tokens.push(Token::new(TokenKind::LParen, i, i + 1));
                i += 1;
            }
            ')' => {
                tokens.push(Token::new(TokenKind::RParen, i, i + 1));
                i += 1;
            }
            ',' => {
                tokens.push(Token::new(TokenKind::Comma, i, i + 1));
                i += 1;
            }
            '=' => {
                tokens.push(Token::new(TokenKind::Assign, i, i + 1));
                i += 1;
            }
            _ if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars, i)) => {
                let start = i;
                i = scan_number(&chars, i);
                // A literal running straight into letters or another dot
                // ("2X", "1.2.3") cannot be classified.
                if i < chars.len() && (is_word_char(chars[i]) || chars[i] == '.') {
                    let end = scan_word_tail(&chars, i);
                    return Err(syntax(
                        line,
                        line_number,
                        Span::new(start, end),
                        "malformed numeric literal",
                    ));
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| {
                    syntax(
                        line,
                        line_number,
                        Span::new(start, i),
                        "malformed numeric literal",
                    )
                })?;
                tokens.push(Token::new(TokenKind::Number(value), start, i));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();

                let mut lookahead = i;
                while lookahead < chars.len() && chars[lookahead].is_whitespace() {
                    lookahead += 1;
                }
                if chars.get(lookahead) == Some(&'(') {
                    let function = Function::from_name(&word).ok_or_else(|| {
                        syntax(
                            line,
                            line_number,
                            Span::new(start, i),
                            "unknown function",
                        )
                    })?;
                    tokens.push(Token::new(TokenKind::Function(function), start, i));
                } else {
                    tokens.push(Token::new(
                        TokenKind::Ident(word.to_ascii_uppercase()),
                        start,
                        i,
                    ));
                }
            }
            _ => {
                return Err(syntax(
                    line,
                    line_number,
                    Span::new(i, i + 1),
                    "unexpected character",
                ));
            }
        }
    }
    Ok(tokens)
}

pub(crate) fn syntax(line: &str, line_number: usize, span: Span, message: &str) -> FormulaError {
    let fragment: String = line
        .chars()
        .skip(span.start)
        .take(span.end.saturating_sub(span.start))
        .collect();
    FormulaError::Syntax {
        line: line_number,
        column: span.column(),
        fragment,
        message: message.to_owned(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(char::is_ascii_digit)
}

fn scan_digits(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    i
}

fn scan_number(chars: &[char], start: usize) -> usize {
    let mut i = scan_digits(chars, start);
    if i < chars.len() && chars[i] == '.' {
        i = scan_digits(chars, i + 1);
    }
    if i < chars.len() && matches!(chars[i], 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j], '+' | '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            i = scan_digits(chars, j);
        }
    }
    i
}

fn scan_word_tail(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && (is_word_char(chars[i]) || chars[i] == '.') {
        i += 1;
    }
    i
}
