//! Lexer for `$filter`, `$orderby` and `$apply` expressions.

use std::borrow::Cow;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string literal starting at byte {offset}")]
    UnterminatedString { offset: usize },
    #[error("unexpected character '{ch}' at byte {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },
}

impl LexError {
    pub fn offset(&self) -> usize {
        match self {
            LexError::UnterminatedString { offset } | LexError::UnexpectedCharacter { offset, .. } => {
                *offset
            }
        }
    }
}

/// Tokenizes a whole expression, terminating the stream with an `Eof` token.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut tokens = Lexer::new(input).collect::<Result<Vec<_>, _>>()?;
    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(input.len(), input.len()),
    });
    Ok(tokens)
}

pub struct Lexer<'a> {
    input: &'a str,
    /// Current position in the input (byte index)
    position: usize,
    /// Whether the previous token could end an operand
    after_operand: bool,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            after_operand: false,
            failed: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        Token {
            kind,
            span: Span::new(start, self.position),
        }
    }

    /// Reads a quoted string; the opening quote has been consumed already.
    /// A doubled quote inside the literal stands for a single one.
    fn read_string(&mut self, quote: char, start: usize) -> Result<Token<'a>, LexError> {
        let content_start = self.position;
        let mut escaped = false;
        loop {
            match self.bump() {
                None => return Err(LexError::UnterminatedString { offset: start }),
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        escaped = true;
                    } else {
                        break;
                    }
                }
                Some(_) => {}
            }
        }
        let raw = &self.input[content_start..self.position - quote.len_utf8()];
        let value = if escaped {
            let doubled: String = [quote, quote].iter().collect();
            Cow::Owned(raw.replace(&doubled, &quote.to_string()))
        } else {
            Cow::Borrowed(raw)
        };
        Ok(self.token(TokenKind::String(value), start))
    }

    /// Reads a number, date, time-of-day or datetime literal starting at `start`.
    /// `negative` means a leading `-` has already been consumed.
    fn read_numeric(&mut self, start: usize, negative: bool) -> Token<'a> {
        if !negative {
            let rest = &self.input[start..];
            if let Some(len) = match_datetime(rest) {
                self.position = start + len;
                return self.token(TokenKind::DateTimeOffset(&self.input[start..self.position]), start);
            }
            if let Some(len) = match_date(rest) {
                self.position = start + len;
                return self.token(TokenKind::Date(&self.input[start..self.position]), start);
            }
            if let Some(len) = match_time(rest) {
                self.position = start + len;
                return self.token(TokenKind::TimeOfDay(&self.input[start..self.position]), start);
            }
        }

        let mut is_decimal = false;
        self.eat_digits();
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_decimal = true;
            self.bump();
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let after = &self.input[self.position + 1..];
            let digits_at = usize::from(after.starts_with(['+', '-']));
            if after[digits_at..].starts_with(|c: char| c.is_ascii_digit()) {
                is_decimal = true;
                self.position += 1 + digits_at;
                self.eat_digits();
            }
        }

        let text = &self.input[start..self.position];
        let kind = if is_decimal {
            TokenKind::Decimal(text.parse().unwrap_or(f64::NAN))
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Integer(n),
                // too large for i64, keep it as a decimal
                Err(_) => TokenKind::Decimal(text.parse().unwrap_or(f64::NAN)),
            }
        };
        self.token(kind, start)
    }

    fn eat_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
    }

    /// Reads an identifier, keyword, or dotted qualified name.
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        self.eat_identifier_chars();
        let mut qualified = false;
        while self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_alphabetic() || c == '_') {
            qualified = true;
            self.bump();
            self.eat_identifier_chars();
        }
        let literal = &self.input[start..self.position];
        let kind = if qualified {
            TokenKind::QualifiedName(literal)
        } else {
            match_keyword(literal)
        };
        self.token(kind, start)
    }

    fn eat_identifier_chars(&mut self) {
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Option<Result<Token<'a>, LexError>> {
        self.skip_whitespace();
        let start = self.position;
        let c = self.bump()?;

        let token = match c {
            '(' => self.token(TokenKind::LParen, start),
            ')' => self.token(TokenKind::RParen, start),
            ',' => self.token(TokenKind::Comma, start),
            ':' => self.token(TokenKind::Colon, start),
            '+' => self.token(TokenKind::Add, start),
            '*' => self.token(TokenKind::Mul, start),
            '%' => self.token(TokenKind::Mod, start),
            '/' => {
                let spaced_before = self.input[..start].ends_with(char::is_whitespace);
                let spaced_after = self.peek().is_some_and(char::is_whitespace);
                if spaced_before && spaced_after {
                    self.token(TokenKind::Div, start)
                } else {
                    self.token(TokenKind::Slash, start)
                }
            }
            '-' => {
                if !self.after_operand && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.read_numeric(start, true)
                } else {
                    self.token(TokenKind::Sub, start)
                }
            }
            '\'' | '"' => match self.read_string(c, start) {
                Ok(token) => token,
                Err(e) => return Some(Err(e)),
            },
            c if c.is_ascii_hexdigit() && match_guid(&self.input[start..]).is_some() => {
                self.position = start + 36;
                self.token(TokenKind::Guid(&self.input[start..self.position]), start)
            }
            c if c.is_ascii_digit() => self.read_numeric(start, false),
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(start),
            other => {
                return Some(Err(LexError::UnexpectedCharacter {
                    ch: other,
                    offset: start,
                }))
            }
        };
        self.after_operand = token.kind.ends_operand();
        Some(Ok(token))
    }
}

fn match_keyword(s: &str) -> TokenKind<'_> {
    match s {
        "eq" => TokenKind::Eq,
        "ne" => TokenKind::Ne,
        "gt" => TokenKind::Gt,
        "ge" => TokenKind::Ge,
        "lt" => TokenKind::Lt,
        "le" => TokenKind::Le,
        "has" => TokenKind::Has,
        "in" => TokenKind::In,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "add" => TokenKind::Add,
        "sub" => TokenKind::Sub,
        "mul" => TokenKind::Mul,
        "div" => TokenKind::Div,
        "divby" => TokenKind::DivBy,
        "mod" => TokenKind::Mod,
        "true" => TokenKind::Boolean(true),
        "false" => TokenKind::Boolean(false),
        "null" => TokenKind::Null,
        _ => TokenKind::Identifier(s),
    }
}

fn digits_at(b: &[u8], at: usize, n: usize) -> bool {
    b.len() >= at + n && b[at..at + n].iter().all(u8::is_ascii_digit)
}

/// `YYYY-MM-DD` not followed by another identifier character.
fn match_date(s: &str) -> Option<usize> {
    match_date_prefix(s).filter(|&len| !s.as_bytes().get(len).is_some_and(|c| c.is_ascii_alphanumeric()))
}

/// `HH:MM[:SS[.fff]]`
fn match_time(s: &str) -> Option<usize> {
    let b = s.as_bytes();
    if !(digits_at(b, 0, 2) && b.get(2) == Some(&b':') && digits_at(b, 3, 2)) {
        return None;
    }
    let mut len = 5;
    if b.get(5) == Some(&b':') && digits_at(b, 6, 2) {
        len = 8;
        if b.get(8) == Some(&b'.') && digits_at(b, 9, 1) {
            len = 9;
            while b.get(len).is_some_and(u8::is_ascii_digit) {
                len += 1;
            }
        }
    }
    Some(len)
}

/// `YYYY-MM-DDTHH:MM[:SS[.fff]](Z|+HH:MM|-HH:MM)?`
fn match_datetime(s: &str) -> Option<usize> {
    let date = match_date_prefix(s)?;
    let b = s.as_bytes();
    if b.get(date) != Some(&b'T') {
        return None;
    }
    let mut len = date + 1 + match_time(&s[date + 1..])?;
    match b.get(len).copied() {
        Some(b'Z') => len += 1,
        Some(b'+' | b'-') if digits_at(b, len + 1, 2) && b.get(len + 3) == Some(&b':') && digits_at(b, len + 4, 2) => {
            len += 6
        }
        _ => {}
    }
    Some(len)
}

fn match_date_prefix(s: &str) -> Option<usize> {
    let b = s.as_bytes();
    let ok = digits_at(b, 0, 4) && b.get(4) == Some(&b'-') && digits_at(b, 5, 2) && b.get(7) == Some(&b'-') && digits_at(b, 8, 2);
    ok.then_some(10)
}

/// 8-4-4-4-12 hexadecimal groups.
fn match_guid(s: &str) -> Option<usize> {
    let b = s.as_bytes();
    let mut at = 0;
    for (i, group) in [8usize, 4, 4, 4, 12].iter().enumerate() {
        if b.len() < at + group || !b[at..at + group].iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        at += group;
        if i < 4 {
            if b.get(at) != Some(&b'-') {
                return None;
            }
            at += 1;
        }
    }
    (!b.get(at).is_some_and(|c| c.is_ascii_alphanumeric())).then_some(at)
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_token();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}
