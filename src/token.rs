//! The token definition for the query-option expression language.

use std::borrow::Cow;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Comparison operators
    Eq,  // eq
    Ne,  // ne
    Gt,  // gt
    Ge,  // ge
    Lt,  // lt
    Le,  // le
    Has, // has
    In,  // in

    // Logical operators
    And,
    Or,
    Not,

    // Arithmetic operators, keyword or symbolic form
    Add,   // add, +
    Sub,   // sub, -
    Mul,   // mul, *
    Div,   // div, " / "
    DivBy, // divby
    Mod,   // mod, %

    // Names
    Identifier(&'a str),
    /// Dotted name such as `Edm.String` or `geo.distance`
    QualifiedName(&'a str),

    // Literals
    /// Quote-delimited string with doubled quotes already collapsed
    String(Cow<'a, str>),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Null,
    Date(&'a str),           // 2024-01-31
    TimeOfDay(&'a str),      // 13:45:00.250
    DateTimeOffset(&'a str), // 2024-01-31T13:45:00Z
    Guid(&'a str),

    // Punctuation
    LParen, // (
    RParen, // )
    Comma,  // ,
    Colon,  // :
    Slash,  // path separator /

    Eof,
}

impl TokenKind<'_> {
    /// True for tokens that can end an operand; a following `-` is then
    /// subtraction rather than the sign of a number.
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Identifier(_)
                | TokenKind::QualifiedName(_)
                | TokenKind::String(_)
                | TokenKind::Integer(_)
                | TokenKind::Decimal(_)
                | TokenKind::Boolean(_)
                | TokenKind::Null
                | TokenKind::Date(_)
                | TokenKind::TimeOfDay(_)
                | TokenKind::DateTimeOffset(_)
                | TokenKind::Guid(_)
                | TokenKind::RParen
        )
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
