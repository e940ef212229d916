//! Error taxonomy shared by every compilation stage.

use crate::alias::AliasError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::resolver::ResolveError;
use crate::sql_compiler::CompileError;

/// Any failure that aborts compilation of a request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("alias error: {0}")]
    Alias(#[from] AliasError),
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
}
