//! Parameter aliases: `@name=value` bindings supplied next to the query options
//! and substituted into `$filter`/`$orderby`/`$apply` text before parsing.

use std::collections::HashMap;

use crate::lexer::tokenize;
use crate::token::TokenKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AliasError {
    #[error("parameter alias name must not be empty")]
    EmptyName,
    #[error("parameter alias '@{0}' is referenced but not defined")]
    UndefinedAlias(String),
    #[error("parameter alias '@{name}' must be bound to a single literal, got '{value}'")]
    NotALiteral { name: String, value: String },
}

/// Collects every `@name=value` pair from the request parameters.
pub fn extract_aliases<'p, I>(params: I) -> Result<HashMap<String, String>, AliasError>
where
    I: IntoIterator<Item = (&'p str, &'p str)>,
{
    let mut aliases = HashMap::new();
    for (key, value) in params {
        let Some(name) = key.strip_prefix('@') else {
            continue;
        };
        if name.is_empty() {
            return Err(AliasError::EmptyName);
        }
        if !is_single_literal(value) {
            return Err(AliasError::NotALiteral {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        aliases.insert(name.to_string(), value.trim().to_string());
    }
    Ok(aliases)
}

fn is_single_literal(value: &str) -> bool {
    let Ok(tokens) = tokenize(value) else {
        return false;
    };
    matches!(
        tokens.as_slice(),
        [literal, eof] if eof.kind == TokenKind::Eof && matches!(
            literal.kind,
            TokenKind::String(_)
                | TokenKind::Integer(_)
                | TokenKind::Decimal(_)
                | TokenKind::Boolean(_)
                | TokenKind::Null
                | TokenKind::Date(_)
                | TokenKind::TimeOfDay(_)
                | TokenKind::DateTimeOffset(_)
                | TokenKind::Guid(_)
        )
    )
}

/// Replaces every `@name` outside quoted string literals with its bound literal.
///
/// Quote state is tracked character by character; a doubled quote inside a
/// literal closes and immediately reopens it, so the state stays correct
/// without special casing.
pub fn resolve_aliases_in_string(expr: &str, aliases: &HashMap<String, String>) -> Result<String, AliasError> {
    if !expr.contains('@') {
        return Ok(expr.to_string());
    }

    let mut out = String::with_capacity(expr.len());
    let mut quote: Option<char> = None;
    let mut chars = expr.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '@' => {
                let name_start = at + 1;
                let mut name_end = name_start;
                while let Some(&(i, n)) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        name_end = i + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &expr[name_start..name_end];
                if name.is_empty() {
                    out.push('@');
                    continue;
                }
                let value = aliases
                    .get(name)
                    .ok_or_else(|| AliasError::UndefinedAlias(name.to_string()))?;
                out.push_str(value);
            }
            None => out.push(c),
        }
    }
    Ok(out)
}
