//! Parser for query-option expressions.
//!
//! ## Expression grammar
//!
//! ```text
//! expr        := or_expr
//! or_expr     := and_expr ("or" and_expr)*
//! and_expr    := not_expr ("and" not_expr)*
//! not_expr    := "not" not_expr | comparison
//! comparison  := additive (compop additive | "in" "(" expr ("," expr)* ")")?
//! additive    := multiplicative (("add" | "sub") multiplicative)*
//! multiplicative := unary (("mul" | "div" | "divby" | "mod") unary)*
//! unary       := "-" unary | primary
//! primary     := literal
//!              | "(" expr ")"
//!              | name "(" args? ")"                      -- function call
//!              | segment ("/" segment)* ("/" lambda)?    -- property path
//! lambda      := ("any" | "all") "(" (var ":" expr)? ")"
//! ```
//!
//! `any` and `all` are only keywords right after a `/` and before a `(`;
//! anywhere else they are ordinary identifiers.
//!
//! ## Option grammars
//!
//! ```text
//! $orderby := item ("," item)*            item := expr ("asc" | "desc")?
//! $select  := name ("," name)*
//! $apply   := transformation ("/" transformation)*
//!   transformation := "groupby" "(" "(" path ("," path)* ")" ("," $apply)? ")"
//!                   | "aggregate" "(" agg ("," agg)* ")"
//!                   | "filter" "(" expr ")"
//!                   | "compute" "(" expr "as" alias ("," expr "as" alias)* ")"
//!   agg := expr "with" method "as" alias | "$count" "as" alias
//! $expand  := nav ("(" option (";" option)* ")")? ("," ...)*
//! ```

use crate::ast::{
    AggregateExpr, AggregateMethod, ArithOp, CompOp, ComputeExpr, ExpandItem, ExpandOptions, Expr, Lambda, Literal,
    LogicalOp, OrderByItem, PropertyPath, Quantifier, SortDirection, Transformation,
};
use crate::error::QueryError;
use crate::lexer::tokenize;
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self {
            message,
            span: Some(span),
        }
    }
}

static EOF: TokenKind<'static> = TokenKind::Eof;

pub struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token<'a>],
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, tokens: &'a [Token<'a>]) -> Self {
        Self {
            source,
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    fn peek_kind(&self) -> &'a TokenKind<'a> {
        self.peek().map(|t| &t.kind).unwrap_or(&EOF)
    }

    fn peek_nth_kind(&self, n: usize) -> &'a TokenKind<'a> {
        self.tokens.get(self.position + n).map(|t| &t.kind).unwrap_or(&EOF)
    }

    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    fn match_token(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn current_span(&self) -> Span {
        self.peek().map(|t| t.span).unwrap_or(Span::new(self.source.len(), self.source.len()))
    }

    /// Source text of a token, for error messages.
    fn describe(&self, token: &Token<'_>) -> String {
        if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("'{}'", &self.source[token.span.start..token.span.end])
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let found = self.peek().map(|t| self.describe(t)).unwrap_or_else(|| "end of input".to_string());
        ParseError::at_position(format!("{}, found {}", message.into(), found), self.current_span())
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<&'a Token<'a>, ParseError> {
        if self.match_token(&expected) {
            self.advance().ok_or_else(|| ParseError::new(format!("expected {what}"), None))
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<&'a str, ParseError> {
        match self.peek_kind() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(*name)
            }
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    /// Consumes the contextual keyword `word` if it is next.
    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek_kind(), TokenKind::Identifier(name) if *name == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_end(&mut self) -> Result<(), ParseError> {
        if self.match_token(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error_here("unexpected trailing input"))
        }
    }

    /// Parses one complete expression and requires the input to end.
    pub fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression()?;
        self.expect_end()?;
        Ok(expr)
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expression()?;
        while self.match_token(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not_expression()?;
        while self.match_token(&TokenKind::And) {
            self.advance();
            let right = self.parse_not_expression()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> Result<Expr, ParseError> {
        if self.match_token(&TokenKind::Not) {
            self.advance();
            let expr = self.parse_not_expression()?;
            Ok(Expr::Not(Box::new(expr)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.peek_kind() {
            TokenKind::Eq => CompOp::Eq,
            TokenKind::Ne => CompOp::Ne,
            TokenKind::Gt => CompOp::Gt,
            TokenKind::Ge => CompOp::Ge,
            TokenKind::Lt => CompOp::Lt,
            TokenKind::Le => CompOp::Le,
            TokenKind::Has => CompOp::Has,
            TokenKind::In => {
                self.advance();
                let values = self.parse_in_list()?;
                return Ok(Expr::In {
                    operand: Box::new(left),
                    values,
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_in_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::LParen, "'(' after 'in'")?;
        let mut values = Vec::new();
        loop {
            values.push(self.parse_additive()?);
            if self.match_token(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' closing the 'in' list")?;
        Ok(values)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Add => ArithOp::Add,
                TokenKind::Sub => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Mul => ArithOp::Mul,
                TokenKind::Div => ArithOp::Div,
                TokenKind::DivBy => ArithOp::DivBy,
                TokenKind::Mod => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.match_token(&TokenKind::Sub) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::new("unexpected end of input".to_string(), None));
        };
        let literal = match &token.kind {
            TokenKind::String(s) => Some(Literal::String(s.to_string())),
            TokenKind::Integer(n) => Some(Literal::Integer(*n)),
            TokenKind::Decimal(n) => Some(Literal::Decimal(*n)),
            TokenKind::Boolean(b) => Some(Literal::Boolean(*b)),
            TokenKind::Null => Some(Literal::Null),
            TokenKind::Date(d) => Some(Literal::Date(d.to_string())),
            TokenKind::TimeOfDay(t) => Some(Literal::TimeOfDay(t.to_string())),
            TokenKind::DateTimeOffset(t) => Some(Literal::DateTimeOffset(t.to_string())),
            TokenKind::Guid(g) => Some(Literal::Guid(g.to_string())),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Expr::Literal(literal));
        }

        match &token.kind {
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                if !self.match_token(&TokenKind::RParen) {
                    return Err(ParseError::at_position(
                        format!("unbalanced parentheses: '(' at byte {} is never closed", token.span.start),
                        token.span,
                    ));
                }
                self.advance();
                Ok(expr)
            }
            TokenKind::QualifiedName(name) => {
                self.advance();
                if self.match_token(&TokenKind::LParen) {
                    let args = self.parse_arguments(name)?;
                    Ok(Expr::Function {
                        name: name.to_string(),
                        args,
                    })
                } else {
                    Ok(Expr::TypeName(name.to_string()))
                }
            }
            TokenKind::Identifier(name) => {
                if matches!(self.peek_nth_kind(1), TokenKind::LParen) {
                    self.advance();
                    let args = self.parse_arguments(name)?;
                    return Ok(Expr::Function {
                        name: name.to_string(),
                        args,
                    });
                }
                self.parse_path()
            }
            _ => Err(self.error_here("expected an expression")),
        }
    }

    fn parse_arguments(&mut self, function: &str) -> Result<Vec<Expr>, ParseError> {
        let open = self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.match_token(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if self.match_token(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if !self.match_token(&TokenKind::RParen) {
            return Err(ParseError::at_position(
                format!("unbalanced parentheses in call to '{function}'"),
                Span::new(open.span.start, self.current_span().end),
            ));
        }
        self.advance();
        Ok(args)
    }

    /// Property path, possibly ending in an `any`/`all` lambda.
    fn parse_path(&mut self) -> Result<Expr, ParseError> {
        let first = self.expect_identifier("a property name")?;
        let mut segments = vec![first.to_string()];
        while self.match_token(&TokenKind::Slash) {
            self.advance();
            let segment = self.expect_identifier("a property name after '/'")?;
            let quantifier = match segment {
                "any" => Some(Quantifier::Any),
                "all" => Some(Quantifier::All),
                _ => None,
            };
            if let Some(quantifier) = quantifier {
                if self.match_token(&TokenKind::LParen) {
                    let collection = PropertyPath { segments };
                    return self.parse_lambda(collection, quantifier).map(Expr::Lambda);
                }
            }
            segments.push(segment.to_string());
        }
        Ok(Expr::Path(PropertyPath { segments }))
    }

    fn parse_lambda(&mut self, collection: PropertyPath, quantifier: Quantifier) -> Result<Lambda, ParseError> {
        let open = self.expect(TokenKind::LParen, "'('")?;
        let keyword = match quantifier {
            Quantifier::Any => "any",
            Quantifier::All => "all",
        };

        if self.match_token(&TokenKind::RParen) {
            self.advance();
            if quantifier == Quantifier::All {
                return Err(ParseError::at_position(
                    format!("'{collection}/all()' requires a lambda predicate"),
                    open.span,
                ));
            }
            return Ok(Lambda {
                collection,
                quantifier,
                variable: None,
                predicate: None,
            });
        }

        let variable = self.expect_identifier(&format!("a lambda variable in '{collection}/{keyword}(...)'"))?;
        if !self.match_token(&TokenKind::Colon) {
            return Err(self.error_here(format!("missing ':' after lambda variable '{variable}' in '{collection}/{keyword}'")));
        }
        self.advance();
        if self.match_token(&TokenKind::RParen) {
            return Err(ParseError::at_position(
                format!("empty lambda predicate in '{collection}/{keyword}({variable}:)'"),
                self.current_span(),
            ));
        }
        let predicate = self.parse_expression()?;
        if !self.match_token(&TokenKind::RParen) {
            return Err(ParseError::at_position(
                format!("unbalanced parentheses in '{collection}/{keyword}(...)'"),
                Span::new(open.span.start, self.current_span().end),
            ));
        }
        self.advance();
        Ok(Lambda {
            collection,
            quantifier,
            variable: Some(variable.to_string()),
            predicate: Some(Box::new(predicate)),
        })
    }
}

/// Lexes and parses a `$filter` expression.
pub fn parse_filter(text: &str) -> Result<Expr, QueryError> {
    let tokens = tokenize(text)?;
    let expr = Parser::new(text, &tokens).parse()?;
    Ok(expr)
}

/// Splits `text` on `separator` at parenthesis depth zero, outside quotes.
fn split_top_level(text: &str, separator: char) -> Result<Vec<&str>, ParseError> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ParseError::at_position(
                            format!("unbalanced parentheses in '{text}'"),
                            Span::new(i, i + 1),
                        ));
                    }
                }
                c if c == separator && depth == 0 => {
                    parts.push(&text[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    if depth != 0 {
        return Err(ParseError::new(format!("unbalanced parentheses in '{text}'"), None));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// Splits `name(args)` into its name and argument text.
fn split_call(text: &str) -> Result<(&str, &str), ParseError> {
    let text = text.trim();
    match (text.find('('), text.ends_with(')')) {
        (Some(open), true) => Ok((text[..open].trim(), &text[open + 1..text.len() - 1])),
        _ => Err(ParseError::new(format!("expected 'name(...)', found '{text}'"), None)),
    }
}

fn split_direction(item: &str) -> (&str, SortDirection) {
    let item = item.trim();
    if let Some((head, tail)) = item.rsplit_once(char::is_whitespace) {
        match tail {
            "desc" => return (head.trim_end(), SortDirection::Desc),
            "asc" => return (head.trim_end(), SortDirection::Asc),
            _ => {}
        }
    }
    (item, SortDirection::Asc)
}

/// Parses `$orderby`. Items that do not parse are kept as raw text so the
/// compiler can decide whether they name a computed column.
pub fn parse_orderby(text: &str) -> Vec<OrderByItem> {
    let Ok(items) = split_top_level(text, ',') else {
        return vec![OrderByItem::Unparsed {
            raw: text.trim().to_string(),
            direction: SortDirection::Asc,
        }];
    };
    items
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .map(|item| {
            let (body, direction) = split_direction(item);
            match parse_filter(body) {
                Ok(expr) => OrderByItem::Expr { expr, direction },
                Err(_) => OrderByItem::Unparsed {
                    raw: body.to_string(),
                    direction,
                },
            }
        })
        .collect()
}

/// Parses `$select` into trimmed, non-empty names.
pub fn parse_select(text: &str) -> Vec<String> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Parses an `$apply` pipeline.
pub fn parse_apply(text: &str) -> Result<Vec<Transformation>, QueryError> {
    split_top_level(text, '/')?
        .into_iter()
        .filter(|step| !step.trim().is_empty())
        .map(parse_transformation)
        .collect()
}

fn parse_transformation(text: &str) -> Result<Transformation, QueryError> {
    let (name, args) = split_call(text)?;
    match name {
        "filter" => Ok(Transformation::Filter(parse_filter(args)?)),
        "aggregate" => {
            let items = split_top_level(args, ',')?
                .into_iter()
                .map(parse_aggregate_item)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Transformation::Aggregate(items))
        }
        "compute" => {
            let items = split_top_level(args, ',')?
                .into_iter()
                .map(parse_compute_item)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Transformation::Compute(items))
        }
        "groupby" => parse_groupby(args),
        other => Err(ParseError::new(format!("unknown transformation '{other}' in '{}'", text.trim()), None).into()),
    }
}

fn parse_groupby(args: &str) -> Result<Transformation, QueryError> {
    let args = args.trim();
    let parts = split_top_level(args, ',')?;
    let group_list = parts.first().map(|s| s.trim()).unwrap_or_default();
    let inner = group_list
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ParseError::new(format!("groupby expects a parenthesized property list, found '{group_list}'"), None))?;

    let mut properties = Vec::new();
    for item in split_top_level(inner, ',')? {
        let tokens = tokenize(item)?;
        let mut parser = Parser::new(item, &tokens);
        match parser.parse_expression()? {
            Expr::Path(path) => properties.push(path),
            _ => {
                return Err(ParseError::new(format!("groupby expects property paths, found '{}'", item.trim()), None).into())
            }
        }
        parser.expect_end()?;
    }
    if properties.is_empty() {
        return Err(ParseError::new("groupby requires at least one property".to_string(), None).into());
    }

    let nested = match args.find(group_list).map(|at| at + group_list.len()) {
        Some(end) if parts.len() > 1 => {
            let rest = args[end..].trim_start().trim_start_matches(',');
            parse_apply(rest)?
        }
        _ => Vec::new(),
    };
    Ok(Transformation::GroupBy { properties, nested })
}

fn parse_aggregate_item(text: &str) -> Result<AggregateExpr, QueryError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser::new(text, &tokens);

    let source = if matches!(parser.peek_kind(), TokenKind::Identifier("$count"))
        && matches!(parser.peek_nth_kind(1), TokenKind::Identifier("as"))
    {
        parser.advance();
        None
    } else {
        Some(parser.parse_expression()?)
    };

    let method = match source {
        None => AggregateMethod::Count,
        Some(_) => {
            if !parser.eat_word("with") {
                return Err(parser.error_here(format!("expected 'with <method>' in aggregate '{}'", text.trim())).into());
            }
            let name = parser.expect_identifier("an aggregation method")?;
            AggregateMethod::from_name(name)
                .ok_or_else(|| ParseError::new(format!("unknown aggregation method '{name}'"), None))?
        }
    };

    if !parser.eat_word("as") {
        return Err(parser.error_here(format!("expected 'as <alias>' in aggregate '{}'", text.trim())).into());
    }
    let alias = parser.expect_identifier("an alias")?.to_string();
    parser.expect_end()?;
    Ok(AggregateExpr { source, method, alias })
}

fn parse_compute_item(text: &str) -> Result<ComputeExpr, QueryError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser::new(text, &tokens);
    let expr = parser.parse_expression()?;
    if !parser.eat_word("as") {
        return Err(parser.error_here(format!("expected 'as <alias>' in compute '{}'", text.trim())).into());
    }
    let alias = parser.expect_identifier("an alias")?.to_string();
    parser.expect_end()?;
    Ok(ComputeExpr { expr, alias })
}

/// Parses `$expand` with its nested options.
pub fn parse_expand(text: &str) -> Result<Vec<ExpandItem>, QueryError> {
    let mut items = Vec::new();
    for item in split_top_level(text, ',')? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (navigation, options_text) = match item.find('(') {
            Some(_) => split_call(item)?,
            None => (item, ""),
        };
        let mut options = ExpandOptions::default();
        for option in split_top_level(options_text, ';')? {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| ParseError::new(format!("malformed expand option '{option}'"), None))?;
            match key.trim() {
                "$select" => options.select = parse_select(value),
                "$filter" => options.filter = Some(parse_filter(value)?),
                "$orderby" => options.orderby = parse_orderby(value),
                "$top" => options.top = Some(parse_count_option("$top", value)?),
                "$skip" => options.skip = Some(parse_count_option("$skip", value)?),
                other => {
                    return Err(ParseError::new(format!("unsupported expand option '{other}' in '{item}'"), None).into())
                }
            }
        }
        items.push(ExpandItem {
            navigation: navigation.to_string(),
            options,
        });
    }
    Ok(items)
}

/// Parses a `$top`/`$skip` value.
pub fn parse_count_option(name: &str, value: &str) -> Result<u64, ParseError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ParseError::new(format!("{name} must be a non-negative integer, found '{}'", value.trim()), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        parse_filter(input).unwrap()
    }

    fn parse_err(input: &str) -> String {
        match parse_filter(input) {
            Err(QueryError::Parse(e)) => e.message,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    fn path(segments: &[&str]) -> Expr {
        Expr::Path(PropertyPath::new(segments.iter().copied()))
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            parse("Name eq 'John'"),
            Expr::Comparison {
                op: CompOp::Eq,
                left: Box::new(path(&["Name"])),
                right: Box::new(Expr::Literal(Literal::String("John".to_string()))),
            }
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("A eq 1 or B eq 2 and C eq 3");
        let Expr::Logical { op: LogicalOp::Or, right, .. } = expr else {
            panic!("expected OR at the root");
        };
        assert!(matches!(*right, Expr::Logical { op: LogicalOp::And, .. }));
    }

    #[test]
    fn test_not_binds_tighter_than_and() {
        let expr = parse("not A eq 1 and B eq 2");
        let Expr::Logical { op: LogicalOp::And, left, .. } = expr else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*left, Expr::Not(_)));
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = parse("Price add Tax mul 2 gt 10");
        let Expr::Comparison { left, .. } = expr else {
            panic!("expected comparison");
        };
        let Expr::Arithmetic { op: ArithOp::Add, right, .. } = *left else {
            panic!("expected add");
        };
        assert!(matches!(*right, Expr::Arithmetic { op: ArithOp::Mul, .. }));
    }

    #[test]
    fn test_function_call_and_nested_paths() {
        assert_eq!(
            parse("tolower(Customer/Name) eq 'john'"),
            Expr::Comparison {
                op: CompOp::Eq,
                left: Box::new(Expr::Function {
                    name: "tolower".to_string(),
                    args: vec![path(&["Customer", "Name"])],
                }),
                right: Box::new(Expr::Literal(Literal::String("john".to_string()))),
            }
        );
    }

    #[test]
    fn test_cast_with_type_name() {
        let expr = parse("cast(Price, Edm.Int32) eq 3");
        let Expr::Comparison { left, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(
            *left,
            Expr::Function {
                name: "cast".to_string(),
                args: vec![path(&["Price"]), Expr::TypeName("Edm.Int32".to_string())],
            }
        );
    }

    #[test]
    fn test_lambda_with_predicate() {
        let expr = parse("Descriptions/any(d: d/LanguageKey eq 'EN')");
        let Expr::Lambda(lambda) = expr else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.collection, PropertyPath::new(["Descriptions"]));
        assert_eq!(lambda.quantifier, Quantifier::Any);
        assert_eq!(lambda.variable.as_deref(), Some("d"));
        assert!(lambda.predicate.is_some());
    }

    #[test]
    fn test_parameterless_any() {
        let expr = parse("Descriptions/any()");
        assert_eq!(
            expr,
            Expr::Lambda(Lambda {
                collection: PropertyPath::new(["Descriptions"]),
                quantifier: Quantifier::Any,
                variable: None,
                predicate: None,
            })
        );
    }

    #[test]
    fn test_nested_lambda() {
        let expr = parse("Orders/all(o: o/Items/any(i: i/Quantity gt 1))");
        let Expr::Lambda(outer) = expr else {
            panic!("expected lambda");
        };
        assert_eq!(outer.quantifier, Quantifier::All);
        assert!(matches!(outer.predicate.as_deref(), Some(Expr::Lambda(inner)) if inner.collection == PropertyPath::new(["o", "Items"])));
    }

    #[test]
    fn test_any_is_contextual_keyword() {
        assert_eq!(
            parse("any eq true"),
            Expr::Comparison {
                op: CompOp::Eq,
                left: Box::new(path(&["any"])),
                right: Box::new(Expr::Literal(Literal::Boolean(true))),
            }
        );
        assert_eq!(parse("Flags/any"), path(&["Flags", "any"]));
    }

    #[test]
    fn test_lambda_errors() {
        assert!(parse_err("Descriptions/any(d d/LanguageKey eq 'EN')").contains("missing ':'"));
        assert!(parse_err("Descriptions/any(d:)").contains("empty lambda predicate"));
        assert!(parse_err("Descriptions/any(d: d/Key eq 'EN'").contains("unbalanced parentheses"));
        assert!(parse_err("Descriptions/all()").contains("requires a lambda predicate"));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        assert!(parse_err("(Name eq 'a'").contains("unbalanced parentheses"));
        assert!(parse_err("Name eq 'a')").contains("unexpected trailing input"));
    }

    #[test]
    fn test_in_list() {
        let expr = parse("Name in ('a', 'b')");
        let Expr::In { values, .. } = expr else {
            panic!("expected in");
        };
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_lex_error_propagates() {
        assert!(matches!(parse_filter("Name eq 'abc"), Err(QueryError::Lex(_))));
    }

    #[test]
    fn test_parse_orderby() {
        let items = parse_orderby("Name desc, Customer/Name, Bad;Name asc");
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            OrderByItem::Expr {
                expr: path(&["Name"]),
                direction: SortDirection::Desc
            }
        );
        assert_eq!(
            items[1],
            OrderByItem::Expr {
                expr: path(&["Customer", "Name"]),
                direction: SortDirection::Asc
            }
        );
        assert_eq!(
            items[2],
            OrderByItem::Unparsed {
                raw: "Bad;Name".to_string(),
                direction: SortDirection::Asc
            }
        );
    }

    #[test]
    fn test_parse_apply_pipeline() {
        let steps = parse_apply("groupby((Category, Customer/Name), aggregate(Price with sum as Total))/filter(Total gt 100)").unwrap();
        assert_eq!(steps.len(), 2);
        let Transformation::GroupBy { properties, nested } = &steps[0] else {
            panic!("expected groupby");
        };
        assert_eq!(properties, &vec![PropertyPath::new(["Category"]), PropertyPath::new(["Customer", "Name"])]);
        assert_eq!(
            nested,
            &vec![Transformation::Aggregate(vec![AggregateExpr {
                source: Some(path(&["Price"])),
                method: AggregateMethod::Sum,
                alias: "Total".to_string(),
            }])]
        );
        assert!(matches!(steps[1], Transformation::Filter(_)));
    }

    #[test]
    fn test_parse_aggregate_count_and_compute() {
        let steps = parse_apply("compute(Price mul 2 as Double)/aggregate($count as Cnt, Price with countdistinct as Prices)").unwrap();
        assert_eq!(
            steps[0],
            Transformation::Compute(vec![ComputeExpr {
                expr: Expr::Arithmetic {
                    op: ArithOp::Mul,
                    left: Box::new(path(&["Price"])),
                    right: Box::new(Expr::Literal(Literal::Integer(2))),
                },
                alias: "Double".to_string(),
            }])
        );
        let Transformation::Aggregate(items) = &steps[1] else {
            panic!("expected aggregate");
        };
        assert_eq!(items[0].source, None);
        assert_eq!(items[0].method, AggregateMethod::Count);
        assert_eq!(items[1].method, AggregateMethod::CountDistinct);
    }

    #[test]
    fn test_groupby_without_nested() {
        let steps = parse_apply("groupby((Category))").unwrap();
        assert_eq!(
            steps,
            vec![Transformation::GroupBy {
                properties: vec![PropertyPath::new(["Category"])],
                nested: vec![],
            }]
        );
    }

    #[test]
    fn test_unknown_transformation() {
        let err = parse_apply("pivot(Name)").unwrap_err();
        assert!(err.to_string().contains("unknown transformation 'pivot'"));
    }

    #[test]
    fn test_aggregate_requires_method() {
        assert!(parse_apply("aggregate(Price as Total)").is_err());
        assert!(parse_apply("aggregate(Price with median as Total)").is_err());
    }

    #[test]
    fn test_parse_expand() {
        let items = parse_expand("Category,Descriptions($filter=LanguageKey eq 'EN';$top=2;$select=Text)").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].navigation, "Category");
        assert_eq!(items[0].options, ExpandOptions::default());
        assert_eq!(items[1].navigation, "Descriptions");
        assert_eq!(items[1].options.top, Some(2));
        assert_eq!(items[1].options.select, vec!["Text".to_string()]);
        assert!(items[1].options.filter.is_some());
    }

    #[test]
    fn test_parse_expand_rejects_unknown_option() {
        assert!(parse_expand("Descriptions($count=true)").is_err());
    }
}
