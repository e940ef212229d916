//! Parameterized SQL text.
//!
//! Raw SQL only ever comes from `&'static str` syntax or from a
//! [`SqlIdentifier`], which is quoted on the way in. Every literal goes
//! through [`SqlBuilder::append_param`] and ends up in the argument list.
//! Fragments use `?` internally; dialect placeholders are assigned once,
//! when the finished statement is rendered.

use std::fmt;

use sea_query::Value;

use crate::dialect::Dialect;

/// Pseudo-column holding the implicit group count.
pub const COUNT_ALIAS: &str = "$count";

/// A name that may be spliced into SQL text after quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlIdentifier(String);

impl SqlIdentifier {
    /// Names taken from schema descriptors or derived by the compiler.
    pub(crate) fn trusted(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Names supplied by a request (computed aliases, unknown `$orderby`
    /// items). Only `[A-Za-z0-9_]+` and `$count` pass.
    pub fn sanitized(name: &str) -> Option<Self> {
        let valid = name == COUNT_ALIAS
            || (!name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
        valid.then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self, dialect: Dialect) -> String {
        dialect.quote_identifier(&self.0)
    }
}

impl fmt::Display for SqlIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SQL text with `?` markers and the values bound to them, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    sql: String,
    args: Vec<Value>,
}

impl SqlFragment {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }

    /// Replaces the `?` markers with the dialect's numbered placeholders.
    pub fn render(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut index = 0;
        let sql = dialect.rewrite_placeholders(&self.sql, |out| {
            index += 1;
            out.push_str(&dialect.placeholder(index));
        });
        (sql, self.args.clone())
    }

    /// SQL with every argument inlined. For logs only.
    pub fn inline(&self, dialect: Dialect) -> String {
        let formatter = dialect.value_formatter();
        let mut args = self.args.iter();
        dialect.rewrite_placeholders(&self.sql, |out| match args.next() {
            Some(value) => out.push_str(&formatter.value_to_string(value)),
            None => out.push('?'),
        })
    }
}

/// Appends SQL text while keeping identifiers quoted and values bound.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    args: Vec<Value>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            args: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn append_syntax(&mut self, sql: &'static str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn append_identifier(&mut self, identifier: &SqlIdentifier) -> &mut Self {
        self.sql.push_str(&identifier.quoted(self.dialect));
        self
    }

    /// `"table"."column"`
    pub fn append_column(&mut self, table: &SqlIdentifier, column: &SqlIdentifier) -> &mut Self {
        self.append_identifier(table).append_syntax(".").append_identifier(column)
    }

    pub fn append_param(&mut self, value: impl Into<Value>) -> &mut Self {
        self.sql.push('?');
        self.args.push(value.into());
        self
    }

    /// A non-negative count rendered as a bound integer.
    pub fn append_count(&mut self, count: u64) -> &mut Self {
        self.append_param(Value::BigUnsigned(Some(count)))
    }

    pub fn append_fragment(&mut self, fragment: &SqlFragment) -> &mut Self {
        self.sql.push_str(&fragment.sql);
        self.args.extend(fragment.args.iter().cloned());
        self
    }

    /// Appends `items` separated by `separator`.
    pub fn append_joined<'f, I>(&mut self, items: I, separator: &'static str) -> &mut Self
    where
        I: IntoIterator<Item = &'f SqlFragment>,
    {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.append_syntax(separator);
            }
            self.append_fragment(item);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn finish(self) -> SqlFragment {
        SqlFragment {
            sql: self.sql,
            args: self.args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitizer_allow_list() {
        assert!(SqlIdentifier::sanitized("Total_2").is_some());
        assert!(SqlIdentifier::sanitized("$count").is_some());
        assert!(SqlIdentifier::sanitized("").is_none());
        assert!(SqlIdentifier::sanitized("a b").is_none());
        assert!(SqlIdentifier::sanitized("x;DROP TABLE t").is_none());
        assert!(SqlIdentifier::sanitized("x'--").is_none());
        assert!(SqlIdentifier::sanitized("$it").is_none());
    }

    #[test]
    fn test_builder_binds_values() {
        let mut builder = SqlBuilder::new(Dialect::Postgres);
        builder
            .append_column(&SqlIdentifier::trusted("products"), &SqlIdentifier::trusted("name"))
            .append_syntax(" = ")
            .append_param("O'Brien")
            .append_syntax(" AND ")
            .append_column(&SqlIdentifier::trusted("products"), &SqlIdentifier::trusted("price"))
            .append_syntax(" > ")
            .append_param(10i64);
        let fragment = builder.finish();
        assert_eq!(fragment.sql(), r#""products"."name" = ? AND "products"."price" > ?"#);
        assert!(!fragment.sql().contains("O'Brien"));

        let (sql, args) = fragment.render(Dialect::Postgres);
        assert_eq!(sql, r#""products"."name" = $1 AND "products"."price" > $2"#);
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_render_sql_server_and_mysql() {
        let mut builder = SqlBuilder::new(Dialect::SqlServer);
        builder.append_identifier(&SqlIdentifier::trusted("x")).append_syntax(" IN (").append_param(1i64);
        builder.append_syntax(", ").append_param(2i64).append_syntax(")");
        let fragment = builder.finish();
        assert_eq!(fragment.render(Dialect::SqlServer).0, "[x] IN (@P1, @P2)");
        assert_eq!(fragment.render(Dialect::MySql).0, "[x] IN (?, ?)");
    }

    #[test]
    fn test_inline_for_logs() {
        let mut builder = SqlBuilder::new(Dialect::Sqlite);
        builder
            .append_identifier(&SqlIdentifier::trusted("name"))
            .append_syntax(" = ")
            .append_param("abc")
            .append_syntax(" AND ")
            .append_identifier(&SqlIdentifier::trusted("n"))
            .append_syntax(" > ")
            .append_param(5i64);
        assert_eq!(builder.finish().inline(Dialect::Sqlite), r#""name" = 'abc' AND "n" > 5"#);
    }

    #[test]
    fn test_fragments_concatenate_args_in_order() {
        let mut left = SqlBuilder::new(Dialect::Sqlite);
        left.append_param(1i64);
        let mut right = SqlBuilder::new(Dialect::Sqlite);
        right.append_param(2i64);
        let (left, right) = (left.finish(), right.finish());

        let mut both = SqlBuilder::new(Dialect::Sqlite);
        both.append_joined([&left, &right], " AND ");
        let both = both.finish();
        assert_eq!(both.sql(), "? AND ?");
        assert_eq!(both.args(), &[Value::from(1i64), Value::from(2i64)]);
    }
}
