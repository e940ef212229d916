//! Target database dialects and their syntax differences.

use std::fmt;
use std::str::FromStr;

use sea_query::{MysqlQueryBuilder, PostgresQueryBuilder, QueryBuilder, SqliteQueryBuilder};
use serde::{Deserialize, Serialize};

use crate::ast::SortDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    MySql,
    SqlServer,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Dialect::Sqlite, Dialect::Postgres, Dialect::MySql, Dialect::SqlServer];

    /// Quotes an identifier, doubling any embedded closing quote.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${index}"),
            Dialect::SqlServer => format!("@P{index}"),
        }
    }

    /// Escape clause appended to every generated LIKE.
    pub fn like_escape_clause(self) -> &'static str {
        match self {
            // backslash is an escape character inside MySQL string literals
            Dialect::MySql => " ESCAPE '\\\\'",
            Dialect::Sqlite | Dialect::Postgres | Dialect::SqlServer => " ESCAPE '\\'",
        }
    }

    /// Escapes LIKE wildcards in a literal so it only matches itself.
    pub fn escape_like(self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 8);
        for c in value.chars() {
            match c {
                '\\' | '%' | '_' => {
                    out.push('\\');
                    out.push(c);
                }
                '[' if self == Dialect::SqlServer => out.push_str("\\["),
                _ => out.push(c),
            }
        }
        out
    }

    pub fn boolean_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Dialect::Postgres, true) => "TRUE",
            (Dialect::Postgres, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    /// Whether HAVING may refer to a SELECT-list alias.
    pub fn supports_alias_in_having(self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    /// Whether GROUP BY may refer to a SELECT-list alias.
    pub fn supports_alias_in_group_by(self) -> bool {
        !matches!(self, Dialect::SqlServer)
    }

    /// Null-ordering keywords that make nulls sort lowest, or `None` when
    /// the dialect already does so.
    pub fn null_ordering(self, direction: SortDirection) -> Option<&'static str> {
        match (self, direction) {
            (Dialect::Postgres, SortDirection::Asc) => Some(" NULLS FIRST"),
            (Dialect::Postgres, SortDirection::Desc) => Some(" NULLS LAST"),
            _ => None,
        }
    }

    /// Query builder used to format values when inlining them for logs.
    pub fn value_formatter(self) -> &'static dyn QueryBuilder {
        match self {
            Dialect::Sqlite => &SqliteQueryBuilder,
            Dialect::Postgres | Dialect::SqlServer => &PostgresQueryBuilder,
            Dialect::MySql => &MysqlQueryBuilder,
        }
    }

    fn quote_chars(self) -> (char, char) {
        match self {
            Dialect::Sqlite | Dialect::Postgres => ('"', '"'),
            Dialect::MySql => ('`', '`'),
            Dialect::SqlServer => ('[', ']'),
        }
    }

    /// Calls `on_placeholder` for every `?` outside quoted identifiers and
    /// string literals, copying all other text to `out`.
    pub(crate) fn rewrite_placeholders(self, sql: &str, mut on_placeholder: impl FnMut(&mut String)) -> String {
        let (open, close) = self.quote_chars();
        let mut out = String::with_capacity(sql.len() + 16);
        let mut chars = sql.chars().peekable();
        let mut in_identifier = false;
        let mut in_string = false;
        while let Some(c) = chars.next() {
            out.push(c);
            if in_identifier {
                if c == close {
                    if chars.peek() == Some(&close) {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else {
                        in_identifier = false;
                    }
                }
            } else if in_string {
                if c == '\'' {
                    in_string = false;
                }
            } else if c == open {
                in_identifier = true;
            } else if c == '\'' {
                in_string = true;
            } else if c == '?' {
                out.pop();
                on_placeholder(&mut out);
            }
        }
        out
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "sqlserver",
        };
        f.write_str(name)
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "generic" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            other => Err(format!("unknown dialect '{other}'")),
        }
    }
}
