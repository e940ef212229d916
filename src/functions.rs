//! Function-call translation per dialect.

use crate::ast::{Expr, Literal};
use crate::dialect::Dialect;
use crate::error::QueryError;
use crate::sql::{SqlBuilder, SqlFragment};
use crate::sql_compiler::{CompileError, SqlCompiler};

/// Functions that produce a condition rather than a value.
pub fn returns_boolean(name: &str) -> bool {
    matches!(name, "contains" | "startswith" | "endswith" | "geo.intersects")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "year" => Some(DatePart::Year),
            "month" => Some(DatePart::Month),
            "day" => Some(DatePart::Day),
            "hour" => Some(DatePart::Hour),
            "minute" => Some(DatePart::Minute),
            "second" => Some(DatePart::Second),
            _ => None,
        }
    }

    /// Text around the argument that extracts this part.
    fn template(self, dialect: Dialect) -> (&'static str, &'static str) {
        use DatePart::*;
        match dialect {
            Dialect::Postgres => (
                match self {
                    Year => "EXTRACT(YEAR FROM ",
                    Month => "EXTRACT(MONTH FROM ",
                    Day => "EXTRACT(DAY FROM ",
                    Hour => "EXTRACT(HOUR FROM ",
                    Minute => "EXTRACT(MINUTE FROM ",
                    Second => "EXTRACT(SECOND FROM ",
                },
                ")",
            ),
            Dialect::MySql => (
                match self {
                    Year => "YEAR(",
                    Month => "MONTH(",
                    Day => "DAY(",
                    Hour => "HOUR(",
                    Minute => "MINUTE(",
                    Second => "SECOND(",
                },
                ")",
            ),
            Dialect::Sqlite => (
                match self {
                    Year => "CAST(strftime('%Y', ",
                    Month => "CAST(strftime('%m', ",
                    Day => "CAST(strftime('%d', ",
                    Hour => "CAST(strftime('%H', ",
                    Minute => "CAST(strftime('%M', ",
                    Second => "CAST(strftime('%S', ",
                },
                ") AS INTEGER)",
            ),
            Dialect::SqlServer => (
                match self {
                    Year => "DATEPART(year, ",
                    Month => "DATEPART(month, ",
                    Day => "DATEPART(day, ",
                    Hour => "DATEPART(hour, ",
                    Minute => "DATEPART(minute, ",
                    Second => "DATEPART(second, ",
                },
                ")",
            ),
        }
    }
}

/// Target type of `cast(x, Edm.Type)`.
fn cast_type(dialect: Dialect, edm_type: &str) -> Option<&'static str> {
    let name = edm_type.strip_prefix("Edm.").unwrap_or(edm_type);
    let mapped = match (name, dialect) {
        ("String", Dialect::Postgres | Dialect::Sqlite) => "TEXT",
        ("String", Dialect::MySql) => "CHAR",
        ("String", Dialect::SqlServer) => "NVARCHAR(MAX)",
        ("Int16" | "Int32" | "Byte" | "SByte", Dialect::MySql) => "SIGNED",
        ("Int16" | "Int32" | "Byte" | "SByte", _) => "INTEGER",
        ("Int64", Dialect::MySql) => "SIGNED",
        ("Int64", _) => "BIGINT",
        ("Decimal", Dialect::Sqlite) => "NUMERIC",
        ("Decimal", _) => "DECIMAL(38, 10)",
        ("Double" | "Single", Dialect::Postgres) => "DOUBLE PRECISION",
        ("Double" | "Single", Dialect::MySql) => "DOUBLE",
        ("Double" | "Single", Dialect::Sqlite) => "REAL",
        ("Double" | "Single", Dialect::SqlServer) => "FLOAT",
        ("Boolean", Dialect::Postgres) => "BOOLEAN",
        ("Boolean", Dialect::MySql) => "UNSIGNED",
        ("Boolean", Dialect::Sqlite) => "INTEGER",
        ("Boolean", Dialect::SqlServer) => "BIT",
        ("Date", Dialect::Sqlite) => "TEXT",
        ("Date", _) => "DATE",
        ("DateTimeOffset", Dialect::Postgres) => "TIMESTAMPTZ",
        ("DateTimeOffset", Dialect::MySql) => "DATETIME",
        ("DateTimeOffset", Dialect::Sqlite) => "TEXT",
        ("DateTimeOffset", Dialect::SqlServer) => "DATETIMEOFFSET",
        ("Guid", Dialect::Postgres) => "UUID",
        ("Guid", Dialect::MySql) => "CHAR(36)",
        ("Guid", Dialect::Sqlite) => "TEXT",
        ("Guid", Dialect::SqlServer) => "UNIQUEIDENTIFIER",
        _ => return None,
    };
    Some(mapped)
}

/// Compiles `name(args...)` for the compiler's dialect.
///
/// Unknown names, wrong arity and dialect gaps are errors; nothing is
/// silently dropped.
pub fn compile_function(compiler: &mut SqlCompiler<'_>, name: &str, args: &[Expr]) -> Result<SqlFragment, QueryError> {
    let dialect = compiler.dialect();
    let mut builder = SqlBuilder::new(dialect);

    if let Some(part) = DatePart::from_name(name) {
        let [arg] = args else {
            return Err(unsupported(name, args));
        };
        let (open, close) = part.template(dialect);
        let arg = compiler.compile_value(arg)?;
        builder.append_syntax(open).append_fragment(&arg).append_syntax(close);
        return Ok(builder.finish());
    }

    match (name, args) {
        ("contains" | "startswith" | "endswith", [target, pattern]) => {
            let Expr::Literal(Literal::String(text)) = pattern else {
                return Err(CompileError::InvalidArgument {
                    function: name.to_string(),
                    reason: "the pattern must be a string literal".to_string(),
                }
                .into());
            };
            let escaped = dialect.escape_like(text);
            let pattern = match name {
                "contains" => format!("%{escaped}%"),
                "startswith" => format!("{escaped}%"),
                _ => format!("%{escaped}"),
            };
            let target = compiler.compile_value(target)?;
            builder
                .append_fragment(&target)
                .append_syntax(" LIKE ")
                .append_param(pattern)
                .append_syntax(dialect.like_escape_clause());
        }
        ("tolower", [arg]) => wrap(compiler, &mut builder, "LOWER(", arg, ")")?,
        ("toupper", [arg]) => wrap(compiler, &mut builder, "UPPER(", arg, ")")?,
        ("trim", [arg]) => wrap(compiler, &mut builder, "TRIM(", arg, ")")?,
        ("length", [arg]) => {
            let open = match dialect {
                Dialect::MySql => "CHAR_LENGTH(",
                Dialect::SqlServer => "LEN(",
                Dialect::Sqlite | Dialect::Postgres => "LENGTH(",
            };
            wrap(compiler, &mut builder, open, arg, ")")?
        }
        ("indexof", [target, search]) => {
            // positions are 0-based; every dialect reports 1-based with 0 for "not found"
            let target = compiler.compile_value(target)?;
            let search = compiler.compile_value(search)?;
            match dialect {
                Dialect::Postgres => builder
                    .append_syntax("(POSITION(")
                    .append_fragment(&search)
                    .append_syntax(" IN ")
                    .append_fragment(&target),
                Dialect::Sqlite | Dialect::MySql => builder
                    .append_syntax("(INSTR(")
                    .append_fragment(&target)
                    .append_syntax(", ")
                    .append_fragment(&search),
                Dialect::SqlServer => builder
                    .append_syntax("(CHARINDEX(")
                    .append_fragment(&search)
                    .append_syntax(", ")
                    .append_fragment(&target),
            };
            builder.append_syntax(") - 1)");
        }
        ("substring", [target, start, rest @ ..]) if rest.len() <= 1 => {
            let target = compiler.compile_value(target)?;
            let start = compiler.compile_value(start)?;
            let length = rest.first().map(|l| compiler.compile_value(l)).transpose()?;
            // PostgreSQL has no substring(text, bigint, bigint)
            let (open_int, close_int) = match dialect {
                Dialect::Postgres => ("CAST(", " AS INTEGER)"),
                _ => ("", ""),
            };
            builder
                .append_syntax(match dialect {
                    Dialect::Sqlite => "SUBSTR(",
                    _ => "SUBSTRING(",
                })
                .append_fragment(&target)
                .append_syntax(", ")
                .append_syntax(open_int)
                .append_fragment(&start)
                .append_syntax(" + 1")
                .append_syntax(close_int);
            match (&length, dialect) {
                (Some(length), _) => {
                    builder
                        .append_syntax(", ")
                        .append_syntax(open_int)
                        .append_fragment(length)
                        .append_syntax(close_int);
                }
                // SQL Server insists on a length
                (None, Dialect::SqlServer) => {
                    builder.append_syntax(", LEN(").append_fragment(&target).append_syntax(")");
                }
                (None, _) => {}
            }
            builder.append_syntax(")");
        }
        ("concat", [_, _, ..]) => {
            let parts = args
                .iter()
                .map(|a| compiler.compile_value(a))
                .collect::<Result<Vec<_>, _>>()?;
            match dialect {
                Dialect::Postgres | Dialect::Sqlite => {
                    builder.append_syntax("(").append_joined(&parts, " || ").append_syntax(")");
                }
                Dialect::MySql | Dialect::SqlServer => {
                    builder.append_syntax("CONCAT(").append_joined(&parts, ", ").append_syntax(")");
                }
            }
        }
        ("date", [arg]) => match dialect {
            Dialect::Postgres | Dialect::SqlServer => wrap(compiler, &mut builder, "CAST(", arg, " AS DATE)")?,
            Dialect::MySql | Dialect::Sqlite => wrap(compiler, &mut builder, "DATE(", arg, ")")?,
        },
        ("time", [arg]) => match dialect {
            Dialect::Postgres | Dialect::SqlServer => wrap(compiler, &mut builder, "CAST(", arg, " AS TIME)")?,
            Dialect::MySql | Dialect::Sqlite => wrap(compiler, &mut builder, "TIME(", arg, ")")?,
        },
        ("now", []) => {
            builder.append_syntax("CURRENT_TIMESTAMP");
        }
        ("round", [arg]) => match dialect {
            Dialect::SqlServer => wrap(compiler, &mut builder, "ROUND(", arg, ", 0)")?,
            _ => wrap(compiler, &mut builder, "ROUND(", arg, ")")?,
        },
        ("floor" | "ceiling", [arg]) if dialect == Dialect::Sqlite => {
            // CEIL and FLOOR need a build with math functions; CAST truncates toward zero
            let arg = compiler.compile_value(arg)?;
            let (adjust, compare) = match name {
                "floor" => (" - (", " < "),
                _ => (" + (", " > "),
            };
            builder
                .append_syntax("(CAST(")
                .append_fragment(&arg)
                .append_syntax(" AS INTEGER)")
                .append_syntax(adjust)
                .append_fragment(&arg)
                .append_syntax(compare)
                .append_syntax("CAST(")
                .append_fragment(&arg)
                .append_syntax(" AS INTEGER)))");
        }
        ("floor", [arg]) => wrap(compiler, &mut builder, "FLOOR(", arg, ")")?,
        ("ceiling", [arg]) => match dialect {
            Dialect::SqlServer => wrap(compiler, &mut builder, "CEILING(", arg, ")")?,
            _ => wrap(compiler, &mut builder, "CEIL(", arg, ")")?,
        },
        ("geo.distance" | "geo.intersects" | "geo.length", _) => geo(compiler, &mut builder, name, args)?,
        ("cast", [arg, Expr::TypeName(edm_type)]) => {
            let target = cast_type(dialect, edm_type).ok_or_else(|| CompileError::UnsupportedCast(edm_type.clone()))?;
            let arg = compiler.compile_value(arg)?;
            builder
                .append_syntax("CAST(")
                .append_fragment(&arg)
                .append_syntax(" AS ")
                .append_syntax(target)
                .append_syntax(")");
        }
        _ => return Err(unsupported(name, args)),
    }
    Ok(builder.finish())
}

fn geo(compiler: &mut SqlCompiler<'_>, builder: &mut SqlBuilder, name: &str, args: &[Expr]) -> Result<(), QueryError> {
    let dialect = compiler.dialect();
    if dialect == Dialect::Sqlite {
        return Err(CompileError::UnsupportedInDialect {
            feature: format!("'{name}'"),
            dialect,
        }
        .into());
    }
    match (name, args, dialect) {
        ("geo.distance", [a, b], Dialect::SqlServer) => {
            let (a, b) = (compiler.compile_value(a)?, compiler.compile_value(b)?);
            builder.append_fragment(&a).append_syntax(".STDistance(").append_fragment(&b).append_syntax(")");
        }
        ("geo.distance", [a, b], _) => {
            let (a, b) = (compiler.compile_value(a)?, compiler.compile_value(b)?);
            builder
                .append_syntax("ST_Distance(")
                .append_fragment(&a)
                .append_syntax(", ")
                .append_fragment(&b)
                .append_syntax(")");
        }
        ("geo.intersects", [a, b], Dialect::SqlServer) => {
            let (a, b) = (compiler.compile_value(a)?, compiler.compile_value(b)?);
            builder
                .append_fragment(&a)
                .append_syntax(".STIntersects(")
                .append_fragment(&b)
                .append_syntax(") = 1");
        }
        ("geo.intersects", [a, b], _) => {
            let (a, b) = (compiler.compile_value(a)?, compiler.compile_value(b)?);
            builder
                .append_syntax("ST_Intersects(")
                .append_fragment(&a)
                .append_syntax(", ")
                .append_fragment(&b)
                .append_syntax(")");
        }
        ("geo.length", [a], Dialect::SqlServer) => {
            let a = compiler.compile_value(a)?;
            builder.append_fragment(&a).append_syntax(".STLength()");
        }
        ("geo.length", [a], _) => wrap(compiler, builder, "ST_Length(", a, ")")?,
        _ => return Err(unsupported(name, args)),
    }
    Ok(())
}

fn wrap(
    compiler: &mut SqlCompiler<'_>,
    builder: &mut SqlBuilder,
    open: &'static str,
    arg: &Expr,
    close: &'static str,
) -> Result<(), QueryError> {
    let arg = compiler.compile_value(arg)?;
    builder.append_syntax(open).append_fragment(&arg).append_syntax(close);
    Ok(())
}

fn unsupported(name: &str, args: &[Expr]) -> QueryError {
    CompileError::UnsupportedFunction {
        name: name.to_string(),
        arity: args.len(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use crate::dialect::Dialect;
    use crate::error::QueryError;
    use crate::parser::parse_filter;
    use crate::resolver::ParserCache;
    use crate::schema::fixtures;
    use crate::sql::SqlFragment;
    use crate::sql_compiler::{CompileError, SqlCompiler};

    fn compile_in(dialect: Dialect, filter: &str) -> Result<SqlFragment, QueryError> {
        let registry = fixtures::registry();
        let cache = ParserCache::new();
        let mut compiler = SqlCompiler::new(&registry, &cache, dialect, "Product")?;
        compiler.compile_predicate(&parse_filter(filter)?)
    }

    fn sql(dialect: Dialect, filter: &str) -> String {
        compile_in(dialect, filter).unwrap().sql().to_string()
    }

    #[test]
    fn test_function_chains_into_comparison() {
        assert_eq!(
            sql(Dialect::Sqlite, "tolower(Name) eq toupper('john')"),
            r#"LOWER("products"."name") = UPPER(?)"#
        );
    }

    #[test]
    fn test_like_escapes_wildcards() {
        let fragment = compile_in(Dialect::Postgres, r"contains(Name, '50%_\off')").unwrap();
        assert_eq!(fragment.sql(), r#""products"."name" LIKE ? ESCAPE '\'"#);
        assert_eq!(
            fragment.args(),
            &[sea_query::Value::String(Some(Box::new(r"%50\%\_\\off%".to_string())))]
        );

        let fragment = compile_in(Dialect::MySql, "startswith(Name, 'a')").unwrap();
        assert_eq!(fragment.sql(), r"`products`.`name` LIKE ? ESCAPE '\\'");
        assert_eq!(fragment.args(), &[sea_query::Value::from("a%")]);
    }

    #[test]
    fn test_like_needs_literal_pattern() {
        assert!(matches!(
            compile_in(Dialect::Sqlite, "endswith(Name, Sku)"),
            Err(QueryError::Compile(CompileError::InvalidArgument { .. }))
        ));
    }

    #[test]
    fn test_date_parts_per_dialect() {
        assert_eq!(
            sql(Dialect::Postgres, "year(CreatedAt) eq 2024"),
            r#"EXTRACT(YEAR FROM "products"."created_at") = ?"#
        );
        assert_eq!(sql(Dialect::MySql, "month(CreatedAt) eq 1"), "MONTH(`products`.`created_at`) = ?");
        assert_eq!(
            sql(Dialect::Sqlite, "day(CreatedAt) eq 1"),
            r#"CAST(strftime('%d', "products"."created_at") AS INTEGER) = ?"#
        );
        assert_eq!(
            sql(Dialect::SqlServer, "hour(CreatedAt) eq 1"),
            "DATEPART(hour, [products].[created_at]) = ?"
        );
    }

    #[test]
    fn test_substring_is_rebased() {
        assert_eq!(
            sql(Dialect::Sqlite, "substring(Name, 1, 2) eq 'ab'"),
            r#"SUBSTR("products"."name", ? + 1, ?) = ?"#
        );
        assert_eq!(
            sql(Dialect::SqlServer, "substring(Name, 1) eq 'ab'"),
            "SUBSTRING([products].[name], ? + 1, LEN([products].[name])) = ?"
        );
        assert_eq!(
            sql(Dialect::Postgres, "substring(Name, 1, 2) eq 'ab'"),
            r#"SUBSTRING("products"."name", CAST(? + 1 AS INTEGER), CAST(? AS INTEGER)) = ?"#
        );
        assert_eq!(
            sql(Dialect::Postgres, "indexof(Name, 'x') eq 0"),
            r#"(POSITION(? IN "products"."name") - 1) = ?"#
        );
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(sql(Dialect::MySql, "length(Name) gt 3"), "CHAR_LENGTH(`products`.`name`) > ?");
        assert_eq!(sql(Dialect::SqlServer, "length(Name) gt 3"), "LEN([products].[name]) > ?");
        assert_eq!(
            sql(Dialect::Postgres, "concat(Name, Sku) eq 'x'"),
            r#"("products"."name" || "products"."stock_keeping_unit") = ?"#
        );
        assert_eq!(
            sql(Dialect::SqlServer, "concat(Name, Sku) eq 'x'"),
            "CONCAT([products].[name], [products].[stock_keeping_unit]) = ?"
        );
    }

    #[test]
    fn test_math_and_now() {
        assert_eq!(
            sql(Dialect::Sqlite, "ceiling(Price) eq 3"),
            r#"(CAST("products"."price" AS INTEGER) + ("products"."price" > CAST("products"."price" AS INTEGER))) = ?"#
        );
        assert_eq!(sql(Dialect::Postgres, "floor(Price) eq 3"), r#"FLOOR("products"."price") = ?"#);
        assert_eq!(sql(Dialect::Postgres, "ceiling(Price) eq 3"), r#"CEIL("products"."price") = ?"#);
        assert_eq!(sql(Dialect::SqlServer, "round(Price) eq 3"), "ROUND([products].[price], 0) = ?");
        assert_eq!(sql(Dialect::Postgres, "CreatedAt lt now()"), r#""products"."created_at" < CURRENT_TIMESTAMP"#);
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            sql(Dialect::Postgres, "cast(Price, Edm.Int32) eq 3"),
            r#"CAST("products"."price" AS INTEGER) = ?"#
        );
        assert!(matches!(
            compile_in(Dialect::Postgres, "cast(Price, Edm.Stream) eq 3"),
            Err(QueryError::Compile(CompileError::UnsupportedCast(_)))
        ));
    }

    #[test]
    fn test_geo_functions() {
        assert_eq!(
            sql(Dialect::Postgres, "geo.distance(Location, 'POINT(0 0)') lt 10"),
            r#"ST_Distance("products"."location", ?) < ?"#
        );
        assert_eq!(
            sql(Dialect::SqlServer, "geo.intersects(Location, 'POLYGON((0 0))')"),
            "[products].[location].STIntersects(?) = 1"
        );
        assert!(matches!(
            compile_in(Dialect::Sqlite, "geo.distance(Location, 'POINT(0 0)') lt 10"),
            Err(QueryError::Compile(CompileError::UnsupportedInDialect { .. }))
        ));
    }

    #[test]
    fn test_unknown_function_fails_loudly() {
        assert!(matches!(
            compile_in(Dialect::Sqlite, "soundex(Name) eq 'x'"),
            Err(QueryError::Compile(CompileError::UnsupportedFunction { .. }))
        ));
        assert!(matches!(
            compile_in(Dialect::Sqlite, "tolower(Name, Sku) eq 'x'"),
            Err(QueryError::Compile(CompileError::UnsupportedFunction { arity: 2, .. }))
        ));
    }
}
