//! SQL compiler that lowers expression trees to parameterized, dialect-specific SQL.
//!
//! One [`SqlCompiler`] is created per query. It owns the query-wide join plan
//! and a stack of scopes: the root entity, plus one scope per enclosing
//! `any`/`all` lambda. Collection navigations compile to correlated
//! `EXISTS` subqueries; single-valued navigations become LEFT JOINs in the
//! scope that walked them.

use std::sync::Arc;

use sea_query::Value;
use tracing::warn;

use crate::apply::AliasRegistry;
use crate::ast::{ArithOp, CompOp, Expr, Lambda, Literal, LogicalOp, OrderByItem, PropertyPath, Quantifier, SortDirection};
use crate::dialect::Dialect;
use crate::error::QueryError;
use crate::functions;
use crate::joins::{JoinClause, JoinPlanner};
use crate::resolver::{NavHop, ParserCache, ResolveError, ResolvedPath, Terminal};
use crate::schema::{MetadataProvider, ScalarType};
use crate::sql::{SqlBuilder, SqlFragment, SqlIdentifier};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unsupported function '{name}' with {arity} argument(s)")]
    UnsupportedFunction { name: String, arity: usize },
    #[error("invalid argument to '{function}': {reason}")]
    InvalidArgument { function: String, reason: String },
    #[error("{feature} is not supported on {dialect}")]
    UnsupportedInDialect { feature: String, dialect: Dialect },
    #[error("unsupported cast target '{0}'")]
    UnsupportedCast(String),
    #[error("{0} cannot be used as a condition")]
    NotAPredicate(String),
    #[error("null can only be compared with eq or ne")]
    NullComparison,
    #[error("type name '{0}' is only valid as a cast argument")]
    UnexpectedTypeName(String),
    #[error("cannot expand '{navigation}': {reason}")]
    InvalidExpand { navigation: String, reason: String },
}

/// How references to computed aliases are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AliasUse {
    /// Inline the recorded expression.
    #[default]
    Substitute,
    /// Refer to the SELECT-list alias by name.
    Reference,
}

#[derive(Debug)]
struct Scope {
    entity: String,
    alias: SqlIdentifier,
    /// Lambda variable bound by this scope; `None` for the root.
    variable: Option<String>,
    joins: JoinPlanner,
}

/// SQL Compiler that converts expression trees to SQL fragments
pub struct SqlCompiler<'q> {
    metadata: &'q dyn MetadataProvider,
    cache: &'q ParserCache,
    dialect: Dialect,
    scopes: Vec<Scope>,
    aliases: AliasRegistry,
    alias_use: AliasUse,
}

impl<'q> SqlCompiler<'q> {
    pub fn new(
        metadata: &'q dyn MetadataProvider,
        cache: &'q ParserCache,
        dialect: Dialect,
        entity: &str,
    ) -> Result<Self, QueryError> {
        let table = metadata
            .table_name(entity)
            .ok_or_else(|| ResolveError::UnknownEntity(entity.to_string()))?;
        let root = Scope {
            entity: entity.to_string(),
            joins: JoinPlanner::new(&table, ""),
            alias: SqlIdentifier::trusted(table),
            variable: None,
        };
        Ok(Self {
            metadata,
            cache,
            dialect,
            scopes: vec![root],
            aliases: AliasRegistry::new(),
            alias_use: AliasUse::Substitute,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn entity(&self) -> &str {
        &self.scopes[0].entity
    }

    /// Alias of the root table; the table name itself.
    pub fn base_alias(&self) -> &SqlIdentifier {
        &self.scopes[0].alias
    }

    pub fn metadata(&self) -> &'q dyn MetadataProvider {
        self.metadata
    }

    pub fn cache(&self) -> &'q ParserCache {
        self.cache
    }

    /// Joins collected so far for the root scope.
    pub fn joins(&self) -> &[JoinClause] {
        self.scopes[0].joins.joins()
    }

    /// Makes computed aliases visible to subsequent compilations.
    pub fn set_aliases(&mut self, aliases: AliasRegistry, alias_use: AliasUse) {
        self.aliases = aliases;
        self.alias_use = alias_use;
    }

    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    pub(crate) fn builder(&self) -> SqlBuilder {
        SqlBuilder::new(self.dialect)
    }

    /// Resolves a path relative to the root entity.
    pub fn resolve(&self, path: &PropertyPath) -> Result<Arc<ResolvedPath>, ResolveError> {
        self.cache.resolve(self.metadata, self.entity(), path)
    }

    /// Joins `hops` onto the root table and returns the alias of the last one.
    pub fn join_hops(&mut self, hops: &[NavHop]) -> SqlIdentifier {
        SqlIdentifier::trusted(self.scopes[0].joins.add_hops(hops))
    }

    /// Compiles an expression in condition position (WHERE, HAVING, ON).
    pub fn compile_predicate(&mut self, expr: &Expr) -> Result<SqlFragment, QueryError> {
        match expr {
            Expr::Logical { op, left, right } => {
                let left = self.compile_predicate(left)?;
                let right = self.compile_predicate(right)?;
                let mut builder = self.builder();
                builder
                    .append_syntax("(")
                    .append_fragment(&left)
                    .append_syntax(match op {
                        LogicalOp::And => " AND ",
                        LogicalOp::Or => " OR ",
                    })
                    .append_fragment(&right)
                    .append_syntax(")");
                Ok(builder.finish())
            }
            Expr::Not(inner) => {
                let compiled = self.compile_predicate(inner)?;
                let mut builder = self.builder();
                // logical groups and EXISTS already carry their own parentheses
                if matches!(inner.as_ref(), Expr::Logical { .. } | Expr::Lambda(_)) {
                    builder.append_syntax("NOT ").append_fragment(&compiled);
                } else {
                    builder.append_syntax("NOT (").append_fragment(&compiled).append_syntax(")");
                }
                Ok(builder.finish())
            }
            Expr::Comparison { op, left, right } => self.compile_comparison(*op, left, right),
            Expr::In { operand, values } => self.compile_in(operand, values),
            Expr::Lambda(lambda) => self.compile_lambda(lambda),
            Expr::Function { name, args } if functions::returns_boolean(name) => {
                functions::compile_function(self, name, args)
            }
            Expr::Literal(Literal::Boolean(value)) => {
                let mut builder = self.builder();
                builder.append_syntax(if *value { "(1 = 1)" } else { "(1 = 0)" });
                Ok(builder.finish())
            }
            Expr::Path(path) => {
                let (column, scalar_type) = self.path_operand(path)?;
                if !matches!(scalar_type, None | Some(ScalarType::Bool)) {
                    return Err(CompileError::NotAPredicate(format!("property '{path}'")).into());
                }
                let mut builder = self.builder();
                builder
                    .append_fragment(&column)
                    .append_syntax(" = ")
                    .append_syntax(self.dialect.boolean_literal(true));
                Ok(builder.finish())
            }
            other => Err(CompileError::NotAPredicate(describe(other)).into()),
        }
    }

    /// Compiles an expression in value position.
    pub fn compile_value(&mut self, expr: &Expr) -> Result<SqlFragment, QueryError> {
        match expr {
            Expr::Literal(Literal::Null) => {
                let mut builder = self.builder();
                builder.append_syntax("NULL");
                Ok(builder.finish())
            }
            Expr::Literal(literal) => {
                let mut builder = self.builder();
                builder.append_param(literal_to_value(literal));
                Ok(builder.finish())
            }
            Expr::Path(path) => Ok(self.path_operand(path)?.0),
            Expr::Arithmetic { op, left, right } => {
                let left = self.compile_value(left)?;
                let right = self.compile_value(right)?;
                let mut builder = self.builder();
                builder
                    .append_syntax("(")
                    .append_fragment(&left)
                    .append_syntax(match op {
                        ArithOp::Add => " + ",
                        ArithOp::Sub => " - ",
                        ArithOp::Mul => " * ",
                        ArithOp::Div => " / ",
                        // force decimal division even for integer operands
                        ArithOp::DivBy => " * 1.0 / ",
                        ArithOp::Mod => " % ",
                    })
                    .append_fragment(&right)
                    .append_syntax(")");
                Ok(builder.finish())
            }
            Expr::Negate(inner) => {
                let inner = self.compile_value(inner)?;
                let mut builder = self.builder();
                builder.append_syntax("(-").append_fragment(&inner).append_syntax(")");
                Ok(builder.finish())
            }
            Expr::Function { name, args } if !functions::returns_boolean(name) => {
                functions::compile_function(self, name, args)
            }
            Expr::TypeName(name) => Err(CompileError::UnexpectedTypeName(name.clone()).into()),
            condition => {
                let predicate = self.compile_predicate(condition)?;
                Ok(self.case_when(&predicate))
            }
        }
    }

    /// `CASE WHEN p THEN true ELSE false END`, for conditions used as values.
    fn case_when(&self, predicate: &SqlFragment) -> SqlFragment {
        let mut builder = self.builder();
        builder
            .append_syntax("CASE WHEN ")
            .append_fragment(predicate)
            .append_syntax(" THEN ")
            .append_syntax(self.dialect.boolean_literal(true))
            .append_syntax(" ELSE ")
            .append_syntax(self.dialect.boolean_literal(false))
            .append_syntax(" END");
        builder.finish()
    }

    fn compile_comparison(&mut self, op: CompOp, left: &Expr, right: &Expr) -> Result<SqlFragment, QueryError> {
        let is_null = |e: &Expr| matches!(e, Expr::Literal(Literal::Null));
        let mut builder = self.builder();

        match (is_null(left), is_null(right)) {
            (true, true) => {
                let syntax = match op {
                    CompOp::Eq => "(1 = 1)",
                    CompOp::Ne => "(1 = 0)",
                    _ => return Err(CompileError::NullComparison.into()),
                };
                builder.append_syntax(syntax);
                return Ok(builder.finish());
            }
            (false, true) | (true, false) => {
                let operand = if is_null(left) { right } else { left };
                let syntax = match op {
                    CompOp::Eq => " IS NULL",
                    CompOp::Ne => " IS NOT NULL",
                    _ => return Err(CompileError::NullComparison.into()),
                };
                let operand = self.compile_value(operand)?;
                builder.append_fragment(&operand).append_syntax(syntax);
                return Ok(builder.finish());
            }
            (false, false) => {}
        }

        let left = self.compile_value(left)?;
        let right = self.compile_value(right)?;
        let operator = match op {
            CompOp::Eq => " = ",
            CompOp::Ne => " <> ",
            CompOp::Gt => " > ",
            CompOp::Ge => " >= ",
            CompOp::Lt => " < ",
            CompOp::Le => " <= ",
            CompOp::Has => {
                builder
                    .append_syntax("(")
                    .append_fragment(&left)
                    .append_syntax(" & ")
                    .append_fragment(&right)
                    .append_syntax(") = ")
                    .append_fragment(&right);
                return Ok(builder.finish());
            }
        };
        builder.append_fragment(&left).append_syntax(operator).append_fragment(&right);
        Ok(builder.finish())
    }

    fn compile_in(&mut self, operand: &Expr, values: &[Expr]) -> Result<SqlFragment, QueryError> {
        let mut builder = self.builder();
        if values.is_empty() {
            builder.append_syntax("(1 = 0)");
            return Ok(builder.finish());
        }
        let operand = self.compile_value(operand)?;
        let values = values
            .iter()
            .map(|v| self.compile_value(v))
            .collect::<Result<Vec<_>, _>>()?;
        builder
            .append_fragment(&operand)
            .append_syntax(" IN (")
            .append_joined(&values, ", ")
            .append_syntax(")");
        Ok(builder.finish())
    }

    /// `any` compiles to `EXISTS`. `all` compiles to `NOT EXISTS` over the
    /// rows where `P` is not true, which holds vacuously for an empty
    /// collection. A row where `P` is NULL counts as failing.
    fn compile_lambda(&mut self, lambda: &Lambda) -> Result<SqlFragment, QueryError> {
        let (scope_index, relative) = self.locate(&lambda.collection)?;
        let entity = self.scopes[scope_index].entity.clone();
        let resolved = self.cache.resolve(self.metadata, &entity, &relative)?;
        let Terminal::Collection(hop) = &resolved.terminal else {
            return Err(ResolveError::NotACollection(lambda.collection.to_string()).into());
        };
        if lambda.quantifier == Quantifier::All && lambda.predicate.is_none() {
            return Err(CompileError::InvalidArgument {
                function: "all".to_string(),
                reason: "a lambda predicate is required".to_string(),
            }
            .into());
        }

        let outer = SqlIdentifier::trusted(self.scopes[scope_index].joins.add_hops(&resolved.hops));
        let alias = format!("lambda_{}", self.scopes.len());
        let inner = SqlIdentifier::trusted(alias.as_str());
        self.scopes.push(Scope {
            entity: hop.target_entity.clone(),
            alias: inner.clone(),
            variable: lambda.variable.clone(),
            joins: JoinPlanner::new(&alias, &format!("{alias}_")),
        });
        let predicate = match &lambda.predicate {
            Some(predicate) => self.compile_predicate(predicate).map(Some),
            None => Ok(None),
        };
        let scope = self.scopes.pop();
        let predicate = predicate?;

        let mut builder = self.builder();
        builder
            .append_syntax(match lambda.quantifier {
                Quantifier::Any => "EXISTS (SELECT 1 FROM ",
                Quantifier::All => "NOT EXISTS (SELECT 1 FROM ",
            })
            .append_identifier(&SqlIdentifier::trusted(hop.target_table.as_str()))
            .append_syntax(" AS ")
            .append_identifier(&inner);
        if let Some(scope) = &scope {
            scope.joins.append_to(&mut builder);
        }
        builder.append_syntax(" WHERE ");
        for (i, key) in hop.keys.iter().enumerate() {
            if i > 0 {
                builder.append_syntax(" AND ");
            }
            builder
                .append_column(&inner, &SqlIdentifier::trusted(key.target_column.as_str()))
                .append_syntax(" = ")
                .append_column(&outer, &SqlIdentifier::trusted(key.source_column.as_str()));
        }
        if let Some(predicate) = &predicate {
            match lambda.quantifier {
                Quantifier::Any => builder.append_syntax(" AND ").append_fragment(predicate),
                Quantifier::All => builder
                    .append_syntax(" AND (CASE WHEN ")
                    .append_fragment(predicate)
                    .append_syntax(" THEN 1 ELSE 0 END) = 0"),
            };
        }
        builder.append_syntax(")");
        Ok(builder.finish())
    }

    /// Finds the scope a path is rooted in and strips its variable prefix.
    ///
    /// Outside lambdas paths are relative to the root entity. Inside a
    /// lambda they must start with a bound variable or `$it`.
    fn locate(&self, path: &PropertyPath) -> Result<(usize, PropertyPath), ResolveError> {
        let first = path.first();
        if first == "$it" {
            return Ok((0, path.tail()));
        }
        if let Some(index) = self
            .scopes
            .iter()
            .rposition(|scope| scope.variable.as_deref() == Some(first))
        {
            return Ok((index, path.tail()));
        }
        if self.scopes.len() == 1 {
            Ok((0, path.clone()))
        } else {
            Err(ResolveError::OutsideLambdaScope(path.to_string()))
        }
    }

    /// Column reference (or computed alias) for a path in value position.
    fn path_operand(&mut self, path: &PropertyPath) -> Result<(SqlFragment, Option<ScalarType>), QueryError> {
        if self.scopes.len() == 1 && path.is_single() {
            if let Some(fragment) = self.alias_operand(path.first()) {
                return Ok((fragment, None));
            }
        }

        let (scope_index, relative) = self.locate(path)?;
        let entity = self.scopes[scope_index].entity.clone();
        let resolved = self.cache.resolve(self.metadata, &entity, &relative)?;
        match &resolved.terminal {
            Terminal::Column {
                column, scalar_type, ..
            } => {
                let owner = self.scopes[scope_index].joins.add_hops(&resolved.hops);
                let mut builder = self.builder();
                builder.append_column(
                    &SqlIdentifier::trusted(owner),
                    &SqlIdentifier::trusted(column.as_str()),
                );
                Ok((builder.finish(), Some(*scalar_type)))
            }
            Terminal::Navigation(_) => Err(ResolveError::NavigationValue(path.to_string()).into()),
            Terminal::Collection(_) => Err(ResolveError::CollectionPath(path.to_string()).into()),
        }
    }

    fn alias_operand(&self, name: &str) -> Option<SqlFragment> {
        let expression = self.aliases.get(name)?;
        let mut builder = self.builder();
        match self.alias_use {
            AliasUse::Substitute => builder.append_fragment(expression),
            AliasUse::Reference => builder.append_identifier(&SqlIdentifier::trusted(name)),
        };
        Some(builder.finish())
    }

    /// Quoted reference to a name that may be a computed column, or `None`
    /// when it fails the identifier allow-list.
    fn passthrough(&self, name: &str, option: &str) -> Option<SqlFragment> {
        let Some(identifier) = SqlIdentifier::sanitized(name) else {
            warn!(option, name, "skipping item that is neither a property nor a safe identifier");
            return None;
        };
        let mut builder = self.builder();
        builder.append_identifier(&identifier);
        Some(builder.finish())
    }

    /// Compiles one `$orderby` item. Unknown names are treated as possible
    /// computed columns; anything failing the allow-list is skipped.
    pub fn compile_order_item(&mut self, item: &OrderByItem) -> Result<Option<SqlFragment>, QueryError> {
        let (operand, direction) = match item {
            OrderByItem::Unparsed { raw, direction } => (self.passthrough(raw, "$orderby"), *direction),
            OrderByItem::Expr {
                expr: Expr::Path(path),
                direction,
            } if path.is_single() && self.aliases.contains(path.first()) => {
                let mut builder = self.builder();
                builder.append_identifier(&SqlIdentifier::trusted(path.first()));
                (Some(builder.finish()), *direction)
            }
            OrderByItem::Expr { expr, direction } => match self.compile_value(expr) {
                Ok(fragment) => (Some(fragment), *direction),
                Err(QueryError::Resolve(ResolveError::UnknownProperty { .. })) => {
                    let passthrough = match expr {
                        Expr::Path(path) if path.is_single() => self.passthrough(path.first(), "$orderby"),
                        _ => {
                            warn!(item = ?expr, "skipping $orderby item with unknown property");
                            None
                        }
                    };
                    (passthrough, *direction)
                }
                Err(e) => return Err(e),
            },
        };

        let Some(operand) = operand else {
            return Ok(None);
        };
        let mut builder = self.builder();
        builder.append_fragment(&operand).append_syntax(match direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        });
        if let Some(nulls) = self.dialect.null_ordering(direction) {
            builder.append_syntax(nulls);
        }
        Ok(Some(builder.finish()))
    }

    /// Compiles one `$select` name into a projection item.
    pub fn compile_select_item(&mut self, name: &str) -> Result<Option<SqlFragment>, QueryError> {
        let path = PropertyPath::new(name.split('/').map(str::trim));
        match self.path_operand(&path) {
            Ok((column, _)) if path.is_single() => Ok(Some(column)),
            Ok((column, _)) => {
                let alias = path.segments.join("_");
                let Some(alias) = SqlIdentifier::sanitized(&alias) else {
                    warn!(name, "skipping $select path that cannot be aliased");
                    return Ok(None);
                };
                let mut builder = self.builder();
                builder.append_fragment(&column).append_syntax(" AS ").append_identifier(&alias);
                Ok(Some(builder.finish()))
            }
            Err(QueryError::Resolve(ResolveError::UnknownProperty { .. })) if path.is_single() => {
                Ok(self.passthrough(name, "$select"))
            }
            Err(QueryError::Resolve(
                e @ (ResolveError::UnknownProperty { .. }
                | ResolveError::NavigationValue(_)
                | ResolveError::CollectionPath(_)),
            )) => {
                warn!(name, error = %e, "skipping $select item");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Convert AST Literal to sea-query Value
pub fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s)
        | Literal::Date(s)
        | Literal::TimeOfDay(s)
        | Literal::DateTimeOffset(s)
        | Literal::Guid(s) => Value::String(Some(Box::new(s.clone()))),
        Literal::Integer(n) => Value::BigInt(Some(*n)),
        Literal::Decimal(n) => Value::Double(Some(*n)),
        Literal::Boolean(b) => Value::Bool(Some(*b)),
        Literal::Null => Value::String(None),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Literal(_) => "a literal".to_string(),
        Expr::Path(path) => format!("property '{path}'"),
        Expr::Arithmetic { .. } | Expr::Negate(_) => "an arithmetic expression".to_string(),
        Expr::Function { name, .. } => format!("function '{name}'"),
        Expr::TypeName(name) => format!("type name '{name}'"),
        _ => "expression".to_string(),
    }
}
