//! `$apply` pipeline compilation.
//!
//! Transformations are processed left to right. Two pieces of state travel
//! with them: whether grouping has happened (which moves later filters
//! from WHERE to HAVING) and the [`AliasRegistry`] of computed columns.
//! Both live in an [`ApplyState`] created per compilation and passed
//! explicitly; nothing here is global.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{AggregateExpr, AggregateMethod, ComputeExpr, Expr, PropertyPath, Transformation};
use crate::error::QueryError;
use crate::resolver::ResolveError;
use crate::sql::{SqlFragment, SqlIdentifier, COUNT_ALIAS};
use crate::sql_compiler::{AliasUse, CompileError, SqlCompiler};

/// Computed alias -> SQL expression it stands for (without `AS alias`).
///
/// Cloning is cheap; updates copy the map when it is shared, so a snapshot
/// handed to one stage never changes underneath it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasRegistry {
    entries: Arc<HashMap<String, SqlFragment>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, alias: &str) -> Option<&SqlFragment> {
        self.entries.get(alias)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn insert(&mut self, alias: &SqlIdentifier, expression: SqlFragment) {
        Arc::make_mut(&mut self.entries).insert(alias.as_str().to_string(), expression);
    }

    /// A copy of this registry with one more entry.
    pub fn with(&self, alias: &SqlIdentifier, expression: SqlFragment) -> Self {
        let mut next = self.clone();
        next.insert(alias, expression);
        next
    }
}

/// One SELECT-list item produced by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expression: SqlFragment,
    pub alias: Option<SqlIdentifier>,
}

/// Clauses an `$apply` pipeline contributes to the final statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMutation {
    pub select: Vec<Projection>,
    pub group_by: Vec<SqlFragment>,
    pub having: Vec<SqlFragment>,
    pub filters: Vec<SqlFragment>,
    pub has_grouping: bool,
    pub aliases: AliasRegistry,
}

/// Per-compilation pipeline state.
#[derive(Debug, Default)]
struct ApplyState {
    has_grouping: bool,
    aliases: AliasRegistry,
    /// Aliases introduced by `compute`, as opposed to aggregates.
    computed: HashSet<String>,
    mutation: QueryMutation,
}

/// Compiles a transformation pipeline against the compiler's root entity.
pub fn compile_apply(
    compiler: &mut SqlCompiler<'_>,
    transformations: &[Transformation],
) -> Result<QueryMutation, QueryError> {
    let mut state = ApplyState::default();
    for transformation in transformations {
        compile_step(compiler, &mut state, transformation)?;
    }

    // later options ($orderby) may name any computed column
    compiler.set_aliases(state.aliases.clone(), AliasUse::Reference);
    debug!(aliases = state.aliases.len(), grouped = state.has_grouping, "compiled $apply");

    let mut mutation = state.mutation;
    mutation.has_grouping = state.has_grouping;
    mutation.aliases = state.aliases;
    Ok(mutation)
}

/// Compiles a condition that runs after the pipeline, such as `$filter`
/// next to `$apply`. Returns it with `true` when it belongs in HAVING.
pub fn compile_trailing_filter(
    compiler: &mut SqlCompiler<'_>,
    mutation: &QueryMutation,
    expr: &Expr,
) -> Result<(SqlFragment, bool), QueryError> {
    let alias_use = filter_alias_use(compiler, mutation.has_grouping);
    compiler.set_aliases(mutation.aliases.clone(), alias_use);
    let fragment = compiler.compile_predicate(expr);
    compiler.set_aliases(mutation.aliases.clone(), AliasUse::Reference);
    Ok((fragment?, mutation.has_grouping))
}

fn filter_alias_use(compiler: &SqlCompiler<'_>, has_grouping: bool) -> AliasUse {
    if has_grouping && compiler.dialect().supports_alias_in_having() {
        AliasUse::Reference
    } else {
        AliasUse::Substitute
    }
}

fn compile_step(
    compiler: &mut SqlCompiler<'_>,
    state: &mut ApplyState,
    transformation: &Transformation,
) -> Result<(), QueryError> {
    match transformation {
        Transformation::Filter(expr) => {
            let alias_use = filter_alias_use(compiler, state.has_grouping);
            compiler.set_aliases(state.aliases.clone(), alias_use);
            let predicate = compiler.compile_predicate(expr)?;
            if state.has_grouping {
                state.mutation.having.push(predicate);
            } else {
                state.mutation.filters.push(predicate);
            }
        }
        Transformation::Compute(items) => {
            for item in items {
                compile_compute(compiler, state, item)?;
            }
        }
        Transformation::Aggregate(items) => {
            drop_computed_projections(state);
            for item in items {
                compile_aggregate(compiler, state, item)?;
            }
            state.has_grouping = true;
        }
        Transformation::GroupBy { properties, nested } => {
            drop_computed_projections(state);
            for property in properties {
                compile_group_key(compiler, state, property)?;
            }

            state.has_grouping = false;
            for step in nested {
                compile_step(compiler, state, step)?;
            }
            let has_aggregate = nested.iter().any(|t| matches!(t, Transformation::Aggregate(_)));
            if !has_aggregate {
                let count = count_star(compiler);
                let alias = SqlIdentifier::trusted(COUNT_ALIAS);
                state.aliases.insert(&alias, count.clone());
                state.mutation.select.push(Projection {
                    expression: count,
                    alias: Some(alias),
                });
            }
            state.has_grouping = true;
        }
    }
    Ok(())
}

/// Grouped rows only carry group keys and aggregates. Computed columns
/// stay in the registry so later steps can still substitute them.
fn drop_computed_projections(state: &mut ApplyState) {
    let computed = &state.computed;
    state
        .mutation
        .select
        .retain(|p| !p.alias.as_ref().is_some_and(|a| computed.contains(a.as_str())));
}

fn compile_group_key(
    compiler: &mut SqlCompiler<'_>,
    state: &mut ApplyState,
    property: &PropertyPath,
) -> Result<(), QueryError> {
    if property.is_single() {
        if let Some(expression) = state.aliases.get(property.first()).cloned() {
            return compile_computed_group_key(compiler, state, property.first(), expression);
        }
    }

    compiler.set_aliases(state.aliases.clone(), AliasUse::Substitute);
    let key = compiler.compile_value(&Expr::Path(property.clone()))?;
    let alias = (!property.is_single())
        .then(|| SqlIdentifier::sanitized(&property.segments.join("_")))
        .flatten();
    state.mutation.select.push(Projection {
        expression: key.clone(),
        alias,
    });
    state.mutation.group_by.push(key);
    Ok(())
}

/// Groups by a computed column, projected under its alias.
///
/// A second copy of a parameterized expression binds fresh placeholders
/// and no longer matches the projected one, so GROUP BY names the alias
/// wherever the dialect allows it.
fn compile_computed_group_key(
    compiler: &SqlCompiler<'_>,
    state: &mut ApplyState,
    name: &str,
    expression: SqlFragment,
) -> Result<(), QueryError> {
    let dialect = compiler.dialect();
    let alias = SqlIdentifier::trusted(name);
    let key = if dialect.supports_alias_in_group_by() {
        let mut builder = compiler.builder();
        builder.append_identifier(&alias);
        builder.finish()
    } else if expression.args().is_empty() {
        expression.clone()
    } else {
        return Err(CompileError::UnsupportedInDialect {
            feature: format!("grouping by the parameterized computed column '{name}'"),
            dialect,
        }
        .into());
    };
    state.computed.remove(name);
    state.mutation.select.push(Projection {
        expression,
        alias: Some(alias),
    });
    state.mutation.group_by.push(key);
    Ok(())
}

fn compile_compute(compiler: &mut SqlCompiler<'_>, state: &mut ApplyState, item: &ComputeExpr) -> Result<(), QueryError> {
    let alias = checked_alias(&item.alias)?;
    compiler.set_aliases(state.aliases.clone(), AliasUse::Substitute);
    let expression = compiler.compile_value(&item.expr)?;
    state.computed.insert(alias.as_str().to_string());
    register(state, alias, expression);
    Ok(())
}

fn compile_aggregate(
    compiler: &mut SqlCompiler<'_>,
    state: &mut ApplyState,
    item: &AggregateExpr,
) -> Result<(), QueryError> {
    let alias = checked_alias(&item.alias)?;
    let expression = match &item.source {
        None => count_star(compiler),
        Some(Expr::Path(path)) if path.is_single() && path.first() == COUNT_ALIAS => count_star(compiler),
        Some(source) => {
            compiler.set_aliases(state.aliases.clone(), AliasUse::Substitute);
            let source = compiler.compile_value(source)?;
            let mut builder = compiler.builder();
            builder
                .append_syntax(match item.method {
                    AggregateMethod::Sum => "SUM(",
                    AggregateMethod::Avg => "AVG(",
                    AggregateMethod::Min => "MIN(",
                    AggregateMethod::Max => "MAX(",
                    AggregateMethod::Count => "COUNT(",
                    AggregateMethod::CountDistinct => "COUNT(DISTINCT ",
                })
                .append_fragment(&source)
                .append_syntax(")");
            builder.finish()
        }
    };
    register(state, alias, expression);
    Ok(())
}

fn register(state: &mut ApplyState, alias: SqlIdentifier, expression: SqlFragment) {
    state.aliases.insert(&alias, expression.clone());
    state.mutation.select.push(Projection {
        expression,
        alias: Some(alias),
    });
}

fn count_star(compiler: &SqlCompiler<'_>) -> SqlFragment {
    let mut builder = compiler.builder();
    builder.append_syntax("COUNT(*)");
    builder.finish()
}

fn checked_alias(alias: &str) -> Result<SqlIdentifier, QueryError> {
    SqlIdentifier::sanitized(alias).ok_or_else(|| ResolveError::InvalidIdentifier(alias.to_string()).into())
}
