//! Whole-request compilation: a query-option map in, one parameterized
//! `SELECT` statement (plus child statements for collection expansions) out.

use std::sync::Arc;

use sea_query::Value;
use tracing::{debug, warn};

use crate::alias::{extract_aliases, resolve_aliases_in_string};
use crate::apply::{compile_apply, compile_trailing_filter, Projection};
use crate::ast::{ExpandItem, Expr, OrderByItem, PropertyPath, Transformation};
use crate::config::CompilerConfig;
use crate::dialect::Dialect;
use crate::error::QueryError;
use crate::joins::JoinClause;
use crate::parser::{parse_apply, parse_count_option, parse_expand, parse_filter, parse_orderby, parse_select};
use crate::resolver::{KeyPair, ParserCache, ResolveError, Terminal};
use crate::schema::{MetadataProvider, PropertyDescriptor};
use crate::sql::{SqlBuilder, SqlFragment, SqlIdentifier};
use crate::sql_compiler::{CompileError, SqlCompiler};

/// Raw query options of one request, with `@alias` references substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub orderby: Option<String>,
    pub select: Option<String>,
    pub apply: Option<String>,
    pub expand: Option<String>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
}

impl QueryOptions {
    /// Builds options from `(name, value)` request parameters.
    ///
    /// `@name` bindings are substituted into `$filter`, `$orderby`, `$apply`
    /// and `$expand`. Parameters without a `$` or `@` prefix are ignored.
    pub fn from_params<'p, I>(params: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (&'p str, &'p str)>,
    {
        let params: Vec<(&str, &str)> = params.into_iter().collect();
        let aliases = extract_aliases(params.iter().copied())?;
        let substitute = |text: &str| resolve_aliases_in_string(text, &aliases);

        let mut options = Self::default();
        for (key, value) in params {
            match key {
                "$filter" => options.filter = Some(substitute(value)?),
                "$orderby" => options.orderby = Some(substitute(value)?),
                "$apply" => options.apply = Some(substitute(value)?),
                "$expand" => options.expand = Some(substitute(value)?),
                "$select" => options.select = Some(value.to_string()),
                "$top" => options.top = Some(parse_count_option(key, value)?),
                "$skip" => options.skip = Some(parse_count_option(key, value)?),
                _ if key.starts_with('@') => {}
                _ if key.starts_with('$') => warn!(option = key, "ignoring unsupported query option"),
                _ => {}
            }
        }
        Ok(options)
    }
}

/// Options after parsing, shared by root queries and collection expansions.
#[derive(Debug, Default)]
struct ParsedOptions {
    filter: Option<Expr>,
    orderby: Vec<OrderByItem>,
    select: Vec<String>,
    apply: Vec<Transformation>,
    expand: Vec<ExpandItem>,
    top: Option<u64>,
    skip: Option<u64>,
}

impl ParsedOptions {
    fn parse(options: &QueryOptions) -> Result<Self, QueryError> {
        Ok(Self {
            filter: options.filter.as_deref().map(parse_filter).transpose()?,
            orderby: options.orderby.as_deref().map(parse_orderby).unwrap_or_default(),
            select: options.select.as_deref().map(parse_select).unwrap_or_default(),
            apply: options.apply.as_deref().map(parse_apply).transpose()?.unwrap_or_default(),
            expand: options.expand.as_deref().map(parse_expand).transpose()?.unwrap_or_default(),
            top: options.top,
            skip: options.skip,
        })
    }
}

/// A collection navigation loaded by a separate statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub navigation: String,
    /// Parent column to child column equalities; the execution layer
    /// restricts the child rows to the parents it loaded.
    pub correlation: Vec<KeyPair>,
    pub query: CompiledQuery,
}

/// Every clause of one compiled statement, each carrying its own arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub entity: String,
    pub dialect: Dialect,
    pub table: String,
    pub projection: Vec<SqlFragment>,
    pub joins: Vec<JoinClause>,
    /// WHERE conjuncts.
    pub filters: Vec<SqlFragment>,
    pub group_by: Vec<SqlFragment>,
    /// HAVING conjuncts.
    pub having: Vec<SqlFragment>,
    pub order_by: Vec<SqlFragment>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub expansions: Vec<Expansion>,
}

impl CompiledQuery {
    fn new(entity: &str, dialect: Dialect, table: &str) -> Self {
        Self {
            entity: entity.to_string(),
            dialect,
            table: table.to_string(),
            projection: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            top: None,
            skip: None,
            expansions: Vec::new(),
        }
    }

    /// The WHERE conjuncts joined with AND.
    pub fn where_clause(&self) -> Option<SqlFragment> {
        self.conjunction(&self.filters)
    }

    /// The HAVING conjuncts joined with AND.
    pub fn having_clause(&self) -> Option<SqlFragment> {
        self.conjunction(&self.having)
    }

    fn conjunction(&self, parts: &[SqlFragment]) -> Option<SqlFragment> {
        if parts.is_empty() {
            return None;
        }
        let mut builder = SqlBuilder::new(self.dialect);
        builder.append_joined(parts, " AND ");
        Some(builder.finish())
    }

    /// The complete statement with `?` markers.
    pub fn statement(&self) -> SqlFragment {
        let mut builder = SqlBuilder::new(self.dialect);
        builder
            .append_syntax("SELECT ")
            .append_joined(&self.projection, ", ")
            .append_syntax(" FROM ")
            .append_identifier(&SqlIdentifier::trusted(self.table.as_str()));
        for join in &self.joins {
            builder.append_syntax(" ");
            join.append_to(&mut builder);
        }
        if let Some(filter) = self.where_clause() {
            builder.append_syntax(" WHERE ").append_fragment(&filter);
        }
        if !self.group_by.is_empty() {
            builder.append_syntax(" GROUP BY ").append_joined(&self.group_by, ", ");
        }
        if let Some(having) = self.having_clause() {
            builder.append_syntax(" HAVING ").append_fragment(&having);
        }
        if !self.order_by.is_empty() {
            builder.append_syntax(" ORDER BY ").append_joined(&self.order_by, ", ");
        }
        self.append_paging(&mut builder);
        builder.finish()
    }

    fn append_paging(&self, builder: &mut SqlBuilder) {
        match (self.dialect, self.top, self.skip) {
            (_, None, None) => {}
            (Dialect::SqlServer, top, skip) => {
                builder
                    .append_syntax(" OFFSET ")
                    .append_count(skip.unwrap_or(0))
                    .append_syntax(" ROWS");
                if let Some(top) = top {
                    builder
                        .append_syntax(" FETCH NEXT ")
                        .append_count(top)
                        .append_syntax(" ROWS ONLY");
                }
            }
            (dialect, top, skip) => {
                match (top, dialect) {
                    (Some(top), _) => {
                        builder.append_syntax(" LIMIT ").append_count(top);
                    }
                    // OFFSET needs a LIMIT on these two
                    (None, Dialect::Sqlite) => {
                        builder.append_syntax(" LIMIT -1");
                    }
                    (None, Dialect::MySql) => {
                        builder.append_syntax(" LIMIT 18446744073709551615");
                    }
                    (None, _) => {}
                }
                if let Some(skip) = skip {
                    builder.append_syntax(" OFFSET ").append_count(skip);
                }
            }
        }
    }

    /// SQL text with dialect placeholders and the arguments in bind order.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.statement().render(self.dialect)
    }

    /// SQL text with arguments inlined. For logs only.
    pub fn debug_sql(&self) -> String {
        self.statement().inline(self.dialect)
    }
}

/// Compiles query options for any entity of one metadata instance.
///
/// Cheap to clone; clones share the metadata and the path cache.
#[derive(Clone)]
pub struct QueryCompiler {
    metadata: Arc<dyn MetadataProvider>,
    cache: Arc<ParserCache>,
    config: CompilerConfig,
}

impl QueryCompiler {
    pub fn new(metadata: Arc<dyn MetadataProvider>, config: CompilerConfig) -> Self {
        Self::with_cache(metadata, Arc::new(ParserCache::new()), config)
    }

    /// Shares `cache` with other compilers, e.g. one per dialect.
    pub fn with_cache(metadata: Arc<dyn MetadataProvider>, cache: Arc<ParserCache>, config: CompilerConfig) -> Self {
        Self {
            metadata,
            cache,
            config,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ParserCache {
        &self.cache
    }

    pub fn shared_cache(&self) -> &Arc<ParserCache> {
        &self.cache
    }

    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    /// Compiles a `$filter` expression alone into a WHERE predicate and the
    /// joins it needs.
    pub fn compile_filter(&self, entity: &str, filter: &str) -> Result<(SqlFragment, Vec<JoinClause>), QueryError> {
        let expr = parse_filter(filter)?;
        let mut compiler = self.sql_compiler(entity)?;
        let predicate = compiler.compile_predicate(&expr)?;
        debug!(entity, filter, sql = %predicate.inline(self.dialect()), "compiled filter");
        Ok((predicate, compiler.joins().to_vec()))
    }

    /// Compiles raw `(name, value)` request parameters.
    pub fn compile_params<'p, I>(&self, entity: &str, params: I) -> Result<CompiledQuery, QueryError>
    where
        I: IntoIterator<Item = (&'p str, &'p str)>,
    {
        self.compile(entity, &QueryOptions::from_params(params)?)
    }

    pub fn compile(&self, entity: &str, options: &QueryOptions) -> Result<CompiledQuery, QueryError> {
        let parsed = ParsedOptions::parse(options)?;
        let top = match (parsed.top, self.config.max_top) {
            (Some(top), Some(max)) => Some(top.min(max)),
            (None, max) => max,
            (top, None) => top,
        };
        let query = self.compile_parsed(entity, ParsedOptions { top, ..parsed }, &[])?;
        debug!(entity, sql = %query.debug_sql(), expansions = query.expansions.len(), "compiled query");
        Ok(query)
    }

    fn sql_compiler(&self, entity: &str) -> Result<SqlCompiler<'_>, QueryError> {
        SqlCompiler::new(self.metadata.as_ref(), &self.cache, self.config.dialect, entity)
    }

    /// `required` lists columns the caller needs in the projection even when
    /// `$select` leaves them out.
    fn compile_parsed(
        &self,
        entity: &str,
        parsed: ParsedOptions,
        required: &[String],
    ) -> Result<CompiledQuery, QueryError> {
        let dialect = self.config.dialect;
        let mut compiler = self.sql_compiler(entity)?;
        let table = compiler.base_alias().clone();
        let mut query = CompiledQuery::new(entity, dialect, table.as_str());
        let mut grouped = false;

        if parsed.apply.is_empty() {
            if let Some(filter) = &parsed.filter {
                query.filters.push(compiler.compile_predicate(filter)?);
            }
            for name in &parsed.select {
                if let Some(item) = compiler.compile_select_item(name)? {
                    query.projection.push(item);
                }
            }
            if query.projection.is_empty() {
                query.projection.push(all_columns(&table, dialect));
            } else {
                for column in required {
                    let selected = parsed.select.iter().any(|name| {
                        self.metadata
                            .resolve_property(entity, name)
                            .is_some_and(|p| p.column_name == *column)
                    });
                    if !selected {
                        let mut builder = SqlBuilder::new(dialect);
                        builder.append_column(&table, &SqlIdentifier::trusted(column.as_str()));
                        query.projection.push(builder.finish());
                    }
                }
            }
            for item in &parsed.expand {
                self.compile_expand(&mut compiler, item, &mut query)?;
            }
        } else {
            if let Some(item) = parsed.expand.first() {
                return Err(CompileError::InvalidExpand {
                    navigation: item.navigation.clone(),
                    reason: "$expand cannot be combined with $apply".to_string(),
                }
                .into());
            }
            if !parsed.select.is_empty() {
                warn!(entity, "ignoring $select next to $apply");
            }

            let mutation = compile_apply(&mut compiler, &parsed.apply)?;
            grouped = mutation.has_grouping;
            if !grouped {
                query.projection.push(all_columns(&table, dialect));
            }
            query
                .projection
                .extend(mutation.select.iter().map(|p| projection_item(p, dialect)));
            query.filters.extend(mutation.filters.iter().cloned());
            query.group_by.extend(mutation.group_by.iter().cloned());
            query.having.extend(mutation.having.iter().cloned());

            if let Some(filter) = &parsed.filter {
                let (predicate, in_having) = compile_trailing_filter(&mut compiler, &mutation, filter)?;
                if in_having {
                    query.having.push(predicate);
                } else {
                    query.filters.push(predicate);
                }
            }
        }

        for item in &parsed.orderby {
            if let Some(order) = compiler.compile_order_item(item)? {
                query.order_by.push(order);
            }
        }

        query.top = parsed.top;
        query.skip = parsed.skip;
        let paged = query.top.is_some() || query.skip.is_some();
        if dialect == Dialect::SqlServer && paged && query.order_by.is_empty() {
            query.order_by = self.default_order(entity, &table, grouped);
        }

        query.joins = compiler.joins().to_vec();
        Ok(query)
    }

    /// ORDER BY for SQL Server paging when the request gives none: the key
    /// columns, or a constant when grouped or keyless.
    fn default_order(&self, entity: &str, table: &SqlIdentifier, grouped: bool) -> Vec<SqlFragment> {
        let dialect = self.config.dialect;
        let keys = self.metadata.key_properties(entity);
        if grouped || keys.is_empty() {
            let mut builder = SqlBuilder::new(dialect);
            builder.append_syntax("(SELECT NULL)");
            return vec![builder.finish()];
        }
        keys.into_iter()
            .map(|key| {
                let mut builder = SqlBuilder::new(dialect);
                builder.append_column(table, &SqlIdentifier::trusted(key.column_name.as_str()));
                builder.finish()
            })
            .collect()
    }

    fn compile_expand(
        &self,
        compiler: &mut SqlCompiler<'_>,
        item: &ExpandItem,
        query: &mut CompiledQuery,
    ) -> Result<(), QueryError> {
        let invalid = |reason: &str| {
            QueryError::from(CompileError::InvalidExpand {
                navigation: item.navigation.clone(),
                reason: reason.to_string(),
            })
        };
        let path = PropertyPath::new(item.navigation.split('/').map(str::trim));
        let resolved = compiler.resolve(&path)?;
        let options = &item.options;

        match &resolved.terminal {
            Terminal::Navigation(hop) => {
                let filtered = options.filter.is_some() || !options.orderby.is_empty();
                if filtered || options.top.is_some() || options.skip.is_some() {
                    return Err(invalid("only $select applies to a single-valued navigation"));
                }
                let mut hops = resolved.hops.clone();
                hops.push(hop.clone());
                let alias = compiler.join_hops(&hops);

                let target = self
                    .metadata
                    .entity(&hop.target_entity)
                    .ok_or_else(|| ResolveError::UnknownEntity(hop.target_entity.clone()))?;
                let columns: Vec<&PropertyDescriptor> = if options.select.is_empty() {
                    target.properties.iter().filter(|p| !p.is_navigation()).collect()
                } else {
                    options
                        .select
                        .iter()
                        .filter_map(|name| match target.property_named(name) {
                            Some(property) if !property.is_navigation() => Some(property),
                            _ => {
                                warn!(navigation = %item.navigation, name = name.as_str(), "skipping $expand $select item");
                                None
                            }
                        })
                        .collect()
                };
                for property in columns {
                    let label = SqlIdentifier::trusted(format!("{alias}__{}", property.column_name));
                    let mut builder = compiler.builder();
                    builder
                        .append_column(&alias, &SqlIdentifier::trusted(property.column_name.as_str()))
                        .append_syntax(" AS ")
                        .append_identifier(&label);
                    query.projection.push(builder.finish());
                }
                Ok(())
            }
            Terminal::Collection(hop) => {
                if resolved.requires_join() {
                    return Err(invalid("a collection can only be expanded from the queried entity"));
                }
                let parsed = ParsedOptions {
                    filter: options.filter.clone(),
                    orderby: options.orderby.clone(),
                    select: options.select.clone(),
                    top: options.top,
                    skip: options.skip,
                    ..ParsedOptions::default()
                };
                let correlation: Vec<String> = hop.keys.iter().map(|k| k.target_column.clone()).collect();
                let child = self.compile_parsed(&hop.target_entity, parsed, &correlation)?;
                query.expansions.push(Expansion {
                    navigation: item.navigation.clone(),
                    correlation: hop.keys.clone(),
                    query: child,
                });
                Ok(())
            }
            Terminal::Column { .. } => Err(invalid("not a navigation property")),
        }
    }
}

fn all_columns(table: &SqlIdentifier, dialect: Dialect) -> SqlFragment {
    let mut builder = SqlBuilder::new(dialect);
    builder.append_identifier(table).append_syntax(".*");
    builder.finish()
}

fn projection_item(projection: &Projection, dialect: Dialect) -> SqlFragment {
    let mut builder = SqlBuilder::new(dialect);
    builder.append_fragment(&projection.expression);
    if let Some(alias) = &projection.alias {
        builder.append_syntax(" AS ").append_identifier(alias);
    }
    builder.finish()
}
