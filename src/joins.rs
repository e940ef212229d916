//! Navigation join planning.
//!
//! Every single-valued navigation hop becomes one LEFT JOIN whose alias is
//! derived from the navigation path (`nav_customer`, `nav_customer_region`).
//! The alias doubles as the dedup key, so a navigation joined for `$filter`
//! is reused by `$orderby` and `$expand` of the same query.

use crate::dialect::Dialect;
use crate::resolver::{NavHop, ResolvedPath};
use crate::schema::snake_case;
use crate::sql::{SqlBuilder, SqlIdentifier};

/// `<alias>.<target_column> = <source_alias>.<source_column>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pub target_column: String,
    pub source_alias: String,
    pub source_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub alias: String,
    pub table: String,
    pub conditions: Vec<JoinCondition>,
}

impl JoinClause {
    pub fn append_to(&self, builder: &mut SqlBuilder) {
        let alias = SqlIdentifier::trusted(self.alias.as_str());
        builder
            .append_syntax("LEFT JOIN ")
            .append_identifier(&SqlIdentifier::trusted(self.table.as_str()))
            .append_syntax(" AS ")
            .append_identifier(&alias)
            .append_syntax(" ON ");
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                builder.append_syntax(" AND ");
            }
            builder
                .append_column(&alias, &SqlIdentifier::trusted(condition.target_column.as_str()))
                .append_syntax(" = ")
                .append_column(
                    &SqlIdentifier::trusted(condition.source_alias.as_str()),
                    &SqlIdentifier::trusted(condition.source_column.as_str()),
                );
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut builder = SqlBuilder::new(dialect);
        self.append_to(&mut builder);
        builder.finish().into_parts().0
    }
}

/// Ordered, deduplicated set of joins for one query scope.
#[derive(Debug, Clone, Default)]
pub struct JoinPlanner {
    source_alias: String,
    alias_prefix: String,
    joins: Vec<JoinClause>,
}

impl JoinPlanner {
    /// Planner for joins hanging off `source_alias`. `alias_prefix` keeps
    /// join aliases of nested subqueries apart from the outer ones.
    pub fn new(source_alias: &str, alias_prefix: &str) -> Self {
        Self {
            source_alias: source_alias.to_string(),
            alias_prefix: alias_prefix.to_string(),
            joins: Vec::new(),
        }
    }

    pub fn source_alias(&self) -> &str {
        &self.source_alias
    }

    /// Adds the joins `path` needs and returns the alias that owns its
    /// terminal segment.
    pub fn add_path(&mut self, path: &ResolvedPath) -> String {
        self.add_hops(&path.hops)
    }

    pub fn add_hops(&mut self, hops: &[NavHop]) -> String {
        let mut owner = self.source_alias.clone();
        let mut alias = format!("{}nav", self.alias_prefix);
        for hop in hops {
            alias.push('_');
            alias.push_str(&snake_case(&hop.property));
            if !self.joins.iter().any(|j| j.alias == alias) {
                self.joins.push(JoinClause {
                    alias: alias.clone(),
                    table: hop.target_table.clone(),
                    conditions: hop
                        .keys
                        .iter()
                        .map(|k| JoinCondition {
                            target_column: k.target_column.clone(),
                            source_alias: owner.clone(),
                            source_column: k.source_column.clone(),
                        })
                        .collect(),
                });
            }
            owner = alias.clone();
        }
        owner
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn into_joins(self) -> Vec<JoinClause> {
        self.joins
    }

    pub fn append_to(&self, builder: &mut SqlBuilder) {
        for join in &self.joins {
            builder.append_syntax(" ");
            join.append_to(builder);
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.joins.iter().map(|j| j.to_sql(dialect)).collect::<Vec<_>>().join(" ")
    }
}

/// Plans the joins for a batch of resolved paths rooted at `base_alias`.
pub fn plan<'a, I>(base_alias: &str, paths: I) -> Vec<JoinClause>
where
    I: IntoIterator<Item = &'a ResolvedPath>,
{
    let mut planner = JoinPlanner::new(base_alias, "");
    for path in paths {
        planner.add_path(path);
    }
    planner.into_joins()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PropertyPath;
    use crate::resolver::resolve;
    use crate::schema::fixtures;

    fn resolved(entity: &str, text: &str) -> ResolvedPath {
        let registry = fixtures::registry();
        resolve(&registry, entity, &PropertyPath::new(text.split('/'))).unwrap()
    }

    #[test]
    fn test_join_is_deduplicated() {
        let a = resolved("Order", "Customer/Name");
        let b = resolved("Order", "Customer/ID");
        let joins = plan("orders", [&a, &b]);
        assert_eq!(joins.len(), 1);
        assert_eq!(
            joins[0].to_sql(Dialect::Postgres),
            r#"LEFT JOIN "customers" AS "nav_customer" ON "nav_customer"."id" = "orders"."customer_id""#
        );
    }

    #[test]
    fn test_multi_hop_chains_aliases() {
        let path = resolved("Order", "Customer/Region/Name");
        let mut planner = JoinPlanner::new("orders", "");
        let owner = planner.add_path(&path);
        assert_eq!(owner, "nav_customer_region");
        let aliases: Vec<_> = planner.joins().iter().map(|j| j.alias.as_str()).collect();
        assert_eq!(aliases, vec!["nav_customer", "nav_customer_region"]);
    }

    #[test]
    fn test_composite_key_conjunction() {
        let path = resolved("Customer", "Region/Name");
        let mut planner = JoinPlanner::new("customers", "");
        planner.add_path(&path);
        assert_eq!(
            planner.to_sql(Dialect::MySql),
            "LEFT JOIN `regions` AS `nav_region` ON `nav_region`.`country_code` = `customers`.`country_code` \
             AND `nav_region`.`code` = `customers`.`region_code`"
        );
    }

    #[test]
    fn test_scoped_prefix_and_plain_path() {
        let path = resolved("Description", "Language/Code");
        let mut planner = JoinPlanner::new("lambda_1", "lambda_1_");
        assert_eq!(planner.add_path(&path), "lambda_1_nav_language");

        let plain = resolved("Product", "Name");
        let mut root = JoinPlanner::new("products", "");
        assert_eq!(root.add_path(&plain), "products");
        assert!(root.is_empty());
    }
}
