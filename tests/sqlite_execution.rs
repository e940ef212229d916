//! Runs compiled statements against an in-memory SQLite database.

use std::sync::Arc;

use filterql::schema::{EntitySchema, NavigationDescriptor, ScalarType, SchemaRegistry};
use filterql::{CompilerConfig, Dialect, QueryCompiler};
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection};
use sea_query::Value;

const FIXTURE: &str = "
    CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL);
    CREATE TABLE descriptions (
        product_id INTEGER NOT NULL,
        language_key TEXT NOT NULL,
        text TEXT,
        PRIMARY KEY (product_id, language_key)
    );
    INSERT INTO products VALUES (1, 'Milk', 2.0), (2, 'Bread', 2.0), (3, 'Cheese', 5.0), (4, 'Salt', 5.0);
    INSERT INTO descriptions VALUES
        (1, 'EN', 'fresh milk'),
        (1, 'DE', 'frische Milch'),
        (2, 'EN', 'rye bread'),
        (3, 'EN', NULL);
";

fn compiler() -> QueryCompiler {
    let registry = SchemaRegistry::new([
        EntitySchema::new("Product")
            .key("ID", ScalarType::Int)
            .property("Name", ScalarType::String)
            .property("Price", ScalarType::Decimal)
            .navigation("Descriptions", NavigationDescriptor::many("Description", ["ProductID"])),
        EntitySchema::new("Description")
            .key("ProductID", ScalarType::Int)
            .key("LanguageKey", ScalarType::String)
            .property("Text", ScalarType::String),
    ]);
    let config = CompilerConfig {
        dialect: Dialect::Sqlite,
        max_top: None,
    };
    QueryCompiler::new(Arc::new(registry), config)
}

fn database() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(FIXTURE).unwrap();
    conn
}

fn bind(value: Value) -> SqliteValue {
    match value {
        Value::Bool(Some(b)) => SqliteValue::Integer(i64::from(b)),
        Value::Int(Some(i)) => SqliteValue::Integer(i64::from(i)),
        Value::BigInt(Some(i)) => SqliteValue::Integer(i),
        Value::BigUnsigned(Some(u)) => SqliteValue::Integer(i64::try_from(u).unwrap()),
        Value::Double(Some(d)) => SqliteValue::Real(d),
        Value::String(Some(s)) => SqliteValue::Text(*s),
        Value::String(None) => SqliteValue::Null,
        other => panic!("unexpected bind value {other:?}"),
    }
}

/// IDs of the products matching `filter`, in key order.
fn product_ids(filter: &str) -> Vec<i64> {
    let compiled = compiler()
        .compile_params("Product", [("$filter", filter), ("$select", "ID"), ("$orderby", "ID")])
        .unwrap();
    let (sql, args) = compiled.to_sql();
    let conn = database();
    let mut statement = conn.prepare(&sql).unwrap();
    let rows = statement
        .query_map(params_from_iter(args.into_iter().map(bind)), |row| row.get::<_, i64>(0))
        .unwrap();
    rows.collect::<Result<Vec<_>, _>>().unwrap()
}

#[test]
fn test_any_selects_products_with_a_matching_description() {
    assert_eq!(product_ids("Descriptions/any(d: d/LanguageKey eq 'EN')"), vec![1, 2, 3]);
    assert_eq!(product_ids("Descriptions/any(d: d/LanguageKey eq 'XX')"), Vec::<i64>::new());
}

#[test]
fn test_not_any_keeps_products_without_descriptions() {
    assert_eq!(product_ids("not Descriptions/any(d: d/LanguageKey eq 'XX')"), vec![1, 2, 3, 4]);
}

#[test]
fn test_any_without_predicate_means_non_empty() {
    assert_eq!(product_ids("Descriptions/any()"), vec![1, 2, 3]);
}

#[test]
fn test_all_is_vacuously_true_for_empty_collections() {
    assert_eq!(product_ids("Descriptions/all(d: d/LanguageKey eq 'EN')"), vec![2, 3, 4]);
}

#[test]
fn test_all_fails_when_the_predicate_is_null() {
    // product 3's only description has no text
    assert_eq!(product_ids("Descriptions/all(d: d/Text ne 'x')"), vec![1, 2, 4]);
    assert_eq!(product_ids("Descriptions/all(d: contains(d/Text, 'e'))"), vec![1, 2, 4]);
}

#[test]
fn test_grouping_by_a_computed_column() {
    let compiled = compiler()
        .compile_params(
            "Product",
            [
                ("$apply", "compute(Price mul 2 as Double)/groupby((Double),aggregate($count as N))"),
                ("$orderby", "Double"),
            ],
        )
        .unwrap();
    let (sql, args) = compiled.to_sql();
    let conn = database();
    let mut statement = conn.prepare(&sql).unwrap();
    let rows = statement
        .query_map(params_from_iter(args.into_iter().map(bind)), |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?))
        })
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows, vec![(4.0, 2), (10.0, 2)]);
}
