//! Compiles query-filter options (`$filter`, `$orderby`, `$select`, `$apply`,
//! `$expand`, `$top`, `$skip`, `@alias`) into parameterized SQL for SQLite,
//! PostgreSQL, MySQL and SQL Server.

pub mod alias;
pub mod apply;
pub mod ast;
pub mod config;
pub mod dialect;
pub mod error;
pub mod functions;
pub mod joins;
pub mod lexer;
pub mod parser;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod sql;
pub mod sql_compiler;
pub mod token;

pub use config::{CompilerConfig, ConfigError, SchemaConfig};
pub use dialect::Dialect;
pub use error::QueryError;
pub use query::{CompiledQuery, Expansion, QueryCompiler, QueryOptions};
pub use resolver::ParserCache;
pub use schema::{EntitySchema, MetadataProvider, NavigationDescriptor, ScalarType, SchemaRegistry};
pub use sql::{SqlFragment, SqlIdentifier};
