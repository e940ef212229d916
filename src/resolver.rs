//! Property path resolution against entity metadata, plus the shared cache
//! that memoizes it per metadata instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::ast::PropertyPath;
use crate::schema::{MetadataProvider, PropertyDescriptor, ScalarType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("empty property path")]
    EmptyPath,
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("unknown property '{property}' on entity '{entity}'")]
    UnknownProperty { entity: String, property: String },
    #[error("'{segment}' in '{path}' is not a navigation property")]
    NotANavigation { path: String, segment: String },
    #[error("collection-valued navigation '{0}' can only be used with any/all")]
    CollectionPath(String),
    #[error("'{0}' is not a collection-valued navigation")]
    NotACollection(String),
    #[error("navigation '{0}' cannot be used as a value")]
    NavigationValue(String),
    #[error("navigation '{property}' on '{entity}' is misconfigured: {reason}")]
    InvalidNavigation {
        entity: String,
        property: String,
        reason: String,
    },
    #[error("'{0}' must start with a lambda variable or $it")]
    OutsideLambdaScope(String),
    #[error("'{0}' is not a valid SQL identifier")]
    InvalidIdentifier(String),
}

/// One equality of a navigation join, source side first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub source_column: String,
    pub target_column: String,
}

/// One navigation step of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavHop {
    pub property: String,
    pub target_entity: String,
    pub target_table: String,
    /// Key equalities in declared key order.
    pub keys: Vec<KeyPair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Column {
        property: String,
        column: String,
        scalar_type: ScalarType,
    },
    /// Single-valued navigation as the last segment.
    Navigation(NavHop),
    /// Collection-valued navigation as the last segment.
    Collection(NavHop),
}

/// A property path lowered against metadata.
///
/// `hops` holds the single-valued navigations walked before the terminal
/// segment; each of them requires a LEFT JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: PropertyPath,
    pub hops: Vec<NavHop>,
    pub terminal: Terminal,
}

impl ResolvedPath {
    pub fn requires_join(&self) -> bool {
        !self.hops.is_empty()
    }

    pub fn column(&self) -> Option<&str> {
        match &self.terminal {
            Terminal::Column { column, .. } => Some(column),
            _ => None,
        }
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match &self.terminal {
            Terminal::Column { scalar_type, .. } => Some(*scalar_type),
            _ => None,
        }
    }
}

/// Resolves `path` relative to `entity`.
pub fn resolve(
    metadata: &dyn MetadataProvider,
    entity: &str,
    path: &PropertyPath,
) -> Result<ResolvedPath, ResolveError> {
    if path.segments.is_empty() {
        return Err(ResolveError::EmptyPath);
    }
    if metadata.entity(entity).is_none() {
        return Err(ResolveError::UnknownEntity(entity.to_string()));
    }

    let mut current = entity.to_string();
    let mut hops = Vec::new();
    let last = path.segments.len() - 1;

    for (i, segment) in path.segments.iter().enumerate() {
        let property = metadata
            .resolve_property(&current, segment)
            .ok_or_else(|| ResolveError::UnknownProperty {
                entity: current.clone(),
                property: segment.clone(),
            })?;

        let Some(navigation) = &property.navigation else {
            if i != last {
                return Err(ResolveError::NotANavigation {
                    path: path.to_string(),
                    segment: segment.clone(),
                });
            }
            return Ok(ResolvedPath {
                path: path.clone(),
                hops,
                terminal: Terminal::Column {
                    property: property.name.clone(),
                    column: property.column_name.clone(),
                    scalar_type: property.scalar_type,
                },
            });
        };

        let hop = navigation_hop(metadata, &current, property)?;
        if i == last {
            let terminal = if navigation.cardinality.is_collection() {
                Terminal::Collection(hop)
            } else {
                Terminal::Navigation(hop)
            };
            return Ok(ResolvedPath {
                path: path.clone(),
                hops,
                terminal,
            });
        }
        if navigation.cardinality.is_collection() {
            return Err(ResolveError::CollectionPath(path.to_string()));
        }
        current = navigation.target.clone();
        hops.push(hop);
    }

    Err(ResolveError::EmptyPath)
}

/// Builds the key equalities of one navigation.
///
/// For single-valued navigations the foreign key lives on the source and
/// references the target; for collections it lives on the target and
/// references the source.
fn navigation_hop(
    metadata: &dyn MetadataProvider,
    source: &str,
    property: &PropertyDescriptor,
) -> Result<NavHop, ResolveError> {
    let invalid = |reason: String| ResolveError::InvalidNavigation {
        entity: source.to_string(),
        property: property.name.clone(),
        reason,
    };
    let Some(navigation) = &property.navigation else {
        return Err(ResolveError::NotANavigation {
            path: property.name.clone(),
            segment: property.name.clone(),
        });
    };
    let target = navigation.target.as_str();
    let target_table = metadata
        .table_name(target)
        .ok_or_else(|| ResolveError::UnknownEntity(target.to_string()))?;

    let (dependent, principal) = if navigation.cardinality.is_collection() {
        (target, source)
    } else {
        (source, target)
    };
    let principal_columns: Vec<String> = match &navigation.references {
        Some(references) => references
            .iter()
            .map(|name| column_of(metadata, principal, name))
            .collect::<Result<_, _>>()?,
        None => metadata
            .key_properties(principal)
            .into_iter()
            .map(|p| p.column_name.clone())
            .collect(),
    };
    let dependent_columns: Vec<String> = navigation
        .foreign_key
        .iter()
        .map(|name| column_of(metadata, dependent, name))
        .collect::<Result<_, _>>()?;

    if dependent_columns.is_empty() {
        return Err(invalid("no foreign key columns".to_string()));
    }
    if dependent_columns.len() != principal_columns.len() {
        return Err(invalid(format!(
            "{} foreign key column(s) but {} referenced column(s)",
            dependent_columns.len(),
            principal_columns.len()
        )));
    }

    let keys = dependent_columns
        .into_iter()
        .zip(principal_columns)
        .map(|(dependent_column, principal_column)| {
            if navigation.cardinality.is_collection() {
                KeyPair {
                    source_column: principal_column,
                    target_column: dependent_column,
                }
            } else {
                KeyPair {
                    source_column: dependent_column,
                    target_column: principal_column,
                }
            }
        })
        .collect();

    Ok(NavHop {
        property: property.name.clone(),
        target_entity: target.to_string(),
        target_table,
        keys,
    })
}

fn column_of(metadata: &dyn MetadataProvider, entity: &str, name: &str) -> Result<String, ResolveError> {
    metadata
        .resolve_property(entity, name)
        .map(|p| p.column_name.clone())
        .ok_or_else(|| ResolveError::UnknownProperty {
            entity: entity.to_string(),
            property: name.to_string(),
        })
}

type CacheKey = (u64, String, String);

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Memoizes successful path resolutions keyed by metadata identity,
/// entity and path. Safe to share between concurrent compilations.
#[derive(Debug, Default)]
pub struct ParserCache {
    entries: RwLock<HashMap<CacheKey, Arc<ResolvedPath>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ParserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &self,
        metadata: &dyn MetadataProvider,
        entity: &str,
        path: &PropertyPath,
    ) -> Result<Arc<ResolvedPath>, ResolveError> {
        let key = (metadata.identity(), entity.to_string(), path.to_string());
        if let Some(hit) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(entity, path = %path, "path cache hit");
            return Ok(Arc::clone(hit));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(entity, path = %path, "path cache miss");
        // Failures are not cached so a corrected schema is picked up.
        let resolved = Arc::new(resolve(metadata, entity, path)?);
        let mut entries = self.entries.write();
        Ok(Arc::clone(entries.entry(key).or_insert(resolved)))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }

    /// Drops every entry belonging to one metadata instance.
    pub fn evict(&self, identity: u64) {
        self.entries.write().retain(|(id, _, _), _| *id != identity);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures;

    fn path(text: &str) -> PropertyPath {
        PropertyPath::new(text.split('/'))
    }

    #[test]
    fn test_plain_property() {
        let registry = fixtures::registry();
        let resolved = resolve(&registry, "Product", &path("Sku")).unwrap();
        assert!(!resolved.requires_join());
        assert_eq!(resolved.column(), Some("stock_keeping_unit"));
    }

    #[test]
    fn test_single_navigation_hop() {
        let registry = fixtures::registry();
        let resolved = resolve(&registry, "Order", &path("Customer/Name")).unwrap();
        assert_eq!(resolved.hops.len(), 1);
        let hop = &resolved.hops[0];
        assert_eq!(hop.target_table, "customers");
        assert_eq!(
            hop.keys,
            vec![KeyPair {
                source_column: "customer_id".to_string(),
                target_column: "id".to_string(),
            }]
        );
        assert_eq!(resolved.column(), Some("name"));
    }

    #[test]
    fn test_composite_key_in_declared_order() {
        let registry = fixtures::registry();
        let resolved = resolve(&registry, "Order", &path("Customer/Region/Name")).unwrap();
        assert_eq!(resolved.hops.len(), 2);
        let pairs: Vec<_> = resolved.hops[1]
            .keys
            .iter()
            .map(|k| (k.source_column.as_str(), k.target_column.as_str()))
            .collect();
        assert_eq!(pairs, vec![("country_code", "country_code"), ("region_code", "code")]);
    }

    #[test]
    fn test_explicit_references_win() {
        let registry = fixtures::registry();
        let resolved = resolve(&registry, "Description", &path("Language/Name")).unwrap();
        assert_eq!(resolved.hops[0].keys[0].target_column, "code");
    }

    #[test]
    fn test_collection_terminal_correlates_back() {
        let registry = fixtures::registry();
        let resolved = resolve(&registry, "Product", &path("Descriptions")).unwrap();
        let Terminal::Collection(hop) = &resolved.terminal else {
            panic!("expected collection terminal");
        };
        assert_eq!(hop.target_table, "product_descriptions");
        assert_eq!(hop.keys[0].source_column, "id");
        assert_eq!(hop.keys[0].target_column, "product_id");
    }

    #[test]
    fn test_collection_inside_path_is_rejected() {
        let registry = fixtures::registry();
        let err = resolve(&registry, "Product", &path("Descriptions/Text")).unwrap_err();
        assert_eq!(err, ResolveError::CollectionPath("Descriptions/Text".to_string()));
    }

    #[test]
    fn test_unknown_property_and_scalar_hop() {
        let registry = fixtures::registry();
        assert!(matches!(
            resolve(&registry, "Product", &path("Nope")),
            Err(ResolveError::UnknownProperty { .. })
        ));
        assert!(matches!(
            resolve(&registry, "Product", &path("Name/Length")),
            Err(ResolveError::NotANavigation { .. })
        ));
        assert!(matches!(
            resolve(&registry, "Ghost", &path("Name")),
            Err(ResolveError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_cache_hits_and_misses() {
        let registry = fixtures::registry();
        let cache = ParserCache::new();
        let first = cache.resolve(&registry, "Order", &path("Customer/Name")).unwrap();
        let second = cache.resolve(&registry, "Order", &path("Customer/Name")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_cache_does_not_store_failures() {
        let registry = fixtures::registry();
        let cache = ParserCache::new();
        assert!(cache.resolve(&registry, "Product", &path("Nope")).is_err());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_cache_is_keyed_by_metadata_identity() {
        let a = fixtures::registry();
        let b = fixtures::registry();
        let cache = ParserCache::new();
        cache.resolve(&a, "Product", &path("Name")).unwrap();
        cache.resolve(&b, "Product", &path("Name")).unwrap();
        assert_eq!(cache.stats().entries, 2);
        cache.evict(a.identity());
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_cache_concurrent_access() {
        let registry = fixtures::registry();
        let cache = ParserCache::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        cache.resolve(&registry, "Customer", &path("Region/Name")).unwrap();
                    }
                });
            }
        });
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits + stats.misses, 400);
    }
}
