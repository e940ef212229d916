//! Configuration loading: schema descriptor tables and compiler settings from JSON.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::schema::{
    snake_case, Cardinality, EntitySchema, NavigationDescriptor, PropertyDescriptor, ScalarType, SchemaRegistry,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    NotFound(PathBuf),
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse JSON config{}: {source}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid schema: {0}")]
    Invalid(String),
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        source,
    })
}

/// Compiler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    pub dialect: Dialect,
    /// Upper bound applied to `$top`; `None` leaves it uncapped.
    pub max_top: Option<u64>,
}

impl CompilerConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

/// On-disk form of the schema descriptor table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
    #[serde(default)]
    pub navigations: Vec<NavigationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, rename = "type")]
    pub scalar_type: ScalarType,
    #[serde(default)]
    pub key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationConfig {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub foreign_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<String>>,
}

impl SchemaConfig {
    /// Loads a schema descriptor table from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Checks names and cross references that JSON alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut entity_names = HashSet::new();
        for entity in &self.entities {
            if !entity_names.insert(entity.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate entity '{}'", entity.name)));
            }
            let mut names = HashSet::new();
            let all_names = entity
                .properties
                .iter()
                .map(|p| &p.name)
                .chain(entity.navigations.iter().map(|n| &n.name));
            for name in all_names {
                if !names.insert(name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate property '{name}' on entity '{}'",
                        entity.name
                    )));
                }
            }
        }

        let entity = |name: &str| self.entities.iter().find(|e| e.name == name);
        let has_property = |entity: &EntityConfig, name: &str| entity.properties.iter().any(|p| p.name == name);
        for source in &self.entities {
            for navigation in &source.navigations {
                let target = entity(&navigation.target).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "navigation '{}.{}' targets unknown entity '{}'",
                        source.name, navigation.name, navigation.target
                    ))
                })?;
                let (dependent, principal) = if navigation.cardinality.is_collection() {
                    (target, source)
                } else {
                    (source, target)
                };
                let referenced = navigation.references.iter().flatten().map(|r| (principal, r));
                let foreign = navigation.foreign_key.iter().map(|f| (dependent, f));
                for (owner, name) in foreign.chain(referenced) {
                    if !has_property(owner, name) {
                        return Err(ConfigError::Invalid(format!(
                            "navigation '{}.{}' refers to unknown property '{}.{name}'",
                            source.name, navigation.name, owner.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validates and converts into the registry the compiler consumes.
    pub fn into_registry(self) -> Result<SchemaRegistry, ConfigError> {
        self.validate()?;
        let entities = self.entities.into_iter().map(|entity| {
            let properties = entity
                .properties
                .into_iter()
                .map(|p| PropertyDescriptor {
                    column_name: p.column.unwrap_or_else(|| snake_case(&p.name)),
                    name: p.name,
                    is_key: p.key,
                    scalar_type: p.scalar_type,
                    navigation: None,
                })
                .chain(entity.navigations.into_iter().map(|n| PropertyDescriptor {
                    column_name: snake_case(&n.name),
                    name: n.name,
                    is_key: false,
                    scalar_type: ScalarType::default(),
                    navigation: Some(NavigationDescriptor {
                        target: n.target,
                        cardinality: n.cardinality,
                        foreign_key: n.foreign_key,
                        references: n.references,
                    }),
                }))
                .collect();
            EntitySchema {
                name: entity.name,
                table: entity.table,
                properties,
            }
        });
        Ok(SchemaRegistry::new(entities))
    }
}
