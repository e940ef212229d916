//! Static schema descriptors consumed by the compiler.
//!
//! The compiler never inspects application types. It reads a table of plain
//! descriptor records, built once at startup (usually from a JSON file via
//! [`crate::config::SchemaConfig`]) and shared read-only between requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Scalar type of a structural property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarType {
    #[default]
    String,
    Int,
    Decimal,
    Bool,
    Date,
    DateTime,
    TimeOfDay,
    Guid,
    Geography,
}

/// Multiplicity of a navigation property as seen from its source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "0..1")]
    ZeroOrOne,
    #[serde(rename = "1")]
    One,
    #[serde(rename = "*")]
    Many,
}

impl Cardinality {
    pub fn is_collection(self) -> bool {
        self == Cardinality::Many
    }
}

/// Relationship metadata of a navigation property.
///
/// `foreign_key` always names columns on the dependent side: the source
/// entity for single-valued navigations, the target entity for collections.
/// `references` names the matching principal columns and defaults to the
/// principal's declared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationDescriptor {
    pub target: String,
    pub cardinality: Cardinality,
    pub foreign_key: Vec<String>,
    pub references: Option<Vec<String>>,
}

impl NavigationDescriptor {
    pub fn single<I, S>(target: &str, foreign_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.to_string(),
            cardinality: Cardinality::ZeroOrOne,
            foreign_key: foreign_key.into_iter().map(Into::into).collect(),
            references: None,
        }
    }

    pub fn many<I, S>(target: &str, foreign_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cardinality: Cardinality::Many,
            ..Self::single(target, foreign_key)
        }
    }

    pub fn required(mut self) -> Self {
        self.cardinality = Cardinality::One;
        self
    }

    pub fn references<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub column_name: String,
    pub is_key: bool,
    pub scalar_type: ScalarType,
    pub navigation: Option<NavigationDescriptor>,
}

impl PropertyDescriptor {
    pub fn is_navigation(&self) -> bool {
        self.navigation.is_some()
    }
}

/// Supplies the physical table name of one entity.
pub trait TableNaming {
    fn table_name(&self) -> String;
}

/// Descriptor of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: String,
    pub table: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
}

impl EntitySchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            properties: Vec::new(),
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn key(self, name: &str, scalar_type: ScalarType) -> Self {
        self.push(name, None, true, scalar_type, None)
    }

    pub fn property(self, name: &str, scalar_type: ScalarType) -> Self {
        self.push(name, None, false, scalar_type, None)
    }

    /// Property stored under an explicit column name.
    pub fn column(self, name: &str, column: &str, scalar_type: ScalarType) -> Self {
        self.push(name, Some(column), false, scalar_type, None)
    }

    pub fn navigation(self, name: &str, navigation: NavigationDescriptor) -> Self {
        self.push(name, None, false, ScalarType::default(), Some(navigation))
    }

    fn push(
        mut self,
        name: &str,
        column: Option<&str>,
        is_key: bool,
        scalar_type: ScalarType,
        navigation: Option<NavigationDescriptor>,
    ) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.to_string(),
            column_name: column.map(str::to_string).unwrap_or_else(|| snake_case(name)),
            is_key,
            scalar_type,
            navigation,
        });
        self
    }

    /// Linear scan by property name.
    pub fn property_named(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn keys(&self) -> Vec<&PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_key).collect()
    }
}

impl TableNaming for EntitySchema {
    fn table_name(&self) -> String {
        self.table.clone().unwrap_or_else(|| pluralize(&snake_case(&self.name)))
    }
}

/// Read-only view of entity metadata used by the path resolver.
pub trait MetadataProvider: Send + Sync {
    /// Distinguishes metadata instances in shared caches.
    fn identity(&self) -> u64;

    fn entity(&self, entity: &str) -> Option<&EntitySchema>;

    fn resolve_property(&self, entity: &str, name: &str) -> Option<&PropertyDescriptor> {
        self.entity(entity)?.property_named(name)
    }

    fn table_name(&self, entity: &str) -> Option<String> {
        self.entity(entity).map(TableNaming::table_name)
    }

    fn key_properties(&self, entity: &str) -> Vec<&PropertyDescriptor> {
        self.entity(entity).map(EntitySchema::keys).unwrap_or_default()
    }
}

/// The static descriptor table keyed by entity name.
#[derive(Debug)]
pub struct SchemaRegistry {
    id: u64,
    entities: HashMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new<I>(entities: I) -> Self
    where
        I: IntoIterator<Item = EntitySchema>,
    {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            entities: entities.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

impl MetadataProvider for SchemaRegistry {
    fn identity(&self) -> u64 {
        self.id
    }

    fn entity(&self, entity: &str) -> Option<&EntitySchema> {
        self.entities.get(entity)
    }
}

/// `LanguageKey` -> `language_key`, `CustomerID` -> `customer_id`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn pluralize(word: &str) -> String {
    let consonant_y = word.ends_with('y')
        && !word.ends_with("ay")
        && !word.ends_with("ey")
        && !word.ends_with("oy")
        && !word.ends_with("uy");
    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// Products with descriptions, categories, and a customer/order/region
    /// graph with composite keys.
    pub fn registry() -> SchemaRegistry {
        SchemaRegistry::new([
            EntitySchema::new("Product")
                .key("ID", ScalarType::Int)
                .property("Name", ScalarType::String)
                .property("Price", ScalarType::Decimal)
                .property("CategoryID", ScalarType::Int)
                .property("Discontinued", ScalarType::Bool)
                .property("CreatedAt", ScalarType::DateTime)
                .property("Flags", ScalarType::Int)
                .property("Location", ScalarType::Geography)
                .column("Sku", "stock_keeping_unit", ScalarType::String)
                .navigation("Descriptions", NavigationDescriptor::many("Description", ["ProductID"]))
                .navigation("Category", NavigationDescriptor::single("Category", ["CategoryID"])),
            EntitySchema::new("Description")
                .table("product_descriptions")
                .key("ProductID", ScalarType::Int)
                .key("LanguageKey", ScalarType::String)
                .property("Text", ScalarType::String)
                .navigation(
                    "Language",
                    NavigationDescriptor::single("Language", ["LanguageKey"]).references(["Code"]),
                ),
            EntitySchema::new("Language")
                .key("ID", ScalarType::Int)
                .property("Code", ScalarType::String)
                .property("Name", ScalarType::String),
            EntitySchema::new("Category")
                .key("ID", ScalarType::Int)
                .property("Name", ScalarType::String),
            EntitySchema::new("Order")
                .key("ID", ScalarType::Int)
                .property("CustomerID", ScalarType::Int)
                .property("Amount", ScalarType::Decimal)
                .property("Status", ScalarType::String)
                .navigation("Customer", NavigationDescriptor::single("Customer", ["CustomerID"]))
                .navigation("Items", NavigationDescriptor::many("OrderItem", ["OrderID"])),
            EntitySchema::new("OrderItem")
                .key("OrderID", ScalarType::Int)
                .key("LineNo", ScalarType::Int)
                .property("Quantity", ScalarType::Int)
                .property("ProductID", ScalarType::Int),
            EntitySchema::new("Customer")
                .key("ID", ScalarType::Int)
                .property("Name", ScalarType::String)
                .property("CountryCode", ScalarType::String)
                .property("RegionCode", ScalarType::String)
                .navigation(
                    "Region",
                    NavigationDescriptor::single("Region", ["CountryCode", "RegionCode"]).required(),
                )
                .navigation("Orders", NavigationDescriptor::many("Order", ["CustomerID"])),
            EntitySchema::new("Region")
                .key("CountryCode", ScalarType::String)
                .key("Code", ScalarType::String)
                .property("Name", ScalarType::String),
        ])
    }
}
