//! Catalog data model shared by the API layer and the sync engine

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Platform segment used when qualifying bare numeric ids
pub const GID_PLATFORM: &str = "shopify";

static GID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^gid://([A-Za-z0-9_-]+)/([A-Za-z]+)/(\d+)(\?.*)?$").expect("valid gid regex")
});

/// Kind of catalog record an id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Product,
    ProductVariant,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "Product",
            Self::ProductVariant => "ProductVariant",
        }
    }
}

/// Fully-qualified identifier of a remote catalog entity
///
/// Bare numeric ids (`"123"`) and fully-qualified ids
/// (`"gid://shopify/Product/123"`) are reconciled at parse time, so two
/// `EntityId`s compare equal whenever they address the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityIdError {
    #[error("entity id is empty")]
    Empty,
    #[error("'{0}' is neither a numeric id nor a gid:// reference")]
    Malformed(String),
}

impl EntityId {
    /// Parse a raw id, qualifying bare numerics with `default_kind`
    pub fn parse(raw: &str, default_kind: EntityKind) -> Result<Self, EntityIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EntityIdError::Empty);
        }

        if let Some(caps) = GID_PATTERN.captures(trimmed) {
            // Query suffixes (e.g. `?inventory_item_id=..`) are not part of identity
            return Ok(Self(format!("gid://{}/{}/{}", &caps[1], &caps[2], &caps[3])));
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self(format!(
                "gid://{}/{}/{}",
                GID_PLATFORM,
                default_kind.as_str(),
                trimmed
            )));
        }

        Err(EntityIdError::Malformed(trimmed.to_string()))
    }

    /// Parse a product id (bare numerics become `Product` gids)
    pub fn product(raw: &str) -> Result<Self, EntityIdError> {
        Self::parse(raw, EntityKind::Product)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing numeric segment of the gid
    pub fn numeric_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Record type segment of the gid (e.g. `Product`)
    pub fn resource_type(&self) -> &str {
        self.0.rsplit('/').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Desired set of publication channels, matched case-insensitively by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSet {
    names: BTreeSet<String>,
}

impl ChannelSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| normalize_channel_name(name.as_ref()))
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_channel_name(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Normalized names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

fn normalize_channel_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A remote publication target (storefront, marketplace, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub name: String,
}

/// Attribute keys the sync engine knows how to write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeKey {
    Category,
    Color,
    Size,
    Gender,
    AgeGroup,
}

impl AttributeKey {
    pub const ALL: [AttributeKey; 5] = [
        Self::Category,
        Self::Color,
        Self::Size,
        Self::Gender,
        Self::AgeGroup,
    ];

    /// Metafield key the attribute is stored under
    pub fn metafield_key(&self) -> &'static str {
        match self {
            Self::Category => "google_product_category",
            Self::Color => "color",
            Self::Size => "size",
            Self::Gender => "gender",
            Self::AgeGroup => "age_group",
        }
    }
}

/// Marketplace attributes to write on an entity
///
/// Blank values mean "do not set" and never reach the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    values: BTreeMap<AttributeKey, String>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: AttributeKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: AttributeKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: AttributeKey) -> Option<&str> {
        self.values
            .get(&key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Non-blank values in key order, trimmed
    pub fn non_blank(&self) -> impl Iterator<Item = (AttributeKey, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (*key, value.trim()))
            .filter(|(_, value)| !value.is_empty())
    }

    /// True when no value would be written
    pub fn is_blank(&self) -> bool {
        self.non_blank().next().is_none()
    }

    /// Fill blank keys from `other`, keeping values already present
    pub fn fill_blanks_from(&mut self, other: &AttributeSet) {
        for (key, value) in other.non_blank() {
            if self.get(key).is_none() {
                self.values.insert(key, value.to_string());
            }
        }
    }
}

/// Wire shape of an attribute set (`{category?, color?, size?, gender?, ageGroup?}`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_group: Option<String>,
}

impl From<AttributeFields> for AttributeSet {
    fn from(fields: AttributeFields) -> Self {
        let mut set = AttributeSet::new();
        let pairs = [
            (AttributeKey::Category, fields.category),
            (AttributeKey::Color, fields.color),
            (AttributeKey::Size, fields.size),
            (AttributeKey::Gender, fields.gender),
            (AttributeKey::AgeGroup, fields.age_group),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                set.set(key, value);
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_and_qualified_ids_are_equal() {
        let bare = EntityId::product("123").unwrap();
        let qualified = EntityId::product("gid://shopify/Product/123").unwrap();
        assert_eq!(bare, qualified);
        assert_eq!(bare.as_str(), "gid://shopify/Product/123");
        assert_eq!(bare.numeric_id(), "123");
        assert_eq!(bare.resource_type(), "Product");
    }

    #[test]
    fn test_variant_kind_and_query_suffix() {
        let id = EntityId::parse(" 42 ", EntityKind::ProductVariant).unwrap();
        assert_eq!(id.as_str(), "gid://shopify/ProductVariant/42");

        let with_suffix = EntityId::product("gid://shopify/ProductVariant/42?foo=1").unwrap();
        assert_eq!(with_suffix, id);
    }

    #[test]
    fn test_invalid_ids() {
        assert_eq!(EntityId::product("   "), Err(EntityIdError::Empty));
        assert!(matches!(
            EntityId::product("abc"),
            Err(EntityIdError::Malformed(_))
        ));
        assert!(EntityId::product("gid://shopify/Product/").is_err());
    }

    #[test]
    fn test_channel_set_is_case_insensitive() {
        let set = ChannelSet::new(["Online Store", "  google ", ""]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("online store"));
        assert!(set.contains("Google"));
        assert!(!set.contains("Facebook"));
    }

    #[test]
    fn test_attribute_set_skips_blanks() {
        let set = AttributeSet::new()
            .with(AttributeKey::Color, "  ")
            .with(AttributeKey::Size, "M");
        let values: Vec<_> = set.non_blank().collect();
        assert_eq!(values, vec![(AttributeKey::Size, "M")]);
        assert!(!set.is_blank());
        assert!(AttributeSet::new().with(AttributeKey::Category, "").is_blank());
    }

    #[test]
    fn test_fill_blanks_keeps_existing_values() {
        let mut set = AttributeSet::new()
            .with(AttributeKey::Color, "Red")
            .with(AttributeKey::Gender, "");
        let detected = AttributeSet::new()
            .with(AttributeKey::Color, "Blue")
            .with(AttributeKey::Gender, "female");
        set.fill_blanks_from(&detected);
        assert_eq!(set.get(AttributeKey::Color), Some("Red"));
        assert_eq!(set.get(AttributeKey::Gender), Some("female"));
    }

    #[test]
    fn test_attribute_fields_wire_shape() {
        let fields: AttributeFields =
            serde_json::from_str(r#"{"category":"Apparel","ageGroup":"adult"}"#).unwrap();
        let set = AttributeSet::from(fields);
        assert_eq!(set.get(AttributeKey::Category), Some("Apparel"));
        assert_eq!(set.get(AttributeKey::AgeGroup), Some("adult"));
        assert_eq!(set.get(AttributeKey::Color), None);
    }
}
