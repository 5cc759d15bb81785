//! Catalog data structures.
//!
//! Raw entities mirror the commerce backend's wire shapes; `ProductRecord`
//! is the complete, assembled form pushed to the messaging platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A custom attribute as returned by the backend: code plus untyped value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawAttributeValue {
    pub attribute_code: String,
    pub value: serde_json::Value,
}

/// One entry of a product's media gallery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMediaEntry {
    /// Roles this entry plays, e.g. "image", "thumbnail"
    #[serde(default)]
    pub types: Vec<String>,

    /// File path relative to the store's media root
    pub file: String,
}

/// A product as fetched from the backend's search API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawProduct {
    pub id: u64,
    pub sku: String,
    pub name: String,

    /// Backend status flag; 1 means enabled
    #[serde(default = "default_status")]
    pub status: i64,

    /// Backend-local timestamp, "YYYY-MM-DD HH:MM:SS"
    pub updated_at: String,

    #[serde(default)]
    pub media_gallery_entries: Vec<RawMediaEntry>,

    #[serde(default)]
    pub custom_attributes: Vec<RawAttributeValue>,
}

fn default_status() -> i64 {
    1
}

impl RawProduct {
    /// Look up a custom attribute value by code.
    pub fn attribute(&self, code: &str) -> Option<&serde_json::Value> {
        self.custom_attributes
            .iter()
            .find(|a| a.attribute_code == code)
            .map(|a| &a.value)
    }
}

/// A category node: id, display name, link to parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawCategory {
    pub id: u64,
    pub name: String,

    /// 0 for the tree root
    #[serde(default)]
    pub parent_id: u64,
}

/// A price entry, keyed by SKU and website.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawPrice {
    pub sku: String,

    #[serde(default)]
    pub website_id: u64,

    pub price: f64,

    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "GBP".into()
}

/// Option list for a select attribute, e.g. the brand attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawAttributeOptions {
    pub attribute_code: String,

    /// Option id → display label
    #[serde(default)]
    pub options: Vec<RawAttributeOption>,
}

/// One option of a select attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawAttributeOption {
    pub value: String,
    pub label: String,
}

/// Everything one fetch pass produced, ready for assembly.
#[derive(Debug, Clone, Default)]
pub struct RawCatalog {
    pub products: Vec<RawProduct>,
    pub categories: Vec<RawCategory>,
    pub prices: Vec<RawPrice>,
    pub brand_options: RawAttributeOptions,
}

/// Whether a record should be shown or hidden on the platform side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// How a category path is grouped on the target side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Regular,
    Collection,
}

/// A resolved category path attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryPath {
    /// Segments from the top of the tree down, joined with " > "
    pub path: String,
    pub kind: CategoryKind,
}

/// A complete catalog entry, immutable once assembled for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub id: u64,
    pub sku: String,
    pub title: String,

    #[serde(default)]
    pub description: String,

    pub status: Visibility,

    /// Absent when the source had no price entry for this product
    pub price: Option<f64>,
    pub currency: Option<String>,

    pub brand: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,

    #[serde(default)]
    pub categories: Vec<CategoryPath>,

    /// Remaining custom attributes after exclusion stripping.
    /// BTreeMap keeps serialization order stable across runs.
    #[serde(default)]
    pub features: BTreeMap<String, String>,

    /// ISO-8601 last-modified timestamp
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_lookup() {
        let product = RawProduct {
            id: 1,
            sku: "ABC-1".into(),
            name: "Widget".into(),
            status: 1,
            updated_at: "2026-08-01 09:00:00".into(),
            media_gallery_entries: vec![],
            custom_attributes: vec![RawAttributeValue {
                attribute_code: "material".into(),
                value: serde_json::json!("steel"),
            }],
        };
        assert_eq!(product.attribute("material"), Some(&serde_json::json!("steel")));
        assert_eq!(product.attribute("missing"), None);
    }

    #[test]
    fn raw_product_deserializes_with_defaults() {
        let json = r#"{
            "id": 42,
            "sku": "SKU-42",
            "name": "Bare product",
            "updated_at": "2026-08-01 09:00:00"
        }"#;
        let product: RawProduct = serde_json::from_str(json).unwrap();
        assert_eq!(product.status, 1);
        assert!(product.custom_attributes.is_empty());
        assert!(product.media_gallery_entries.is_empty());
    }
}
