//! Record assembly.
//!
//! Pure transformation from the four raw feeds into complete
//! `ProductRecord`s, plus partitioning into fixed-size batches. No I/O:
//! same inputs always yield the same output set, independent of input
//! ordering.
//!
//! A product lacking a matching price or category entry is still emitted
//! with that field empty, never dropped. Partial data beats silent
//! omission.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;

use crate::models::{
    Batch, CategoryKind, CategoryPath, Config, ProductRecord, RawCatalog, RawCategory,
    RawProduct, Visibility,
};

// Attribute codes consumed into named record fields rather than the
// feature map.
const DESCRIPTION_CODE: &str = "description";
const URL_KEY_CODE: &str = "url_key";
const CATEGORY_IDS_CODE: &str = "category_ids";
const DISCONTINUED_CODE: &str = "discontinued";

/// Configuration slice the assembler needs.
#[derive(Debug, Clone)]
pub struct AssemblyRules {
    pub excluded_feature_keys: HashSet<String>,
    pub collections_category: String,
    pub brand_attribute_code: String,
    pub store_url: String,
    pub website_id: u64,
}

impl AssemblyRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            excluded_feature_keys: config
                .sync
                .excluded_feature_keys
                .iter()
                .cloned()
                .collect(),
            collections_category: config.sync.collections_category.clone(),
            brand_attribute_code: config.sync.brand_attribute_code.clone(),
            store_url: config.source.store_url.trim_end_matches('/').to_string(),
            website_id: config.sync.website_id,
        }
    }
}

/// Join the raw feeds into complete records, sorted by product id.
pub fn assemble(raw: &RawCatalog, rules: &AssemblyRules) -> Vec<ProductRecord> {
    let categories: HashMap<u64, &RawCategory> =
        raw.categories.iter().map(|c| (c.id, c)).collect();

    // Prefer the price entry for the configured website; any other entry
    // serves as the fallback when the website has none of its own.
    let mut prices: HashMap<&str, (u64, f64, &str)> = HashMap::new();
    for price in &raw.prices {
        match prices.entry(price.sku.as_str()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                if price.website_id == rules.website_id && entry.get().0 != rules.website_id {
                    entry.insert((price.website_id, price.price, &price.currency));
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert((price.website_id, price.price, &price.currency));
            }
        }
    }

    let brand_labels: HashMap<&str, &str> = raw
        .brand_options
        .options
        .iter()
        .map(|o| (o.value.as_str(), o.label.as_str()))
        .collect();

    let mut records: Vec<ProductRecord> = raw
        .products
        .iter()
        .map(|product| assemble_one(product, &categories, &prices, &brand_labels, rules))
        .collect();

    records.sort_by_key(|r| r.id);
    records
}

fn assemble_one(
    product: &RawProduct,
    categories: &HashMap<u64, &RawCategory>,
    prices: &HashMap<&str, (u64, f64, &str)>,
    brand_labels: &HashMap<&str, &str>,
    rules: &AssemblyRules,
) -> ProductRecord {
    let mut features = BTreeMap::new();
    let mut description = String::new();
    let mut url = None;
    let mut brand = None;
    let mut category_ids: Vec<u64> = Vec::new();
    let mut status = Visibility::Visible;

    for attribute in &product.custom_attributes {
        let code = attribute.attribute_code.as_str();
        let value = value_to_string(&attribute.value);

        if code == DESCRIPTION_CODE {
            description = value;
        } else if code == URL_KEY_CODE {
            if !value.is_empty() {
                url = Some(format!("{}/{}.html", rules.store_url, value));
            }
        } else if code == CATEGORY_IDS_CODE {
            category_ids = parse_id_list(&attribute.value);
        } else if code == DISCONTINUED_CODE {
            if is_truthy(&value) {
                status = Visibility::Hidden;
            }
        } else if code == rules.brand_attribute_code {
            brand = Some(
                brand_labels
                    .get(value.as_str())
                    .map_or_else(|| value.clone(), |label| (*label).to_string()),
            );
        } else if !rules.excluded_feature_keys.contains(code) {
            features.insert(code.to_string(), value);
        }
    }

    let (price, currency) = match prices.get(product.sku.as_str()) {
        Some((_, amount, currency)) => (Some(*amount), Some((*currency).to_string())),
        None => (None, None),
    };

    let record_categories = category_ids
        .iter()
        .filter_map(|id| category_path(*id, categories, rules))
        .collect();

    let image_url = product
        .media_gallery_entries
        .iter()
        .find(|m| m.types.iter().any(|t| t == "image"))
        .map(|m| {
            format!(
                "{}/media/catalog/products/{}",
                rules.store_url,
                m.file.trim_start_matches('/')
            )
        });

    ProductRecord {
        id: product.id,
        sku: product.sku.clone(),
        title: product.name.clone(),
        description,
        status,
        price,
        currency,
        brand,
        url,
        image_url,
        categories: record_categories,
        features,
        updated_at: iso8601(&product.updated_at),
    }
}

/// Resolve a category id to its full path from the top of the tree.
///
/// Paths rooted under the configured collections parent are tagged
/// `Collection` with the parent segment dropped; the target groups those
/// separately from ordinary categories.
fn category_path(
    id: u64,
    categories: &HashMap<u64, &RawCategory>,
    rules: &AssemblyRules,
) -> Option<CategoryPath> {
    let mut segments: Vec<&str> = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();
    let mut current = id;

    while let Some(category) = categories.get(&current) {
        if !seen.insert(current) {
            // cycle in the source tree
            return None;
        }
        segments.push(category.name.as_str());
        if category.parent_id == 0 {
            // tree root: not part of any displayed path
            segments.pop();
            break;
        }
        current = category.parent_id;
    }

    if segments.is_empty() {
        return None;
    }
    segments.reverse();

    if segments[0] == rules.collections_category {
        let rest = &segments[1..];
        if rest.is_empty() {
            return None;
        }
        Some(CategoryPath {
            path: rest.join(" > "),
            kind: CategoryKind::Collection,
        })
    } else {
        Some(CategoryPath {
            path: segments.join(" > "),
            kind: CategoryKind::Regular,
        })
    }
}

/// Partition records into fixed-size batches in stable order.
///
/// Produces `ceil(N/B)` batches; concatenating them in sequence order
/// reconstructs the input exactly, which is what makes resume-from-index
/// well-defined.
pub fn partition_batches(records: Vec<ProductRecord>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut current: Vec<ProductRecord> = Vec::with_capacity(batch_size);

    for record in records {
        current.push(record);
        if current.len() == batch_size {
            let index = batches.len();
            batches.push(Batch::new(index, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        let index = batches.len();
        batches.push(Batch::new(index, current));
    }
    batches
}

/// Flatten an attribute value to its display string.
fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a category-ids value: an array of numbers or numeric strings.
fn parse_id_list(value: &serde_json::Value) -> Vec<u64> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// A discontinued flag of "0", empty, or "false" means still active.
fn is_truthy(value: &str) -> bool {
    !matches!(value, "" | "0" | "false")
}

/// Re-format the backend's "YYYY-MM-DD HH:MM:SS" into ISO-8601.
///
/// An unparseable timestamp is passed through unchanged rather than
/// dropping the record.
fn iso8601(updated_at: &str) -> String {
    NaiveDateTime::parse_from_str(updated_at, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|_| updated_at.to_string())
}
