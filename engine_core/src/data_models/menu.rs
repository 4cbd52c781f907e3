use super::record::SourceTag;
use serde::{Deserialize, Serialize};

/// Fixed category vocabulary for menu item classification.
pub const MENU_CATEGORIES: [&str; 9] = [
    "appetizer",
    "main",
    "dessert",
    "beverage-nonalcoholic",
    "beverage-alcoholic",
    "side",
    "soup-salad",
    "breakfast",
    "other",
];

/// # NDOC
/// component: `data_models::menu`
/// purpose: One extracted menu item with provenance.
/// invariants:
///   - `price_numeric`, when present, is non-negative and consistent with
///     `price_raw` within rounding.
///   - `category`, when present, comes from `MENU_CATEGORIES`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price_raw: Option<String>,
    #[serde(default)]
    pub price_numeric: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub source_tag: SourceTag,
    #[serde(default)]
    pub source_artifact: Option<String>,
}

impl MenuItem {
    /// Dedup key: lowercased, trimmed, inner whitespace collapsed.
    pub fn normalized_name(&self) -> String {
        self.name
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
