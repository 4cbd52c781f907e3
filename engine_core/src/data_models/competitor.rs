use serde::{Deserialize, Serialize};

/// # NDOC
/// component: `data_models::competitor`
/// purpose: Directory-level summary of a nearby competitor. Competitor site
///   crawling is out of scope; callers re-run extraction per competitor when
///   they need more.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorSummary {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub address_raw: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}
