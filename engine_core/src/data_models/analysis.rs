use serde::{Deserialize, Serialize};

/// # NDOC
/// component: `data_models::analysis`
/// purpose: Structured impressions from one screenshot, stage 1 of the
///   strategic analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotImpression {
    pub artifact_uri: String,
    pub impressions: Vec<String>,
    #[serde(default)]
    pub extracted_facts: Vec<String>,
}

/// # NDOC
/// component: `data_models::analysis`
/// purpose: Target restaurant deep-dive, stage 2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetDeepDive {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub positioning: String,
}

/// # NDOC
/// component: `data_models::analysis`
/// purpose: Per-competitor snapshot, stage 3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorSnapshot {
    pub competitor_name: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

/// # NDOC
/// component: `data_models::analysis`
/// purpose: Final strategic-analysis object with fixed sections.
/// invariants:
///   - Every section is present; empty sections are explicit empty lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategicAnalysis {
    pub executive_hook: String,
    pub competitive_landscape: String,
    pub top_opportunities: Vec<String>,
    pub action_items: Vec<String>,
    pub premium_teasers: Vec<String>,
    pub forward_looking_insights: Vec<String>,
}
