use crate::artifact_store::ArtifactStore;
use crate::capabilities::llm::{EncodedImage, TextModel, TextRequest, VisionModel, VisionRequest};
use crate::data_models::analysis::{
    CompetitorSnapshot, ScreenshotImpression, StrategicAnalysis, TargetDeepDive,
};
use crate::data_models::record::{FinalRecord, MediaKind};
use crate::llm_json::{complete_text_json, complete_vision_json, parse_llm_json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MAX_SCREENSHOTS: usize = 3;
const MAX_COMPETITOR_SNAPSHOTS: usize = 5;
const STAGE_MAX_TOKENS: u32 = 1024;
const SYNTHESIS_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Deserialize)]
struct ImpressionResponse {
    #[serde(default)]
    impressions: Vec<String>,
    #[serde(default)]
    extracted_facts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeepDiveResponse {
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    positioning: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
}

/// # NDOC
/// component: `strategy`
/// purpose: Result of the strategic-analysis stage. `analysis` is `None` when
///   synthesis failed schema validation after the repair attempt; the run
///   itself never fails on this path.
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub analysis: Option<StrategicAnalysis>,
    pub cost_usd: f64,
    pub errors: Vec<String>,
}

pub struct StrategicAnalyzer {
    text: Arc<dyn TextModel>,
    vision: Arc<dyn VisionModel>,
    store: Arc<dyn ArtifactStore>,
}

fn record_summary(record: &FinalRecord) -> String {
    let mut summary = String::new();
    if let Some(name) = &record.name.canonical {
        summary.push_str(&format!("Name: {}\n", name));
    }
    if let Some(description) = &record.description.canonical {
        summary.push_str(&format!("Description: {}\n", description));
    }
    if let Some(cuisines) = &record.cuisines.canonical {
        summary.push_str(&format!("Cuisine: {}\n", cuisines.join(", ")));
    }
    if let Some(price_range) = &record.price_range.canonical {
        summary.push_str(&format!("Price range: {}\n", price_range));
    }
    if let Some(rating) = record.rating.canonical {
        let reviews = record
            .review_count
            .canonical
            .map(|c| format!(" ({} reviews)", c))
            .unwrap_or_default();
        summary.push_str(&format!("Rating: {}{}\n", rating, reviews));
    }
    if let Some(hours) = &record.hours.canonical {
        summary.push_str(&format!("Hours:\n{}\n", hours));
    }
    if !record.menu_items.is_empty() {
        let sample: Vec<&str> = record
            .menu_items
            .iter()
            .take(10)
            .map(|i| i.name.as_str())
            .collect();
        summary.push_str(&format!(
            "Menu: {} items, including {}\n",
            record.menu_items.len(),
            sample.join(", ")
        ));
    }
    if let Some(social) = &record.social.canonical {
        let platforms: Vec<&str> = social.platforms.keys().map(String::as_str).collect();
        summary.push_str(&format!("Social presence: {}\n", platforms.join(", ")));
    }
    summary
}

impl StrategicAnalyzer {
    pub fn new(
        text: Arc<dyn TextModel>,
        vision: Arc<dyn VisionModel>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            text,
            vision,
            store,
        }
    }

    /// # NDOC
    /// component: `strategy`
    /// purpose: Multi-stage analysis: per-screenshot impressions, target
    ///   deep-dive, competitor snapshots, then a schema-validated synthesis.
    pub async fn analyze(
        &self,
        record: &FinalRecord,
        cancel: &CancellationToken,
    ) -> AnalysisOutcome {
        let mut outcome = AnalysisOutcome::default();

        let impressions = self.screenshot_impressions(record, cancel, &mut outcome).await;
        if cancel.is_cancelled() {
            outcome.errors.push("analysis cancelled".to_string());
            return outcome;
        }
        let deep_dive = self.target_deep_dive(record, &mut outcome).await;
        let snapshots = self.competitor_snapshots(record, cancel, &mut outcome).await;
        if cancel.is_cancelled() {
            outcome.errors.push("analysis cancelled".to_string());
            return outcome;
        }
        let mut synthesis_cost = 0.0;
        let synthesis = self
            .synthesize(record, &impressions, deep_dive.as_ref(), &snapshots, &mut synthesis_cost)
            .await;
        outcome.cost_usd += synthesis_cost;
        match synthesis {
            Ok(analysis) => outcome.analysis = Some(analysis),
            Err(message) => outcome.errors.push(message),
        }
        outcome
    }

    async fn screenshot_impressions(
        &self,
        record: &FinalRecord,
        cancel: &CancellationToken,
        outcome: &mut AnalysisOutcome,
    ) -> Vec<ScreenshotImpression> {
        let mut impressions = Vec::new();
        let screenshots = record
            .artifacts
            .iter()
            .filter(|a| a.media_kind == MediaKind::ImagePng)
            .take(MAX_SCREENSHOTS);
        for artifact in screenshots {
            if cancel.is_cancelled() {
                break;
            }
            let bytes = match self.store.get(&artifact.uri).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    outcome.errors.push(format!("{}: {}", artifact.uri, err.message));
                    continue;
                }
            };
            let request = VisionRequest {
                prompt: "Assess this restaurant web page screenshot for marketing strength. \
                         Respond with strict JSON: {\"impressions\": [\"...\"], \
                         \"extracted_facts\": [\"...\"]}"
                    .to_string(),
                images: vec![EncodedImage {
                    media_type: "image/png".to_string(),
                    base64_data: BASE64.encode(&bytes),
                }],
                max_tokens: STAGE_MAX_TOKENS,
            };
            match complete_vision_json::<ImpressionResponse>(self.vision.as_ref(), request).await {
                Ok(response) => {
                    outcome.cost_usd += response.cost_usd;
                    impressions.push(ScreenshotImpression {
                        artifact_uri: artifact.uri.clone(),
                        impressions: response.value.impressions,
                        extracted_facts: response.value.extracted_facts,
                    });
                }
                Err(failure) => {
                    outcome.cost_usd += failure.cost_usd;
                    outcome
                        .errors
                        .push(format!("{}: {}", artifact.uri, failure.error.message));
                }
            }
        }
        impressions
    }

    async fn target_deep_dive(
        &self,
        record: &FinalRecord,
        outcome: &mut AnalysisOutcome,
    ) -> Option<TargetDeepDive> {
        let prompt = format!(
            "Analyze this restaurant's market position.\n{}\nRespond with strict JSON: \
             {{\"strengths\": [\"...\"], \"weaknesses\": [\"...\"], \"positioning\": \"...\"}}",
            record_summary(record)
        );
        match complete_text_json::<DeepDiveResponse>(self.text.as_ref(), &prompt, STAGE_MAX_TOKENS)
            .await
        {
            Ok(response) => {
                outcome.cost_usd += response.cost_usd;
                Some(TargetDeepDive {
                    strengths: response.value.strengths,
                    weaknesses: response.value.weaknesses,
                    positioning: response.value.positioning,
                })
            }
            Err(failure) => {
                outcome.cost_usd += failure.cost_usd;
                outcome.errors.push(format!("deep dive: {}", failure.error.message));
                None
            }
        }
    }

    async fn competitor_snapshots(
        &self,
        record: &FinalRecord,
        cancel: &CancellationToken,
        outcome: &mut AnalysisOutcome,
    ) -> Vec<CompetitorSnapshot> {
        let mut snapshots = Vec::new();
        for competitor in record.competitors.iter().take(MAX_COMPETITOR_SNAPSHOTS) {
            if cancel.is_cancelled() {
                break;
            }
            let prompt = format!(
                "Summarize strengths and weaknesses of this competitor restaurant from directory \
                 data alone: name {}, rating {:?}, reviews {:?}, address {:?}. Respond with strict \
                 JSON: {{\"strengths\": [\"...\"], \"weaknesses\": [\"...\"]}}",
                competitor.name, competitor.rating, competitor.review_count, competitor.address_raw
            );
            match complete_text_json::<SnapshotResponse>(self.text.as_ref(), &prompt, STAGE_MAX_TOKENS)
                .await
            {
                Ok(response) => {
                    outcome.cost_usd += response.cost_usd;
                    snapshots.push(CompetitorSnapshot {
                        competitor_name: competitor.name.clone(),
                        strengths: response.value.strengths,
                        weaknesses: response.value.weaknesses,
                    });
                }
                Err(failure) => {
                    outcome.cost_usd += failure.cost_usd;
                    outcome
                        .errors
                        .push(format!("competitor {}: {}", competitor.name, failure.error.message));
                }
            }
        }
        snapshots
    }

    /// Grand synthesis with the fixed section schema. One narrower repair
    /// attempt on schema violation, then "analysis unavailable".
    async fn synthesize(
        &self,
        record: &FinalRecord,
        impressions: &[ScreenshotImpression],
        deep_dive: Option<&TargetDeepDive>,
        snapshots: &[CompetitorSnapshot],
        cost_usd: &mut f64,
    ) -> Result<StrategicAnalysis, String> {
        let schema_line = "{\"executive_hook\": \"...\", \"competitive_landscape\": \"...\", \
                           \"top_opportunities\": [\"...\"], \"action_items\": [\"...\"], \
                           \"premium_teasers\": [\"...\"], \"forward_looking_insights\": [\"...\"]}";
        let context = format!(
            "Record:\n{}\nScreenshot impressions: {}\nDeep dive: {}\nCompetitor snapshots: {}",
            record_summary(record),
            serde_json::to_string(impressions).unwrap_or_default(),
            deep_dive
                .map(|d| serde_json::to_string(d).unwrap_or_default())
                .unwrap_or_else(|| "none".to_string()),
            serde_json::to_string(snapshots).unwrap_or_default(),
        );
        let prompt = format!(
            "Produce a strategic business analysis for this restaurant.\n{}\nRespond with strict \
             JSON exactly matching: {}",
            context, schema_line
        );

        match self.single_synthesis_call(&prompt, cost_usd).await {
            Ok(analysis) => return Ok(analysis),
            Err(first_error) => {
                log::warn!(target: "strategy", "synthesis failed, repairing: {}", first_error);
            }
        }
        // Narrower repair prompt: schema only, no free-form context.
        let repair_prompt = format!(
            "Return ONLY a JSON object with exactly these keys and no prose: {}\n\
             Base it on: {}",
            schema_line,
            record_summary(record)
        );
        self.single_synthesis_call(&repair_prompt, cost_usd)
            .await
            .map_err(|e| format!("analysis unavailable: {}", e))
    }

    async fn single_synthesis_call(
        &self,
        prompt: &str,
        cost_usd: &mut f64,
    ) -> Result<StrategicAnalysis, String> {
        let raw = self
            .text
            .complete(TextRequest {
                prompt: prompt.to_string(),
                json_mode: true,
                max_tokens: SYNTHESIS_MAX_TOKENS,
            })
            .await
            .map_err(|e| e.message)?;
        *cost_usd += self.text.cost_per_call_usd();
        parse_llm_json::<StrategicAnalysis>(&raw).map_err(|e| e.message)
    }
}
