use crate::artifact_store::{ArtifactMeta, ArtifactStore};
use crate::capabilities::agentic::{AgenticBrowser, AgenticTask};
use crate::capabilities::Clock;
use crate::config::SelectiveBrowsingLimits;
use crate::contracts::ExtractResult;
use crate::data_models::contact::{SocialLink, SOCIAL_PLATFORMS};
use crate::data_models::record::{MediaKind, Observations, PhaseId, RawField, SourceTag};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

const SELECTIVE_CONFIDENCE: f64 = 0.65;
const COST_PER_SESSION_USD: f64 = 0.05;
const COST_PER_PAGE_USD: f64 = 0.01;

/// # NDOC
/// component: `extractors::selective`
/// purpose: Result of the guided fallback. Fields the agent could not find
///   stay missing; nothing is fabricated on this path.
#[derive(Debug, Default)]
pub struct SelectiveOutcome {
    pub observations: Observations,
    pub fields_recovered: Vec<String>,
    pub pages_visited: usize,
    pub cost_usd: f64,
}

pub struct SelectiveBrowsingExtractor {
    agentic: Arc<dyn AgenticBrowser>,
    store: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    limits: SelectiveBrowsingLimits,
}

/// Builds the focused schema: a nested object of boolean leaves naming
/// exactly the requested dot-notation paths.
pub fn build_focused_schema(missing_fields: &[String]) -> Value {
    fn insert_path(map: &mut serde_json::Map<String, Value>, segments: &[&str]) {
        match segments {
            [] => {}
            [leaf] => {
                map.insert((*leaf).to_string(), json!(true));
            }
            [head, rest @ ..] => {
                let child = map
                    .entry((*head).to_string())
                    .or_insert_with(|| json!({}));
                if !child.is_object() {
                    *child = json!({});
                }
                insert_path(child.as_object_mut().expect("set to object above"), rest);
            }
        }
    }

    let mut root = serde_json::Map::new();
    for path in missing_fields {
        let segments: Vec<&str> = path.split('.').collect();
        insert_path(&mut root, &segments);
    }
    Value::Object(root)
}

impl SelectiveBrowsingExtractor {
    pub fn new(
        agentic: Arc<dyn AgenticBrowser>,
        store: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        limits: SelectiveBrowsingLimits,
    ) -> Self {
        Self {
            agentic,
            store,
            clock,
            limits,
        }
    }

    /// # NDOC
    /// component: `extractors::selective`
    /// purpose: Launch one guided browsing session scoped to the missing
    ///   critical fields, then map returned leaves into selective_llm-tagged
    ///   observations and store the consulted-page screenshots.
    pub async fn extract(
        &self,
        target: &Url,
        missing_fields: &[String],
        context_hints: BTreeMap<String, String>,
    ) -> ExtractResult<SelectiveOutcome> {
        let mut outcome = SelectiveOutcome::default();
        if missing_fields.is_empty() {
            return Ok(outcome);
        }

        let focused_schema = build_focused_schema(missing_fields);
        let instructions = format!(
            "Visit {} and fill ONLY the fields marked true in the schema. \
             Leave out anything you cannot verify on the site itself.",
            target
        );
        let task = AgenticTask {
            target_url: target.to_string(),
            instructions,
            focused_schema,
            context_hints,
            max_page_loads: self.limits.max_page_loads,
            max_wall_time_s: self.limits.max_wall_time_s,
        };

        let result = self.agentic.execute(task).await?;
        outcome.pages_visited = result.pages_visited;
        outcome.cost_usd = COST_PER_SESSION_USD + COST_PER_PAGE_USD * result.pages_visited as f64;

        let observed_at = self.clock.now();
        for (path, value) in result.field_values {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            if apply_field_value(&path, &value, observed_at, &mut outcome.observations) {
                outcome.fields_recovered.push(path);
            }
        }

        for screenshot in result.screenshots {
            let artifact = self
                .store
                .put(
                    &screenshot.png,
                    MediaKind::ImagePng,
                    ArtifactMeta {
                        source_phase: PhaseId::SelectiveBrowsing,
                        caption: Some(screenshot.caption),
                        captured_at: observed_at,
                        hint_path: None,
                    },
                )
                .await?;
            outcome.observations.artifacts.push(artifact);
        }

        log::info!(
            target: "selective",
            requested = missing_fields.len(),
            recovered = outcome.fields_recovered.len(),
            pages = outcome.pages_visited;
            "selective browsing complete"
        );
        Ok(outcome)
    }
}

/// Maps one returned schema leaf onto the observation lists. Unknown paths
/// are dropped rather than guessed at.
fn apply_field_value(
    path: &str,
    value: &str,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> bool {
    let tag = SourceTag::SelectiveLlm;
    let field = |v: &str| RawField::new(v.to_string(), tag, SELECTIVE_CONFIDENCE, observed_at);
    match path {
        "name" => observations.name.push(field(value)),
        "description" => observations.description.push(field(value)),
        "website" => observations.website.push(field(value)),
        "phone" => observations.phones.push(field(value)),
        "address" => observations.address.push(field(value)),
        "hours" => observations.hours.push(field(value)),
        "cuisine" | "cuisines" => observations.cuisines.push(field(value)),
        "price_range" => observations.price_range.push(field(value)),
        "email" | "emails" => observations.emails.push(field(value)),
        "rating" => match value.parse::<f64>() {
            Ok(rating) => observations
                .rating
                .push(RawField::new(rating, tag, SELECTIVE_CONFIDENCE, observed_at)),
            Err(_) => return false,
        },
        "review_count" => match value.parse::<u64>() {
            Ok(count) => observations.review_count.push(RawField::new(
                count,
                tag,
                SELECTIVE_CONFIDENCE,
                observed_at,
            )),
            Err(_) => return false,
        },
        _ => {
            if let Some(platform) = path.strip_prefix("social.") {
                if SOCIAL_PLATFORMS.contains(&platform) {
                    observations.social.push(RawField::new(
                        SocialLink {
                            platform: platform.to_string(),
                            url: value.to_string(),
                        },
                        tag,
                        SELECTIVE_CONFIDENCE,
                        observed_at,
                    ));
                    return true;
                }
            }
            return false;
        }
    }
    true
}
