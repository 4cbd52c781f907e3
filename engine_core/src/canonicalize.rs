use crate::capabilities::llm::TextModel;
use crate::capabilities::Clock;
use crate::data_models::contact::{Address, Phone, SocialLink, SocialLinks, StructuredAddress};
use crate::data_models::menu::{MenuItem, MENU_CATEGORIES};
use crate::data_models::record::{CanonicalField, FinalRecord, Observations, RawField, SourceTag};
use crate::llm_json::complete_text_json;
use crate::utils::logger::log_llm_accounting;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

const CANONICALIZER_CONFIDENCE: f64 = 0.4;
const LLM_MAX_TOKENS: u32 = 512;
const ABOUT_CONTEXT_CHAR_CAP: usize = 2_000;

static NUMERIC_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d{1,2})?").expect("static regex"));
static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:ext\.?|x)\s*(\d{1,6})\s*$").expect("static regex"));

/// # NDOC
/// component: `canonicalize`
/// purpose: Result of the canonicalization pass: the final record body plus
///   accounting for the LLM-assisted steps.
pub struct CanonicalizationOutcome {
    pub record: FinalRecord,
    pub cost_usd: f64,
    /// Terminal LLM contract failures, already downgraded to empty canonicals.
    pub parse_failures: Vec<String>,
}

pub struct Canonicalizer {
    llm: Arc<dyn TextModel>,
    clock: Arc<dyn Clock>,
}

// --- LLM response schemas ---

#[derive(Debug, Deserialize)]
struct AddressParseResponse {
    #[serde(default)]
    street: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneParseResponse {
    #[serde(default)]
    e164: Option<String>,
    #[serde(default)]
    extension: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NameChoiceResponse {
    canonical_name: String,
}

#[derive(Debug, Deserialize)]
struct DescriptionResponse {
    description: String,
}

#[derive(Debug, Deserialize)]
struct CategorizeResponse {
    #[serde(default)]
    items: Vec<CategorizedItem>,
}

#[derive(Debug, Deserialize)]
struct CategorizedItem {
    name: String,
    category: String,
}

// --- rule-based helpers ---

/// Picks the observation to canonicalize from: highest source prior first,
/// then highest confidence, then earliest arrival. Deterministic given
/// identical inputs.
fn best_observation<'a, T>(fields: &'a [RawField<T>]) -> Option<&'a RawField<T>> {
    fields.iter().enumerate().max_by(|(ia, a), (ib, b)| {
        a.source
            .reliability_prior()
            .partial_cmp(&b.source.reliability_prior())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(ib.cmp(ia))
    })
    .map(|(_, f)| f)
}

fn squash_ws(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// URL canonical form: scheme ensured, host lowercased by the parser.
pub fn canonical_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let parsed = url::Url::parse(&with_scheme).ok()?;
    parsed.host_str()?;
    Some(parsed.to_string())
}

fn split_extension(raw: &str) -> (String, Option<String>) {
    if let Some(caps) = EXTENSION_RE.captures(raw) {
        let ext = caps[1].to_string();
        let main = raw[..caps.get(0).expect("match").start()].to_string();
        (main, Some(ext))
    } else {
        (raw.to_string(), None)
    }
}

/// Digit-rule phone canonicalization: 10 digits is US-local, 11 with a
/// leading 1 is US, an explicit `+` is kept when it validates.
pub fn rule_based_e164(raw: &str) -> Option<Phone> {
    let (main, extension) = split_extension(raw);
    let digits: String = main.chars().filter(|c| c.is_ascii_digit()).collect();
    let candidate = if main.trim_start().starts_with('+') {
        format!("+{}", digits)
    } else {
        match digits.len() {
            10 => format!("+1{}", digits),
            11 if digits.starts_with('1') => format!("+{}", digits),
            _ => return None,
        }
    };
    Phone::is_valid_e164(&candidate).then(|| Phone {
        raw: raw.to_string(),
        e164: Some(candidate),
        extension,
    })
}

/// First numeric run in a raw price string, parsed exactly.
pub fn price_from_raw(price_raw: &str) -> Option<f64> {
    let run = NUMERIC_RUN_RE.find(price_raw)?;
    let normalized = run.as_str().replace(',', ".");
    Decimal::from_str(&normalized).ok()?.to_f64().filter(|p| *p >= 0.0)
}

fn currency_from_raw(price_raw: &str) -> Option<String> {
    if price_raw.contains('$') {
        Some("USD".to_string())
    } else if price_raw.contains('€') {
        Some("EUR".to_string())
    } else if price_raw.contains('£') {
        Some("GBP".to_string())
    } else {
        None
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Canonicalizer {
    pub fn new(llm: Arc<dyn TextModel>, clock: Arc<dyn Clock>) -> Self {
        Self { llm, clock }
    }

    /// One LLM-assisted step under the strict-JSON contract. Accounting is
    /// logged either way; terminal failures downgrade to `None` with the
    /// purpose recorded so the canonical value stays empty.
    async fn assisted<T: DeserializeOwned>(
        &self,
        purpose: &str,
        prompt: &str,
        max_tokens: u32,
        cost_usd: &mut f64,
        parse_failures: &mut Vec<String>,
    ) -> Option<T> {
        match complete_text_json::<T>(self.llm.as_ref(), prompt, max_tokens).await {
            Ok(response) => {
                *cost_usd += response.cost_usd;
                log_llm_accounting("canonicalize", purpose, response.attempts, response.cost_usd);
                Some(response.value)
            }
            Err(failure) => {
                *cost_usd += failure.cost_usd;
                log_llm_accounting("canonicalize", purpose, failure.attempts, failure.cost_usd);
                parse_failures.push(format!("{}: {}", purpose, failure.error.message));
                None
            }
        }
    }

    /// # NDOC
    /// component: `canonicalize`
    /// purpose: Reduce the observation lists to one canonical value per
    ///   attribute. Rule-based first; the LLM is consulted only for cases the
    ///   rules cannot settle and only when the raw field is present. Terminal
    ///   LLM failures leave the canonical empty with the raws preserved.
    /// invariants:
    ///   - Raw observation lists are carried into the final record unchanged.
    ///   - Menu items are unique by normalized name.
    pub async fn canonicalize(
        &self,
        target_url: &str,
        evidence: &Observations,
    ) -> CanonicalizationOutcome {
        let mut cost_usd = 0.0;
        let mut parse_failures: Vec<String> = Vec::new();

        let name = self
            .canonical_name(evidence, &mut cost_usd, &mut parse_failures)
            .await;
        let description = self
            .canonical_description(evidence, name.canonical.as_deref(), &mut cost_usd, &mut parse_failures)
            .await;
        let website = canonical_simple(&evidence.website, |raw| canonical_url(raw));
        let phone = self
            .canonical_phone(evidence, &mut cost_usd, &mut parse_failures)
            .await;
        let emails = canonical_emails(&evidence.emails);
        let address = self
            .canonical_address(evidence, &mut cost_usd, &mut parse_failures)
            .await;
        let hours = canonical_simple(&evidence.hours, |raw| {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });
        let cuisines = canonical_cuisines(&evidence.cuisines);
        let price_range = canonical_simple(&evidence.price_range, |raw| {
            let squashed = squash_ws(raw);
            (!squashed.is_empty()).then_some(squashed)
        });
        let rating = CanonicalField {
            canonical: best_observation(&evidence.rating).map(|f| f.value),
            observations: evidence.rating.clone(),
        };
        let review_count = CanonicalField {
            canonical: best_observation(&evidence.review_count).map(|f| f.value),
            observations: evidence.review_count.clone(),
        };
        let geo = CanonicalField {
            canonical: best_observation(&evidence.geo).map(|f| f.value),
            observations: evidence.geo.clone(),
        };
        let social = canonical_social(&evidence.social);
        let menu_items = self
            .canonical_menu_items(evidence, &mut cost_usd, &mut parse_failures)
            .await;

        let record = FinalRecord {
            target_url: target_url.to_string(),
            name,
            description,
            website,
            phone,
            emails,
            address,
            hours,
            cuisines,
            price_range,
            rating,
            review_count,
            geo,
            social,
            menu_items,
            competitors: evidence.competitors.clone(),
            artifacts: evidence.artifacts.clone(),
            extraction_metadata: crate::data_models::record::ExtractionMetadata {
                run_id: String::new(),
                started_at: self.clock.now(),
                completed_at: self.clock.now(),
                total_duration_s: 0.0,
                total_cost: 0.0,
                phases_completed: Vec::new(),
                per_phase: Vec::new(),
                final_quality_score: 0.0,
                overall_status: crate::data_models::record::OverallStatus::Partial,
                error_message: None,
                phase_errors: Vec::new(),
                cancelled: false,
            },
        };

        CanonicalizationOutcome {
            record,
            cost_usd,
            parse_failures,
        }
    }

    async fn canonical_name(
        &self,
        evidence: &Observations,
        cost_usd: &mut f64,
        parse_failures: &mut Vec<String>,
    ) -> CanonicalField<String> {
        let observations = evidence.name.clone();
        let mut variants: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for obs in &observations {
            let squashed = squash_ws(&obs.value);
            if seen.insert(squashed.to_lowercase()) {
                variants.push(squashed);
            }
        }
        let canonical = match variants.len() {
            0 => None,
            1 => Some(variants.remove(0)),
            _ => {
                // Multiple distinct variants is the ambiguous case.
                let prompt = format!(
                    "These name variants were observed for one restaurant: {:?}. \
                     Pick the best canonical business name. Respond with strict JSON: \
                     {{\"canonical_name\": \"...\"}}",
                    variants
                );
                match self
                    .assisted::<NameChoiceResponse>(
                        "name_selection",
                        &prompt,
                        LLM_MAX_TOKENS,
                        cost_usd,
                        parse_failures,
                    )
                    .await
                {
                    Some(choice) => Some(squash_ws(&choice.canonical_name)),
                    // Fall back to the most reliable observation.
                    None => best_observation(&observations).map(|f| squash_ws(&f.value)),
                }
            }
        };
        CanonicalField {
            canonical,
            observations,
        }
    }

    async fn canonical_description(
        &self,
        evidence: &Observations,
        name: Option<&str>,
        cost_usd: &mut f64,
        parse_failures: &mut Vec<String>,
    ) -> CanonicalField<String> {
        let mut field = CanonicalField {
            canonical: best_observation(&evidence.description).map(|f| f.value.trim().to_string()),
            observations: evidence.description.clone(),
        };
        if field.canonical.as_deref().map_or(false, |d| !d.is_empty()) {
            return field;
        }
        field.canonical = None;

        // Synthesis only runs when there is page text to synthesize from.
        let mut context = String::new();
        for obs in evidence.about_text.iter().chain(evidence.menu_text.iter()) {
            if context.len() >= ABOUT_CONTEXT_CHAR_CAP {
                break;
            }
            context.push_str(obs.value.trim());
            context.push('\n');
        }
        if context.trim().is_empty() {
            return field;
        }
        context.truncate(ABOUT_CONTEXT_CHAR_CAP);

        let prompt = format!(
            "Write a two-sentence business description for the restaurant {} based only on this \
             site text:\n{}\nRespond with strict JSON: {{\"description\": \"...\"}}",
            name.unwrap_or("below"),
            context
        );
        if let Some(synthesized) = self
            .assisted::<DescriptionResponse>(
                "description_synthesis",
                &prompt,
                LLM_MAX_TOKENS,
                cost_usd,
                parse_failures,
            )
            .await
        {
            let description = synthesized.description.trim().to_string();
            if !description.is_empty() {
                field.observations.push(RawField::new(
                    description.clone(),
                    SourceTag::Canonicalizer,
                    CANONICALIZER_CONFIDENCE,
                    self.clock.now(),
                ));
                field.canonical = Some(description);
            }
        }
        field
    }

    async fn canonical_phone(
        &self,
        evidence: &Observations,
        cost_usd: &mut f64,
        parse_failures: &mut Vec<String>,
    ) -> CanonicalField<Phone, String> {
        let observations = evidence.phones.clone();
        let Some(best) = best_observation(&observations) else {
            return CanonicalField::from_observations(observations);
        };
        if let Some(phone) = rule_based_e164(&best.value) {
            return CanonicalField {
                canonical: Some(phone),
                observations,
            };
        }
        // Rules failed; this is the ambiguous case for the LLM.
        let prompt = format!(
            "Convert this phone number to E.164: \"{}\". Respond with strict JSON: \
             {{\"e164\": \"+14155550101\", \"extension\": null}}. Use null when not derivable.",
            best.value
        );
        let canonical = self
            .assisted::<PhoneParseResponse>(
                "phone_e164",
                &prompt,
                LLM_MAX_TOKENS,
                cost_usd,
                parse_failures,
            )
            .await
            .and_then(|parsed| {
                let extension = parsed.extension;
                parsed
                    .e164
                    .filter(|e| Phone::is_valid_e164(e))
                    .map(|e164| Phone {
                        raw: best.value.clone(),
                        e164: Some(e164),
                        extension,
                    })
            });
        // Keep the raw form visible even when no E.164 was derivable.
        let canonical = canonical.or_else(|| {
            Some(Phone {
                raw: best.value.clone(),
                e164: None,
                extension: None,
            })
        });
        CanonicalField {
            canonical,
            observations,
        }
    }

    async fn canonical_address(
        &self,
        evidence: &Observations,
        cost_usd: &mut f64,
        parse_failures: &mut Vec<String>,
    ) -> CanonicalField<Address, String> {
        let observations = evidence.address.clone();
        let Some(best) = best_observation(&observations) else {
            return CanonicalField::from_observations(observations);
        };
        let raw = squash_ws(&best.value);

        // Markup already supplied structure: no LLM round trip needed.
        if let Some(components) = best_observation(&evidence.address_components) {
            let candidate = Address {
                raw: raw.clone(),
                structured: Some(components.value.clone()),
            };
            if candidate.structured_is_consistent() {
                return CanonicalField {
                    canonical: Some(candidate),
                    observations,
                };
            }
        }

        let prompt = format!(
            "Split this restaurant address into components: \"{}\". Respond with strict JSON: \
             {{\"street\": \"...\", \"city\": \"...\", \"region\": \"...\", \
             \"postal_code\": \"...\", \"country\": \"...\"}}. Use null for unknown parts and \
             copy text verbatim from the address.",
            raw
        );
        let structured = self
            .assisted::<AddressParseResponse>(
                "address_structuring",
                &prompt,
                LLM_MAX_TOKENS,
                cost_usd,
                parse_failures,
            )
            .await
            .map(|parsed| StructuredAddress {
                street: parsed.street,
                city: parsed.city,
                region: parsed.region,
                postal_code: parsed.postal_code,
                country: parsed.country,
            });

        let candidate = Address {
            raw: raw.clone(),
            structured,
        };
        // The structured breakdown must stay substring-consistent with the
        // raw string; otherwise only the raw form is kept.
        let canonical = if candidate.structured_is_consistent() {
            candidate
        } else {
            Address {
                raw,
                structured: None,
            }
        };
        CanonicalField {
            canonical: Some(canonical),
            observations,
        }
    }

    async fn canonical_menu_items(
        &self,
        evidence: &Observations,
        cost_usd: &mut f64,
        parse_failures: &mut Vec<String>,
    ) -> Vec<MenuItem> {
        let mut deduped = normalize_menu_items(&evidence.menu_items);

        let uncategorized: Vec<String> = deduped
            .iter()
            .filter(|i| i.category.is_none())
            .map(|i| i.name.clone())
            .collect();
        if uncategorized.is_empty() {
            return deduped;
        }

        let prompt = format!(
            "Assign each menu item one category from {:?}.\nItems: {:?}\nRespond with strict \
             JSON: {{\"items\": [{{\"name\": \"...\", \"category\": \"...\"}}]}}",
            MENU_CATEGORIES, uncategorized
        );
        if let Some(categorized) = self
            .assisted::<CategorizeResponse>(
                "menu_categorization",
                &prompt,
                2048,
                cost_usd,
                parse_failures,
            )
            .await
        {
            let assignments: BTreeMap<String, String> = categorized
                .items
                .into_iter()
                .filter(|i| MENU_CATEGORIES.contains(&i.category.as_str()))
                .map(|i| (squash_ws(&i.name).to_lowercase(), i.category))
                .collect();
            for item in &mut deduped {
                if item.category.is_none() {
                    item.category = assignments.get(&item.normalized_name()).cloned();
                }
            }
        }
        deduped
    }
}

// --- pure canonical reductions ---

/// Rule pass over menu items: name whitespace squashed, duplicates removed by
/// normalized name, numeric prices derived from the raw form and clamped
/// non-negative, currency inferred from the price symbol. Idempotent.
pub fn normalize_menu_items(items: &[MenuItem]) -> Vec<MenuItem> {
    let mut deduped: Vec<MenuItem> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for item in items {
        let mut item = item.clone();
        item.name = squash_ws(&item.name);
        if item.name.is_empty() || !seen.insert(item.normalized_name()) {
            continue;
        }
        if item.price_numeric.is_none() {
            if let Some(raw) = item.price_raw.as_deref() {
                item.price_numeric = price_from_raw(raw);
            }
        }
        if let Some(price) = item.price_numeric {
            item.price_numeric = Some(price.max(0.0));
        }
        if item.currency.is_none() {
            item.currency = item.price_raw.as_deref().and_then(currency_from_raw);
        }
        deduped.push(item);
    }
    deduped
}

fn canonical_simple<F>(fields: &[RawField<String>], normalize: F) -> CanonicalField<String>
where
    F: Fn(&str) -> Option<String>,
{
    CanonicalField {
        canonical: best_observation(fields).and_then(|f| normalize(&f.value)),
        observations: fields.to_vec(),
    }
}

fn canonical_emails(fields: &[RawField<String>]) -> CanonicalField<Vec<String>, String> {
    let emails: Vec<String> = fields
        .iter()
        .map(|obs| obs.value.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .unique()
        .collect();
    CanonicalField {
        canonical: (!emails.is_empty()).then_some(emails),
        observations: fields.to_vec(),
    }
}

fn canonical_cuisines(fields: &[RawField<String>]) -> CanonicalField<Vec<String>, String> {
    let cuisines: Vec<String> = fields
        .iter()
        .map(|obs| title_case(&squash_ws(&obs.value)))
        .filter(|cuisine| !cuisine.is_empty())
        .unique_by(|cuisine| cuisine.to_lowercase())
        .collect();
    CanonicalField {
        canonical: (!cuisines.is_empty()).then_some(cuisines),
        observations: fields.to_vec(),
    }
}

fn canonical_social(fields: &[RawField<SocialLink>]) -> CanonicalField<SocialLinks, SocialLink> {
    if fields.is_empty() {
        return CanonicalField::from_observations(Vec::new());
    }
    // Stable collapse order: source tag first, then arrival order.
    let mut ordered: Vec<(usize, &RawField<SocialLink>)> = fields.iter().enumerate().collect();
    ordered.sort_by_key(|(index, f)| (f.source, *index));
    let mut links = SocialLinks::default();
    for (_, obs) in ordered {
        let Some(url) = canonical_url(&obs.value.url) else {
            continue;
        };
        links.insert(&obs.value.platform, &url);
    }
    CanonicalField {
        canonical: (!links.is_empty()).then_some(links),
        observations: fields.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FixedClock;
    use crate::contracts::{ExtractError, ExtractResult};
    use crate::data_models::record::SourceTag;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct ScriptedText {
        responses: Mutex<Vec<ExtractResult<String>>>,
    }

    #[async_trait]
    impl TextModel for ScriptedText {
        async fn complete(
            &self,
            _request: crate::capabilities::llm::TextRequest,
        ) -> ExtractResult<String> {
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Err(ExtractError::internal("unexpected llm call"));
            }
            responses.remove(0)
        }
    }

    fn canonicalizer(responses: Vec<ExtractResult<String>>) -> Canonicalizer {
        Canonicalizer::new(
            Arc::new(ScriptedText {
                responses: Mutex::new(responses),
            }),
            Arc::new(FixedClock(
                chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            )),
        )
    }

    fn raw(value: &str, source: SourceTag) -> RawField<String> {
        RawField::new(
            value.to_string(),
            source,
            0.9,
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn phone_rules_cover_us_formats() {
        assert_eq!(
            rule_based_e164("(415) 555-0101").unwrap().e164.unwrap(),
            "+14155550101"
        );
        assert_eq!(
            rule_based_e164("1-415-555-0101").unwrap().e164.unwrap(),
            "+14155550101"
        );
        assert_eq!(
            rule_based_e164("+44 20 7946 0958").unwrap().e164.unwrap(),
            "+442079460958"
        );
        let with_ext = rule_based_e164("415 555 0101 ext 22").unwrap();
        assert_eq!(with_ext.e164.as_deref(), Some("+14155550101"));
        assert_eq!(with_ext.extension.as_deref(), Some("22"));
        assert!(rule_based_e164("call us").is_none());
        assert!(rule_based_e164("555-0101").is_none());
    }

    #[test]
    fn price_extraction_takes_first_numeric_run() {
        assert_eq!(price_from_raw("$14.99"), Some(14.99));
        assert_eq!(price_from_raw("14,99 €"), Some(14.99));
        assert_eq!(price_from_raw("two for $5 / $8"), Some(5.0));
        assert_eq!(price_from_raw("market price"), None);
    }

    #[test]
    fn url_canonicalization_adds_scheme_and_lowercases_host() {
        assert_eq!(
            canonical_url("EXAMPLE-Bistro.TEST/Menu").unwrap(),
            "https://example-bistro.test/Menu"
        );
        assert_eq!(
            canonical_url("http://Example.test").unwrap(),
            "http://example.test/"
        );
        assert!(canonical_url("").is_none());
    }

    #[tokio::test]
    async fn single_name_variant_needs_no_llm() {
        let mut evidence = Observations::default();
        evidence.name.push(raw("Example Bistro", SourceTag::Places));
        evidence.name.push(raw("example   bistro", SourceTag::Dom));
        let outcome = canonicalizer(vec![]).canonicalize("https://example-bistro.test", &evidence).await;
        assert_eq!(outcome.record.name.canonical.as_deref(), Some("Example Bistro"));
        assert_eq!(outcome.record.name.observations.len(), 2);
        assert_eq!(outcome.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn ambiguous_names_go_through_the_llm() {
        let mut evidence = Observations::default();
        evidence.name.push(raw("Example Bistro", SourceTag::Dom));
        evidence.name.push(raw("Example Bistro SF", SourceTag::Places));
        let outcome = canonicalizer(vec![Ok(
            r#"{"canonical_name": "Example Bistro"}"#.to_string()
        )])
        .canonicalize("https://example-bistro.test", &evidence)
        .await;
        assert_eq!(outcome.record.name.canonical.as_deref(), Some("Example Bistro"));
        assert!(outcome.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn llm_parse_failure_leaves_canonical_from_fallback_and_keeps_raws() {
        let mut evidence = Observations::default();
        evidence.phones.push(raw("phone: five five five", SourceTag::Dom));
        let outcome = canonicalizer(vec![
            Ok("not json".to_string()),
            Ok("still not".to_string()),
            Ok("nope".to_string()),
        ])
        .canonicalize("https://example-bistro.test", &evidence)
        .await;
        let phone = outcome.record.phone.canonical.unwrap();
        assert_eq!(phone.e164, None);
        assert_eq!(phone.raw, "phone: five five five");
        assert_eq!(outcome.record.phone.observations.len(), 1);
        assert_eq!(outcome.parse_failures.len(), 1);
    }

    #[tokio::test]
    async fn markup_supplied_address_structure_skips_the_llm() {
        let mut evidence = Observations::default();
        evidence
            .address
            .push(raw("123 Main St, San Francisco, CA 94105", SourceTag::SchemaOrg));
        evidence.address_components.push(RawField::new(
            StructuredAddress {
                street: Some("123 Main St".to_string()),
                city: Some("San Francisco".to_string()),
                region: Some("CA".to_string()),
                postal_code: Some("94105".to_string()),
                country: None,
            },
            SourceTag::SchemaOrg,
            0.9,
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let outcome = canonicalizer(vec![])
            .canonicalize("https://example-bistro.test", &evidence)
            .await;
        let address = outcome.record.address.canonical.unwrap();
        assert_eq!(
            address.structured.unwrap().city.as_deref(),
            Some("San Francisco")
        );
        assert_eq!(outcome.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn menu_items_dedupe_and_derive_numeric_prices() {
        let mut evidence = Observations::default();
        for (name, price) in [
            ("Margherita Pizza", "$14.99"),
            ("  margherita  PIZZA", "$14.99"),
            ("Tiramisu", "$9"),
        ] {
            evidence.menu_items.push(MenuItem {
                name: name.to_string(),
                description: None,
                price_raw: Some(price.to_string()),
                price_numeric: None,
                currency: None,
                category: None,
                source_tag: SourceTag::Dom,
                source_artifact: None,
            });
        }
        let outcome = canonicalizer(vec![Ok(r#"{"items": [
            {"name": "Margherita Pizza", "category": "main"},
            {"name": "Tiramisu", "category": "dessert"}
        ]}"#
        .to_string())])
        .canonicalize("https://example-bistro.test", &evidence)
        .await;
        assert_eq!(outcome.record.menu_items.len(), 2);
        let pizza = &outcome.record.menu_items[0];
        assert_eq!(pizza.name, "Margherita Pizza");
        assert_eq!(pizza.price_numeric, Some(14.99));
        assert_eq!(pizza.currency.as_deref(), Some("USD"));
        assert_eq!(pizza.category.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn social_links_collapse_first_wins_in_source_order() {
        let mut evidence = Observations::default();
        let at = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        evidence.social.push(RawField::new(
            SocialLink {
                platform: "instagram".to_string(),
                url: "https://instagram.com/from-dom".to_string(),
            },
            SourceTag::Dom,
            0.7,
            at,
        ));
        evidence.social.push(RawField::new(
            SocialLink {
                platform: "instagram".to_string(),
                url: "https://instagram.com/from-markup".to_string(),
            },
            SourceTag::SchemaOrg,
            0.9,
            at,
        ));
        let outcome = canonicalizer(vec![])
            .canonicalize("https://example-bistro.test", &evidence)
            .await;
        let social = outcome.record.social.canonical.unwrap();
        // SchemaOrg sorts before Dom, so the markup URL wins the platform slot.
        assert_eq!(
            social.platforms.get("instagram").map(String::as_str),
            Some("https://instagram.com/from-markup")
        );
        assert_eq!(social.other.len(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arbitrary_item() -> impl Strategy<Value = MenuItem> {
            (
                "[A-Za-z ]{0,24}",
                proptest::option::of("[$€£]?-?[0-9]{1,4}([.,][0-9]{2})?"),
                proptest::option::of(-100.0_f64..500.0),
            )
                .prop_map(|(name, price_raw, price_numeric)| MenuItem {
                    name,
                    description: None,
                    price_raw,
                    price_numeric,
                    currency: None,
                    category: None,
                    source_tag: SourceTag::Dom,
                    source_artifact: None,
                })
        }

        proptest! {
            #[test]
            fn menu_normalization_is_idempotent_with_unique_names(
                items in prop::collection::vec(arbitrary_item(), 0..30),
            ) {
                let once = normalize_menu_items(&items);
                let twice = normalize_menu_items(&once);
                prop_assert_eq!(&once, &twice);

                let mut names: Vec<String> = once.iter().map(|i| i.normalized_name()).collect();
                let before = names.len();
                names.sort();
                names.dedup();
                prop_assert_eq!(before, names.len());
                for item in &once {
                    if let Some(price) = item.price_numeric {
                        prop_assert!(price >= 0.0);
                    }
                }
            }

            #[test]
            fn derived_e164_always_validates(raw in ".{0,40}") {
                if let Some(phone) = rule_based_e164(&raw) {
                    prop_assert!(Phone::is_valid_e164(phone.e164.as_deref().unwrap_or("")));
                }
            }

            #[test]
            fn extracted_prices_are_never_negative(raw in ".{0,24}") {
                if let Some(price) = price_from_raw(&raw) {
                    prop_assert!(price >= 0.0);
                }
            }
        }
    }

    #[tokio::test]
    async fn description_synthesis_appends_canonicalizer_observation() {
        let mut evidence = Observations::default();
        evidence.name.push(raw("Example Bistro", SourceTag::Places));
        evidence.about_text.push(raw(
            "Family owned since 1998, serving wood-fired pizza and housemade pasta in the Mission.",
            SourceTag::Dom,
        ));
        let outcome = canonicalizer(vec![Ok(
            r#"{"description": "Family-owned bistro serving wood-fired pizza."}"#.to_string(),
        )])
        .canonicalize("https://example-bistro.test", &evidence)
        .await;
        assert_eq!(
            outcome.record.description.canonical.as_deref(),
            Some("Family-owned bistro serving wood-fired pizza.")
        );
        let last = outcome.record.description.observations.last().unwrap();
        assert_eq!(last.source, SourceTag::Canonicalizer);
    }
}
