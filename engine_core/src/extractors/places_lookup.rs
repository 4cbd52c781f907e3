use crate::capabilities::places::{PlaceId, PlacesDirectory};
use crate::capabilities::Clock;
use crate::contracts::ExtractResult;
use crate::data_models::competitor::CompetitorSummary;
use crate::data_models::record::{Observations, RawField, SourceTag};
use std::sync::Arc;

const PLACES_CONFIDENCE: f64 = 0.95;
const COST_PER_PLACES_CALL_USD: f64 = 0.017;
const NEARBY_RADIUS_M: u32 = 2_000;
const MAX_COMPETITORS: usize = 8;

const DETAIL_FIELDS: [&str; 10] = [
    "name",
    "formatted_address",
    "international_phone_number",
    "website",
    "rating",
    "user_ratings_total",
    "opening_hours",
    "price_level",
    "geometry",
    "reviews",
];

/// # NDOC
/// component: `extractors::places_lookup`
/// purpose: Phase-1 places pass: directory lookup, detail mapping, and a
///   bounded nearby-competitor sweep.
#[derive(Debug, Default)]
pub struct PlacesExtraction {
    pub observations: Observations,
    pub place_found: bool,
    pub cost_usd: f64,
}

fn price_level_to_range(level: u8) -> String {
    "$".repeat(usize::from(level.clamp(1, 4)))
}

/// # NDOC
/// component: `extractors::places_lookup`
/// purpose: Run the full places pass. Quota and transient failures propagate
///   to the orchestrator, which records them as phase-partial.
pub async fn extract_places(
    places: &dyn PlacesDirectory,
    query: &str,
    clock: &Arc<dyn Clock>,
) -> ExtractResult<PlacesExtraction> {
    let mut extraction = PlacesExtraction::default();

    extraction.cost_usd += COST_PER_PLACES_CALL_USD;
    let Some(place_id) = places.lookup(query).await? else {
        log::info!(target: "places", query = query; "no directory match");
        return Ok(extraction);
    };
    extraction.place_found = true;

    extraction.cost_usd += COST_PER_PLACES_CALL_USD;
    let details = places.details(&place_id, &DETAIL_FIELDS).await?;

    let observed_at = clock.now();
    let obs = &mut extraction.observations;
    let field = |v: String| RawField::new(v, SourceTag::Places, PLACES_CONFIDENCE, observed_at);

    if let Some(name) = details.name.clone() {
        obs.name.push(field(name));
    }
    if let Some(address) = details.formatted_address.clone() {
        obs.address.push(field(address));
    }
    if let Some(phone) = details.phone.clone() {
        obs.phones.push(field(phone));
    }
    if let Some(website) = details.website.clone() {
        obs.website.push(field(website));
    }
    if let Some(rating) = details.rating {
        obs.rating
            .push(RawField::new(rating, SourceTag::Places, PLACES_CONFIDENCE, observed_at));
    }
    if let Some(count) = details.review_count {
        obs.review_count
            .push(RawField::new(count, SourceTag::Places, PLACES_CONFIDENCE, observed_at));
    }
    if !details.hours.is_empty() {
        obs.hours.push(field(details.hours.join("\n")));
    }
    if let Some(level) = details.price_level {
        obs.price_range.push(field(price_level_to_range(level)));
    }
    if let Some(geo) = details.geo {
        obs.geo
            .push(RawField::new(geo, SourceTag::Places, PLACES_CONFIDENCE, observed_at));
    }
    // Review snippets feed the description synthesis later, as about-page
    // style context.
    for snippet in details.review_snippets.iter().take(3) {
        obs.about_text.push(RawField::new(
            snippet.clone(),
            SourceTag::Places,
            PLACES_CONFIDENCE * 0.6,
            observed_at,
        ));
    }

    extraction.cost_usd += COST_PER_PLACES_CALL_USD;
    let competitors = places
        .nearby(&place_id, NEARBY_RADIUS_M, "restaurant")
        .await?;
    let own_name = details.name.as_deref().unwrap_or("").to_lowercase();
    obs.competitors = competitors
        .into_iter()
        .filter(|c| c.name.to_lowercase() != own_name)
        .take(MAX_COMPETITORS)
        .map(|c| CompetitorSummary {
            name: c.name,
            url: c.website,
            address_raw: c.address,
            rating: c.rating,
            review_count: c.review_count,
            distance_km: c.distance_km,
        })
        .collect();

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::places::{CandidateCompetitor, PlaceDetails};
    use crate::capabilities::FixedClock;
    use crate::contracts::ExtractError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct ScriptedPlaces {
        details: PlaceDetails,
        competitors: Vec<CandidateCompetitor>,
        quota_on_lookup: bool,
    }

    #[async_trait]
    impl PlacesDirectory for ScriptedPlaces {
        async fn lookup(&self, _query: &str) -> ExtractResult<Option<PlaceId>> {
            if self.quota_on_lookup {
                return Err(ExtractError::quota("places quota exhausted"));
            }
            Ok(Some(PlaceId("pid".to_string())))
        }

        async fn details(&self, _place: &PlaceId, _fields: &[&str]) -> ExtractResult<PlaceDetails> {
            Ok(self.details.clone())
        }

        async fn nearby(
            &self,
            _place: &PlaceId,
            _radius_m: u32,
            _keyword: &str,
        ) -> ExtractResult<Vec<CandidateCompetitor>> {
            Ok(self.competitors.clone())
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn maps_details_into_places_tagged_observations() {
        let places = ScriptedPlaces {
            details: PlaceDetails {
                name: Some("Example Bistro".to_string()),
                formatted_address: Some("123 Main St, San Francisco, CA 94105, USA".to_string()),
                phone: Some("+1 415 555 0101".to_string()),
                website: Some("https://example-bistro.test".to_string()),
                rating: Some(4.5),
                review_count: Some(312),
                hours: vec!["Monday: 11:00 AM – 10:00 PM".to_string()],
                price_level: Some(2),
                ..Default::default()
            },
            competitors: vec![
                CandidateCompetitor {
                    name: "Example Bistro".to_string(),
                    ..Default::default()
                },
                CandidateCompetitor {
                    name: "Rival Trattoria".to_string(),
                    rating: Some(4.2),
                    ..Default::default()
                },
            ],
            quota_on_lookup: false,
        };
        let extraction = extract_places(&places, "Example Bistro restaurant", &clock())
            .await
            .unwrap();
        let obs = &extraction.observations;
        assert!(extraction.place_found);
        assert_eq!(obs.name[0].value, "Example Bistro");
        assert_eq!(obs.name[0].source, SourceTag::Places);
        assert_eq!(obs.price_range[0].value, "$$");
        assert_eq!(obs.rating[0].value, 4.5);
        // The place itself never appears among its own competitors.
        assert_eq!(obs.competitors.len(), 1);
        assert_eq!(obs.competitors[0].name, "Rival Trattoria");
        assert!(extraction.cost_usd > 0.05);
    }

    #[tokio::test]
    async fn quota_error_propagates_for_phase_partial_handling() {
        let places = ScriptedPlaces {
            details: PlaceDetails::default(),
            competitors: Vec::new(),
            quota_on_lookup: true,
        };
        let err = extract_places(&places, "anything", &clock())
            .await
            .expect_err("must fail");
        assert_eq!(err.kind, crate::contracts::ExtractErrorKind::QuotaError);
    }
}
