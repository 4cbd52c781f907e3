use crate::contracts::{ExtractError, ExtractResult};
use crate::data_models::record::GeoPoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Minimum wait before a pagination token may be reused.
const PAGE_TOKEN_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceId(pub String);

/// # NDOC
/// component: `capabilities::places`
/// purpose: Directory record for one place; fields absent from the response
///   stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceDetails {
    pub name: Option<String>,
    pub formatted_address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    /// One line per weekday, as the directory formats them.
    pub hours: Vec<String>,
    pub price_level: Option<u8>,
    pub photo_refs: Vec<String>,
    pub review_snippets: Vec<String>,
    pub geo: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateCompetitor {
    pub name: String,
    pub address: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub distance_km: Option<f64>,
}

/// # NDOC
/// component: `capabilities::places`
/// purpose: Read-only places directory capability.
/// invariants:
///   - Quota exhaustion surfaces as `ExtractError::quota`, which the
///     orchestrator treats as phase-partial, not fatal.
#[async_trait]
pub trait PlacesDirectory: Send + Sync {
    async fn lookup(&self, query: &str) -> ExtractResult<Option<PlaceId>>;
    async fn details(&self, place: &PlaceId, fields: &[&str]) -> ExtractResult<PlaceDetails>;
    async fn nearby(
        &self,
        place: &PlaceId,
        radius_m: u32,
        keyword: &str,
    ) -> ExtractResult<Vec<CandidateCompetitor>>;
}

/// # NDOC
/// component: `capabilities::places`
/// purpose: HTTP implementation against a Places-style REST API.
/// invariants:
///   - Pagination tokens are not reused before a 2 s wait.
pub struct HttpPlacesClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    last_page_fetch: Mutex<Option<Instant>>,
}

impl HttpPlacesClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self::with_base_url(http, api_key, "https://maps.googleapis.com/maps/api/place")
    }

    pub fn with_base_url(
        http: reqwest::Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
            last_page_fetch: Mutex::new(None),
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> ExtractResult<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExtractError::quota("places directory rate limit"));
        }
        if !status.is_success() {
            return Err(ExtractError::new(
                crate::contracts::ExtractErrorKind::TransientExternalError,
                format!("places request to {} returned {}", path, status),
                status.is_server_error(),
                None,
            ));
        }
        let body: Value = response.json().await?;
        match body["status"].as_str() {
            Some("OK") | Some("ZERO_RESULTS") | None => Ok(body),
            Some("OVER_QUERY_LIMIT") | Some("RESOURCE_EXHAUSTED") => {
                Err(ExtractError::quota("places directory quota exhausted"))
            }
            Some(other) => Err(ExtractError::transient(format!(
                "places request to {} failed with status {}",
                path, other
            ))),
        }
    }

    async fn wait_for_page_token(&self) {
        let mut last = self.last_page_fetch.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < PAGE_TOKEN_WAIT {
                sleep(PAGE_TOKEN_WAIT - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn parse_competitor(value: &Value) -> Option<CandidateCompetitor> {
    let name = value["name"].as_str()?.to_string();
    Some(CandidateCompetitor {
        name,
        address: value["vicinity"]
            .as_str()
            .or_else(|| value["formatted_address"].as_str())
            .map(str::to_string),
        website: value["website"].as_str().map(str::to_string),
        rating: value["rating"].as_f64(),
        review_count: value["user_ratings_total"].as_u64(),
        distance_km: None,
    })
}

#[async_trait]
impl PlacesDirectory for HttpPlacesClient {
    async fn lookup(&self, query: &str) -> ExtractResult<Option<PlaceId>> {
        let body = self
            .get_json(
                "findplacefromtext/json",
                &[("input", query), ("inputtype", "textquery"), ("fields", "place_id")],
            )
            .await?;
        Ok(body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c["place_id"].as_str())
            .map(|id| PlaceId(id.to_string())))
    }

    async fn details(&self, place: &PlaceId, fields: &[&str]) -> ExtractResult<PlaceDetails> {
        let fields_param = fields.join(",");
        let body = self
            .get_json(
                "details/json",
                &[("place_id", place.0.as_str()), ("fields", fields_param.as_str())],
            )
            .await?;
        let result = &body["result"];
        Ok(PlaceDetails {
            name: result["name"].as_str().map(str::to_string),
            formatted_address: result["formatted_address"].as_str().map(str::to_string),
            phone: result["international_phone_number"]
                .as_str()
                .or_else(|| result["formatted_phone_number"].as_str())
                .map(str::to_string),
            website: result["website"].as_str().map(str::to_string),
            rating: result["rating"].as_f64(),
            review_count: result["user_ratings_total"].as_u64(),
            hours: result["opening_hours"]["weekday_text"]
                .as_array()
                .map(|lines| {
                    lines
                        .iter()
                        .filter_map(|l| l.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            price_level: result["price_level"].as_u64().map(|p| p as u8),
            photo_refs: result["photos"]
                .as_array()
                .map(|photos| {
                    photos
                        .iter()
                        .filter_map(|p| p["photo_reference"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            review_snippets: result["reviews"]
                .as_array()
                .map(|reviews| {
                    reviews
                        .iter()
                        .filter_map(|r| r["text"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            geo: result["geometry"]["location"]["lat"]
                .as_f64()
                .zip(result["geometry"]["location"]["lng"].as_f64())
                .map(|(lat, lon)| GeoPoint { lat, lon }),
        })
    }

    async fn nearby(
        &self,
        place: &PlaceId,
        radius_m: u32,
        keyword: &str,
    ) -> ExtractResult<Vec<CandidateCompetitor>> {
        let details = self.details(place, &["geometry"]).await?;
        let Some(geo) = details.geo else {
            return Ok(Vec::new());
        };
        let location = format!("{},{}", geo.lat, geo.lon);
        let radius = radius_m.to_string();
        let mut body = self
            .get_json(
                "nearbysearch/json",
                &[
                    ("location", location.as_str()),
                    ("radius", radius.as_str()),
                    ("keyword", keyword),
                ],
            )
            .await?;

        let mut out: Vec<CandidateCompetitor> = Vec::new();
        loop {
            if let Some(results) = body["results"].as_array() {
                out.extend(results.iter().filter_map(parse_competitor));
            }
            let Some(token) = body["next_page_token"].as_str().map(str::to_string) else {
                break;
            };
            if out.len() >= 60 {
                break;
            }
            self.wait_for_page_token().await;
            body = self
                .get_json("nearbysearch/json", &[("pagetoken", token.as_str())])
                .await?;
        }
        Ok(out)
    }
}
