use super::competitor::CompetitorSummary;
use super::contact::{Address, Phone, SocialLink, SocialLinks};
use super::menu::MenuItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// # NDOC
/// component: `data_models::record`
/// purpose: Identifies which component produced an observation.
/// invariants:
///   - Enum order is the deterministic merge order; canonicalization is
///     reproducible because same-phase results always merge in this order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Places,
    SchemaOrg,
    Sitemap,
    Dom,
    Vision,
    SelectiveLlm,
    Canonicalizer,
}

impl SourceTag {
    pub const ALL: [SourceTag; 7] = [
        SourceTag::Places,
        SourceTag::SchemaOrg,
        SourceTag::Sitemap,
        SourceTag::Dom,
        SourceTag::Vision,
        SourceTag::SelectiveLlm,
        SourceTag::Canonicalizer,
    ];

    /// Fixed reliability prior used by the quality assessor.
    pub fn reliability_prior(self) -> f64 {
        match self {
            SourceTag::Places => 0.95,
            SourceTag::SchemaOrg => 0.85,
            SourceTag::Sitemap => 0.70,
            SourceTag::Dom => 0.60,
            SourceTag::Vision => 0.75,
            SourceTag::SelectiveLlm => 0.65,
            SourceTag::Canonicalizer => 0.40,
        }
    }

    /// Heuristic sources score low on the confidence axis even when alone.
    pub fn is_heuristic(self) -> bool {
        matches!(self, SourceTag::Sitemap | SourceTag::Dom)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::Places => "places",
            SourceTag::SchemaOrg => "schema_org",
            SourceTag::Sitemap => "sitemap",
            SourceTag::Dom => "dom",
            SourceTag::Vision => "vision",
            SourceTag::SelectiveLlm => "selective_llm",
            SourceTag::Canonicalizer => "canonicalizer",
        }
    }
}

/// # NDOC
/// component: `data_models::record`
/// purpose: One observation of an attribute with provenance.
/// invariants:
///   - `confidence` lives in `[0, 1]`.
///   - Observations are append-only; merging never rewrites earlier entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawField<T> {
    pub value: T,
    pub source: SourceTag,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

impl<T> RawField<T> {
    pub fn new(value: T, source: SourceTag, confidence: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            source,
            confidence: confidence.clamp(0.0, 1.0),
            observed_at,
        }
    }
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Media kind of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    ImagePng,
    ApplicationPdf,
    TextHtml,
}

impl MediaKind {
    pub fn mime(self) -> &'static str {
        match self {
            MediaKind::ImagePng => "image/png",
            MediaKind::ApplicationPdf => "application/pdf",
            MediaKind::TextHtml => "text/html",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            MediaKind::ImagePng => "png",
            MediaKind::ApplicationPdf => "pdf",
            MediaKind::TextHtml => "html",
        }
    }
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Ordered pipeline phase identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Discovery,
    DomCrawl,
    Vision,
    SelectiveBrowsing,
}

impl PhaseId {
    pub const ALL: [PhaseId; 4] = [
        PhaseId::Discovery,
        PhaseId::DomCrawl,
        PhaseId::Vision,
        PhaseId::SelectiveBrowsing,
    ];

    pub fn index(self) -> u8 {
        match self {
            PhaseId::Discovery => 1,
            PhaseId::DomCrawl => 2,
            PhaseId::Vision => 3,
            PhaseId::SelectiveBrowsing => 4,
        }
    }
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Durable reference to a stored blob (screenshot, PDF, captured HTML).
/// invariants:
///   - `uri` resolves in the artifact store for the life of the pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub uri: String,
    pub media_kind: MediaKind,
    pub source_phase: PhaseId,
    #[serde(default)]
    pub caption: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Append-only evidence produced by extractors, merged field-wise
///   into the working record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observations {
    #[serde(default)]
    pub name: Vec<RawField<String>>,
    #[serde(default)]
    pub description: Vec<RawField<String>>,
    #[serde(default)]
    pub website: Vec<RawField<String>>,
    #[serde(default)]
    pub phones: Vec<RawField<String>>,
    #[serde(default)]
    pub emails: Vec<RawField<String>>,
    #[serde(default)]
    pub address: Vec<RawField<String>>,
    /// Structured address breakdowns observed directly (schema.org markup);
    /// spares the canonicalizer an LLM round trip when present.
    #[serde(default)]
    pub address_components: Vec<RawField<super::contact::StructuredAddress>>,
    #[serde(default)]
    pub hours: Vec<RawField<String>>,
    #[serde(default)]
    pub cuisines: Vec<RawField<String>>,
    #[serde(default)]
    pub price_range: Vec<RawField<String>>,
    #[serde(default)]
    pub rating: Vec<RawField<f64>>,
    #[serde(default)]
    pub review_count: Vec<RawField<u64>>,
    #[serde(default)]
    pub geo: Vec<RawField<GeoPoint>>,
    #[serde(default)]
    pub social: Vec<RawField<SocialLink>>,
    #[serde(default)]
    pub about_text: Vec<RawField<String>>,
    #[serde(default)]
    pub menu_text: Vec<RawField<String>>,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
    #[serde(default)]
    pub competitors: Vec<CompetitorSummary>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Raw rendered HTML keyed by normalized URL, for later LLM use.
    #[serde(default)]
    pub html_by_url: BTreeMap<String, String>,
}

impl Observations {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.description.is_empty()
            && self.website.is_empty()
            && self.phones.is_empty()
            && self.emails.is_empty()
            && self.address.is_empty()
            && self.address_components.is_empty()
            && self.hours.is_empty()
            && self.cuisines.is_empty()
            && self.price_range.is_empty()
            && self.rating.is_empty()
            && self.review_count.is_empty()
            && self.geo.is_empty()
            && self.social.is_empty()
            && self.about_text.is_empty()
            && self.menu_text.is_empty()
            && self.menu_items.is_empty()
            && self.competitors.is_empty()
            && self.artifacts.is_empty()
            && self.html_by_url.is_empty()
    }

    /// Field-wise append. Never overwrites; later evidence lands after
    /// earlier evidence in every list.
    pub fn merge(&mut self, other: Observations) {
        self.name.extend(other.name);
        self.description.extend(other.description);
        self.website.extend(other.website);
        self.phones.extend(other.phones);
        self.emails.extend(other.emails);
        self.address.extend(other.address);
        self.address_components.extend(other.address_components);
        self.hours.extend(other.hours);
        self.cuisines.extend(other.cuisines);
        self.price_range.extend(other.price_range);
        self.rating.extend(other.rating);
        self.review_count.extend(other.review_count);
        self.geo.extend(other.geo);
        self.social.extend(other.social);
        self.about_text.extend(other.about_text);
        self.menu_text.extend(other.menu_text);
        self.menu_items.extend(other.menu_items);
        self.competitors.extend(other.competitors);
        self.artifacts.extend(other.artifacts);
        for (url, html) in other.html_by_url {
            self.html_by_url.entry(url).or_insert(html);
        }
    }
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Mutable working record owned by the orchestrator for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialRecord {
    pub target_url: String,
    pub evidence: Observations,
    #[serde(default)]
    pub phases_completed: Vec<PhaseId>,
    #[serde(default)]
    pub running_cost: f64,
    #[serde(default)]
    pub running_quality: f64,
}

impl PartialRecord {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            ..Default::default()
        }
    }
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Canonical value for one attribute plus the preserved raw
///   observation list for audit.
/// invariants:
///   - A populated `canonical` implies at least one raw observation, except
///     for values synthesized by the canonicalizer (which append their own
///     canonicalizer-tagged observation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalField<C, R = C> {
    pub canonical: Option<C>,
    #[serde(default = "Vec::new")]
    pub observations: Vec<RawField<R>>,
}

impl<C, R> Default for CanonicalField<C, R> {
    fn default() -> Self {
        Self {
            canonical: None,
            observations: Vec::new(),
        }
    }
}

impl<C, R> CanonicalField<C, R> {
    pub fn from_observations(observations: Vec<RawField<R>>) -> Self {
        Self {
            canonical: None,
            observations,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.canonical.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Ok,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseError {
    pub phase: PhaseId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseLedgerEntry {
    pub phase: PhaseId,
    pub cost_usd: f64,
    pub duration_s: f64,
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Run accounting attached to every final record.
/// invariants:
///   - `total_cost` equals the sum of `per_phase.cost_usd`.
///   - Phases in `phases_completed` are strictly increasing, no repeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_s: f64,
    pub total_cost: f64,
    pub phases_completed: Vec<PhaseId>,
    pub per_phase: Vec<PhaseLedgerEntry>,
    pub final_quality_score: f64,
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub phase_errors: Vec<PhaseError>,
    #[serde(default)]
    pub cancelled: bool,
}

/// # NDOC
/// component: `data_models::record`
/// purpose: Canonicalized output of a run with full provenance retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecord {
    pub target_url: String,
    pub name: CanonicalField<String>,
    pub description: CanonicalField<String>,
    pub website: CanonicalField<String>,
    pub phone: CanonicalField<Phone, String>,
    pub emails: CanonicalField<Vec<String>, String>,
    pub address: CanonicalField<Address, String>,
    pub hours: CanonicalField<String>,
    pub cuisines: CanonicalField<Vec<String>, String>,
    pub price_range: CanonicalField<String>,
    pub rating: CanonicalField<f64>,
    pub review_count: CanonicalField<u64>,
    pub geo: CanonicalField<GeoPoint>,
    pub social: CanonicalField<SocialLinks, SocialLink>,
    pub menu_items: Vec<MenuItem>,
    pub competitors: Vec<CompetitorSummary>,
    pub artifacts: Vec<ArtifactRef>,
    pub extraction_metadata: ExtractionMetadata,
}

impl FinalRecord {
    /// Shell record for fatal outcomes: everything empty except the URL and
    /// the metadata describing the failure.
    pub fn empty(target_url: impl Into<String>, metadata: ExtractionMetadata) -> Self {
        Self {
            target_url: target_url.into(),
            name: CanonicalField::default(),
            description: CanonicalField::default(),
            website: CanonicalField::default(),
            phone: CanonicalField::default(),
            emails: CanonicalField::default(),
            address: CanonicalField::default(),
            hours: CanonicalField::default(),
            cuisines: CanonicalField::default(),
            price_range: CanonicalField::default(),
            rating: CanonicalField::default(),
            review_count: CanonicalField::default(),
            geo: CanonicalField::default(),
            social: CanonicalField::default(),
            menu_items: Vec::new(),
            competitors: Vec::new(),
            artifacts: Vec::new(),
            extraction_metadata: metadata,
        }
    }
}
