pub mod agentic;
pub mod browser;
pub mod llm;
pub mod places;

use crate::artifact_store::ArtifactStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// # NDOC
/// component: `capabilities`
/// purpose: Time source seam so test doubles can produce byte-stable records.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time source for deterministic tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// # NDOC
/// component: `capabilities`
/// purpose: Bundle of external collaborators injected into the orchestrator.
///   No component constructs its own clients; test doubles drop in per seam.
/// invariants:
///   - `agentic_browser` is optional; when absent Phase 4 is skipped with a
///     recorded note.
#[derive(Clone)]
pub struct Capabilities {
    pub places: Arc<dyn places::PlacesDirectory>,
    pub browser: Arc<dyn browser::HeadlessBrowser>,
    pub llm_text: Arc<dyn llm::TextModel>,
    pub llm_vision: Arc<dyn llm::VisionModel>,
    pub agentic_browser: Option<Arc<dyn agentic::AgenticBrowser>>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    /// Shared pooled HTTP client for plain fetches (robots, sitemaps, PDFs).
    pub http: reqwest::Client,
    pub clock: Arc<dyn Clock>,
}
