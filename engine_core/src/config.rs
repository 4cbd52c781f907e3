use crate::contracts::ExtractError;
use crate::invariants::{ensure_range_usize, ensure_unit_interval};
use serde::{Deserialize, Serialize};

/// # NDOC
/// component: `config`
/// purpose: Quality thresholds evaluated at phase gates.
/// invariants:
///   - Each threshold lives in `[0, 1]`.
///   - Reaching `t1` after Phase 1 skips Phases 2-4 entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseGates {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

impl Default for PhaseGates {
    fn default() -> Self {
        Self {
            t1: 0.80,
            t2: 0.90,
            t3: 0.95,
        }
    }
}

/// # NDOC
/// component: `config`
/// purpose: Global run budget caps; reaching any one marks the budget exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunBudgets {
    pub max_wall_time_s: u64,
    pub max_cost_usd: f64,
    pub max_consecutive_phase_failures: u32,
}

impl Default for RunBudgets {
    fn default() -> Self {
        Self {
            max_wall_time_s: 600,
            max_cost_usd: 5.0,
            max_consecutive_phase_failures: 3,
        }
    }
}

/// # NDOC
/// component: `config`
/// purpose: DOM crawl limits for Phase 2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlerLimits {
    pub max_pages: usize,
    pub max_depth: usize,
    pub max_wall_time_s: u64,
    pub per_page_nav_timeout_ms: u64,
    pub post_nav_settle_ms: u64,
}

impl Default for CrawlerLimits {
    fn default() -> Self {
        Self {
            max_pages: 15,
            max_depth: 3,
            max_wall_time_s: 240,
            per_page_nav_timeout_ms: 30_000,
            post_nav_settle_ms: 2_000,
        }
    }
}

/// # NDOC
/// component: `config`
/// purpose: Vision-phase limits for screenshots and PDF rasterization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisionLimits {
    pub max_pdf_pages: usize,
    /// Encoded images above this byte size are downscaled before submission.
    pub max_image_bytes: usize,
}

impl Default for VisionLimits {
    fn default() -> Self {
        Self {
            max_pdf_pages: 5,
            max_image_bytes: 4 * 1024 * 1024,
        }
    }
}

/// # NDOC
/// component: `config`
/// purpose: Selective LLM-browsing fallback limits for Phase 4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectiveBrowsingLimits {
    pub enabled: bool,
    pub max_page_loads: usize,
    pub max_wall_time_s: u64,
}

impl Default for SelectiveBrowsingLimits {
    fn default() -> Self {
        Self {
            enabled: true,
            max_page_loads: 6,
            max_wall_time_s: 120,
        }
    }
}

/// # NDOC
/// component: `config`
/// purpose: Full per-run configuration. Callers construct this; the core never
///   reads the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOptions {
    #[serde(default)]
    pub restaurant_name_hint: Option<String>,
    #[serde(default)]
    pub address_hint: Option<String>,
    #[serde(default = "default_true")]
    pub enable_strategic_analysis: bool,
    #[serde(default)]
    pub phase_gates: PhaseGates,
    #[serde(default)]
    pub budgets: RunBudgets,
    #[serde(default)]
    pub crawler: CrawlerLimits,
    #[serde(default)]
    pub vision: VisionLimits,
    #[serde(default)]
    pub selective_browsing: SelectiveBrowsingLimits,
}

fn default_true() -> bool {
    true
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            restaurant_name_hint: None,
            address_hint: None,
            enable_strategic_analysis: true,
            phase_gates: PhaseGates::default(),
            budgets: RunBudgets::default(),
            crawler: CrawlerLimits::default(),
            vision: VisionLimits::default(),
            selective_browsing: SelectiveBrowsingLimits::default(),
        }
    }
}

impl ExtractionOptions {
    pub fn validate(&self) -> Result<(), ExtractError> {
        ensure_unit_interval(self.phase_gates.t1, "phase_gates.t1")?;
        ensure_unit_interval(self.phase_gates.t2, "phase_gates.t2")?;
        ensure_unit_interval(self.phase_gates.t3, "phase_gates.t3")?;
        ensure_range_usize(self.crawler.max_pages, 1, 200, "crawler.max_pages")?;
        ensure_range_usize(self.crawler.max_depth, 1, 10, "crawler.max_depth")?;
        ensure_range_usize(self.vision.max_pdf_pages, 1, 50, "vision.max_pdf_pages")?;
        if self.budgets.max_wall_time_s == 0 {
            return Err(ExtractError::input("budgets.max_wall_time_s must be > 0"));
        }
        if !(self.budgets.max_cost_usd > 0.0) {
            return Err(ExtractError::input("budgets.max_cost_usd must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_gates_and_limits() {
        let opts = ExtractionOptions::default();
        assert_eq!(opts.phase_gates, PhaseGates { t1: 0.80, t2: 0.90, t3: 0.95 });
        assert_eq!(opts.crawler.max_pages, 15);
        assert_eq!(opts.crawler.max_wall_time_s, 240);
        assert_eq!(opts.vision.max_pdf_pages, 5);
        assert!(opts.selective_browsing.enabled);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_gate() {
        let mut opts = ExtractionOptions::default();
        opts.phase_gates.t2 = 1.5;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn deserializes_with_partial_keys() {
        let opts: ExtractionOptions =
            serde_json::from_str(r#"{"restaurant_name_hint":"Example Bistro"}"#).expect("parse");
        assert_eq!(opts.restaurant_name_hint.as_deref(), Some("Example Bistro"));
        assert!(opts.enable_strategic_analysis);
    }
}
