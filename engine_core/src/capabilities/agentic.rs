use crate::contracts::ExtractResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// # NDOC
/// component: `capabilities::agentic`
/// purpose: One guided browsing task: fill only the requested schema leaves.
#[derive(Debug, Clone)]
pub struct AgenticTask {
    pub target_url: String,
    pub instructions: String,
    /// Nested object of boolean leaves naming exactly the fields wanted.
    pub focused_schema: Value,
    /// Known facts from earlier phases, to stabilize grounding.
    pub context_hints: BTreeMap<String, String>,
    pub max_page_loads: usize,
    pub max_wall_time_s: u64,
}

#[derive(Debug, Clone)]
pub struct AgenticScreenshot {
    pub png: Vec<u8>,
    /// Describes what the agent was looking for on this page.
    pub caption: String,
}

/// # NDOC
/// component: `capabilities::agentic`
/// purpose: Result of a guided session. Fields the agent could not find are
///   simply absent; the capability must not invent values.
#[derive(Debug, Clone, Default)]
pub struct AgenticOutcome {
    /// Dot-notation field path -> observed raw value.
    pub field_values: BTreeMap<String, String>,
    pub screenshots: Vec<AgenticScreenshot>,
    pub pages_visited: usize,
}

/// # NDOC
/// component: `capabilities::agentic`
/// purpose: Optional LLM-driven browser capability for the final fallback
///   phase. Budget overruns return whatever was gathered so far.
#[async_trait]
pub trait AgenticBrowser: Send + Sync {
    async fn execute(&self, task: AgenticTask) -> ExtractResult<AgenticOutcome>;
}
