use crate::canonicalize::Canonicalizer;
use crate::capabilities::Capabilities;
use crate::config::ExtractionOptions;
use crate::contracts::{ExtractError, ExtractErrorKind, ExtractResult};
use crate::data_models::analysis::StrategicAnalysis;
use crate::data_models::record::{
    ExtractionMetadata, FinalRecord, MediaKind, OverallStatus, PartialRecord, PhaseError, PhaseId,
    PhaseLedgerEntry,
};
use crate::extractors::dom_crawler::DomCrawler;
use crate::extractors::places_lookup::extract_places;
use crate::extractors::selective::SelectiveBrowsingExtractor;
use crate::extractors::sitemap::{analyze_site, ClassifiedUrl};
use crate::extractors::structured_markup::extract_structured_markup;
use crate::extractors::vision::VisionProcessor;
use crate::invariants::ensure_http_url;
use crate::quality::assess;
use crate::strategy::StrategicAnalyzer;
use crate::utils::fetch::fetch_text;
use crate::utils::logger::{log_budget_stop, log_gate_decision};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

const MAX_PRIORITY_URLS: usize = 8;
const SITEMAP_COST_PER_FETCH_USD: f64 = 0.0001;

/// # NDOC
/// component: `orchestrator`
/// purpose: Everything a run returns to the caller. The metadata is also
///   embedded in the record for persistence.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub record: FinalRecord,
    pub analysis: Option<StrategicAnalysis>,
    pub metadata: ExtractionMetadata,
    pub analysis_errors: Vec<String>,
}

/// Per-run cost and error ledger behind the budget gates.
struct RunLedger {
    per_phase: Vec<PhaseLedgerEntry>,
    phase_errors: Vec<PhaseError>,
    consecutive_failures: u32,
}

impl RunLedger {
    fn new() -> Self {
        Self {
            per_phase: Vec::new(),
            phase_errors: Vec::new(),
            consecutive_failures: 0,
        }
    }

    fn total_cost(&self) -> f64 {
        self.per_phase.iter().map(|e| e.cost_usd).sum()
    }

    fn record_phase(&mut self, phase: PhaseId, cost_usd: f64, duration_s: f64) {
        self.per_phase.push(PhaseLedgerEntry {
            phase,
            cost_usd,
            duration_s,
        });
    }

    fn record_error(&mut self, phase: PhaseId, message: impl Into<String>) {
        self.phase_errors.push(PhaseError {
            phase,
            message: message.into(),
        });
    }

    /// Folds trailing work (canonicalization, analysis) into the last phase
    /// entry so the per-phase sum stays equal to the total.
    fn fold_cost(&mut self, cost_usd: f64) {
        if let Some(last) = self.per_phase.last_mut() {
            last.cost_usd += cost_usd;
        } else {
            self.per_phase.push(PhaseLedgerEntry {
                phase: PhaseId::Discovery,
                cost_usd,
                duration_s: 0.0,
            });
        }
    }
}

fn derive_run_id(target_url: &str, started_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_url.as_bytes());
    hasher.update(started_at.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    format!("run_{:x}", digest)[..20].to_string()
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

/// # NDOC
/// component: `orchestrator`
/// purpose: Drives the four-phase pipeline with quality gates and budget
///   caps, owns the working record, and assembles the final output.
/// invariants:
///   - Phases are strictly sequential; evidence merging is append-only.
///   - Canonicalization runs exactly once, even on partial or cancelled runs.
///   - Only input validation errors propagate; everything else lands in
///     metadata.
pub struct PhaseOrchestrator {
    capabilities: Capabilities,
    options: ExtractionOptions,
}

impl PhaseOrchestrator {
    pub fn new(capabilities: Capabilities, options: ExtractionOptions) -> Self {
        Self {
            capabilities,
            options,
        }
    }

    /// Single inbound operation: URL in, canonical record + optional
    /// strategic analysis + metadata out.
    pub async fn run_extraction(
        &self,
        target_url: &str,
        cancel: CancellationToken,
    ) -> ExtractResult<ExtractionOutcome> {
        self.options.validate()?;
        let target = ensure_http_url(target_url, "target_url")?;

        let started_at = self.capabilities.clock.now();
        let run_id = derive_run_id(target.as_str(), started_at);
        log::info!(
            target: "orchestrator",
            run_id = run_id.as_str(),
            url = target.as_str();
            "extraction started"
        );

        self.run_phases(&target, run_id, started_at, &cancel).await
    }

    async fn run_phases(
        &self,
        target: &Url,
        run_id: String,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ExtractResult<ExtractionOutcome> {
        let clock = &self.capabilities.clock;
        let gates = &self.options.phase_gates;
        let mut partial = PartialRecord::new(target.as_str());
        let mut ledger = RunLedger::new();
        let mut cancelled = false;
        let mut fatal: Option<ExtractError> = None;

        // --- Phase 1: places + structured markup + sitemap, concurrently ---
        let phase1_start = clock.now();
        let (phase1_cost, priority_urls, pdf_urls) = self
            .phase1_discovery(target, &mut partial, &mut ledger, cancel)
            .await;
        partial.phases_completed.push(PhaseId::Discovery);
        ledger.record_phase(
            PhaseId::Discovery,
            phase1_cost,
            seconds_between(phase1_start, clock.now()),
        );
        partial.running_cost = ledger.total_cost();

        let mut report = assess(&partial.evidence);
        partial.running_quality = report.overall;
        let mut stop = report.overall >= gates.t1;
        log_gate_decision(
            &run_id,
            1,
            report.overall,
            if stop { "canonicalize" } else { "continue" },
        );
        if !stop {
            if let Some(reason) = self.budget_exhausted(&ledger, started_at) {
                log_budget_stop(&run_id, reason, ledger.total_cost());
                ledger.record_error(PhaseId::Discovery, format!("budget exhausted: {}", reason));
                stop = true;
            }
        }
        if cancel.is_cancelled() {
            cancelled = true;
            stop = true;
        }

        // --- Phase 2: DOM crawl ---
        if !stop {
            let phase_start = clock.now();
            let crawler = DomCrawler::new(
                self.capabilities.browser.clone(),
                self.capabilities.http.clone(),
                self.capabilities.artifact_store.clone(),
                self.capabilities.clock.clone(),
                self.options.crawler.clone(),
            );
            match crawler
                .crawl(target, &priority_urls, &pdf_urls, cancel)
                .await
            {
                Ok(outcome) => {
                    for error in &outcome.errors {
                        log::warn!(target: "orchestrator", url = error.url.as_str();
                            "crawl page error: {}", error.message);
                    }
                    if outcome.crawled_urls.is_empty() {
                        ledger.record_error(PhaseId::DomCrawl, "crawl produced no pages");
                        ledger.consecutive_failures += 1;
                    } else {
                        ledger.consecutive_failures = 0;
                    }
                    partial.evidence.merge(outcome.observations);
                    partial.phases_completed.push(PhaseId::DomCrawl);
                    ledger.record_phase(
                        PhaseId::DomCrawl,
                        outcome.cost_usd,
                        seconds_between(phase_start, clock.now()),
                    );
                }
                Err(err) if err.kind == ExtractErrorKind::InternalError => {
                    fatal = Some(err);
                }
                Err(err) => {
                    ledger.record_error(PhaseId::DomCrawl, err.message.clone());
                    ledger.consecutive_failures += 1;
                    ledger.record_phase(
                        PhaseId::DomCrawl,
                        0.0,
                        seconds_between(phase_start, clock.now()),
                    );
                }
            }
            partial.running_cost = ledger.total_cost();

            report = assess(&partial.evidence);
            partial.running_quality = report.overall;
            let budget_reason = self.budget_exhausted(&ledger, started_at);
            if let Some(reason) = budget_reason {
                log_budget_stop(&run_id, reason, ledger.total_cost());
            }
            stop = fatal.is_some() || report.overall >= gates.t2 || budget_reason.is_some();
            log_gate_decision(
                &run_id,
                2,
                report.overall,
                if stop { "canonicalize" } else { "continue" },
            );
            if cancel.is_cancelled() {
                cancelled = true;
                stop = true;
            }
        }

        // --- Phase 3: vision over accumulated artifacts ---
        if !stop {
            let phase_start = clock.now();
            let screenshots: Vec<_> = partial
                .evidence
                .artifacts
                .iter()
                .filter(|a| a.media_kind == MediaKind::ImagePng)
                .cloned()
                .collect();
            let pdfs: Vec<_> = partial
                .evidence
                .artifacts
                .iter()
                .filter(|a| a.media_kind == MediaKind::ApplicationPdf)
                .cloned()
                .collect();
            let name_hint = partial
                .evidence
                .name
                .first()
                .map(|f| f.value.clone())
                .or_else(|| self.options.restaurant_name_hint.clone());
            let processor = VisionProcessor::new(
                self.capabilities.llm_vision.clone(),
                self.capabilities.artifact_store.clone(),
                self.capabilities.clock.clone(),
                self.options.vision.clone(),
            );
            let outcome = processor
                .process(&screenshots, &pdfs, name_hint.as_deref(), cancel)
                .await;
            if outcome.images_processed == 0 && !outcome.errors.is_empty() {
                ledger.record_error(
                    PhaseId::Vision,
                    format!("vision produced nothing: {}", outcome.errors.join("; ")),
                );
                ledger.consecutive_failures += 1;
            } else {
                ledger.consecutive_failures = 0;
            }
            partial.evidence.merge(outcome.observations);
            partial.phases_completed.push(PhaseId::Vision);
            ledger.record_phase(
                PhaseId::Vision,
                outcome.cost_usd,
                seconds_between(phase_start, clock.now()),
            );
            partial.running_cost = ledger.total_cost();

            report = assess(&partial.evidence);
            partial.running_quality = report.overall;
            let budget_reason = self.budget_exhausted(&ledger, started_at);
            if let Some(reason) = budget_reason {
                log_budget_stop(&run_id, reason, ledger.total_cost());
            }
            stop = report.overall >= gates.t3
                || report.missing_critical_fields.is_empty()
                || budget_reason.is_some();
            log_gate_decision(
                &run_id,
                3,
                report.overall,
                if stop { "canonicalize" } else { "continue" },
            );
            if cancel.is_cancelled() {
                cancelled = true;
                stop = true;
            }
        }

        // --- Phase 4: selective browsing for missing critical fields ---
        if !stop && !report.missing_critical_fields.is_empty() {
            let phase_start = clock.now();
            if !self.options.selective_browsing.enabled {
                log::info!(target: "orchestrator", phase = 4u8; "selective browsing disabled");
            } else if let Some(agentic) = self.capabilities.agentic_browser.clone() {
                let extractor = SelectiveBrowsingExtractor::new(
                    agentic,
                    self.capabilities.artifact_store.clone(),
                    self.capabilities.clock.clone(),
                    self.options.selective_browsing.clone(),
                );
                let hints = self.context_hints(&partial);
                match extractor
                    .extract(target, &report.missing_critical_fields, hints)
                    .await
                {
                    Ok(outcome) => {
                        partial.evidence.merge(outcome.observations);
                        partial.phases_completed.push(PhaseId::SelectiveBrowsing);
                        ledger.record_phase(
                            PhaseId::SelectiveBrowsing,
                            outcome.cost_usd,
                            seconds_between(phase_start, clock.now()),
                        );
                        ledger.consecutive_failures = 0;
                    }
                    Err(err) if err.kind == ExtractErrorKind::InternalError => {
                        fatal = Some(err);
                    }
                    Err(err) => {
                        ledger.record_error(PhaseId::SelectiveBrowsing, err.message.clone());
                        ledger.record_phase(
                            PhaseId::SelectiveBrowsing,
                            0.0,
                            seconds_between(phase_start, clock.now()),
                        );
                    }
                }
            } else {
                ledger.record_error(
                    PhaseId::SelectiveBrowsing,
                    "agentic browser capability unavailable; phase skipped",
                );
            }
            partial.running_cost = ledger.total_cost();
            if cancel.is_cancelled() {
                cancelled = true;
            }
        }

        // --- Fatal short-circuit: empty record, metadata only ---
        if let Some(err) = fatal {
            let completed_at = clock.now();
            let metadata = ExtractionMetadata {
                run_id,
                started_at,
                completed_at,
                total_duration_s: seconds_between(started_at, completed_at),
                total_cost: ledger.total_cost(),
                phases_completed: partial.phases_completed.clone(),
                per_phase: ledger.per_phase,
                final_quality_score: 0.0,
                overall_status: OverallStatus::Error,
                error_message: Some(err.message),
                phase_errors: ledger.phase_errors,
                cancelled,
            };
            let record = FinalRecord::empty(target.as_str(), metadata.clone());
            return Ok(ExtractionOutcome {
                record,
                analysis: None,
                metadata,
                analysis_errors: Vec::new(),
            });
        }

        // --- Canonicalize exactly once, even on partial data ---
        let final_report = assess(&partial.evidence);
        let canonicalizer = Canonicalizer::new(
            self.capabilities.llm_text.clone(),
            self.capabilities.clock.clone(),
        );
        let canonical = canonicalizer
            .canonicalize(target.as_str(), &partial.evidence)
            .await;
        ledger.fold_cost(canonical.cost_usd);
        for failure in &canonical.parse_failures {
            log::warn!(target: "orchestrator", "canonicalizer parse failure: {}", failure);
        }

        let mut record = canonical.record;
        let mut analysis = None;
        let mut analysis_errors = Vec::new();

        // Strategic analysis rides after canonicalization and never fails the run.
        if self.options.enable_strategic_analysis && !cancel.is_cancelled() {
            let analyzer = StrategicAnalyzer::new(
                self.capabilities.llm_text.clone(),
                self.capabilities.llm_vision.clone(),
                self.capabilities.artifact_store.clone(),
            );
            let outcome = analyzer.analyze(&record, cancel).await;
            ledger.fold_cost(outcome.cost_usd);
            analysis = outcome.analysis;
            analysis_errors = outcome.errors;
        }

        let completed_at = clock.now();
        let overall_status = if cancelled || !ledger.phase_errors.is_empty() {
            OverallStatus::Partial
        } else {
            OverallStatus::Ok
        };
        let error_message = if cancelled {
            Some(format!(
                "cancelled after phase {}",
                partial
                    .phases_completed
                    .last()
                    .map(|p| p.index())
                    .unwrap_or(0)
            ))
        } else {
            ledger
                .phase_errors
                .first()
                .map(|e| e.message.clone())
        };
        let metadata = ExtractionMetadata {
            run_id,
            started_at,
            completed_at,
            total_duration_s: seconds_between(started_at, completed_at),
            total_cost: ledger.total_cost(),
            phases_completed: partial.phases_completed.clone(),
            per_phase: ledger.per_phase,
            final_quality_score: final_report.overall,
            overall_status,
            error_message,
            phase_errors: ledger.phase_errors,
            cancelled,
        };
        record.extraction_metadata = metadata.clone();

        log::info!(
            target: "orchestrator",
            run_id = metadata.run_id.as_str(),
            status = format!("{:?}", metadata.overall_status).to_lowercase().as_str(),
            cost_usd = metadata.total_cost,
            quality = metadata.final_quality_score;
            "extraction finished"
        );
        Ok(ExtractionOutcome {
            record,
            analysis,
            metadata,
            analysis_errors,
        })
    }

    /// Phase 1 body: three extractors concurrently, merged in source-tag
    /// order so canonicalization stays reproducible.
    async fn phase1_discovery(
        &self,
        target: &Url,
        partial: &mut PartialRecord,
        ledger: &mut RunLedger,
        _cancel: &CancellationToken,
    ) -> (f64, Vec<ClassifiedUrl>, Vec<String>) {
        let query = self.places_query(target);
        let clock = &self.capabilities.clock;

        let places_fut = extract_places(self.capabilities.places.as_ref(), &query, clock);
        let markup_fut = async {
            let html = fetch_text(&self.capabilities.http, target.as_str()).await?;
            Ok::<_, ExtractError>(extract_structured_markup(&html, target, clock.now()))
        };
        let sitemap_fut = analyze_site(&self.capabilities.http, target);

        let (places_result, markup_result, sitemap_result) =
            tokio::join!(places_fut, markup_fut, sitemap_fut);

        let mut cost = 0.0;
        let mut failures = 0u32;
        let mut priority_urls: Vec<ClassifiedUrl> = Vec::new();
        let mut pdf_urls: Vec<String> = Vec::new();

        // Merge order is fixed: places, then schema markup, then sitemap.
        match places_result {
            Ok(extraction) => {
                cost += extraction.cost_usd;
                partial.evidence.merge(extraction.observations);
            }
            Err(err) => {
                failures += 1;
                ledger.record_error(PhaseId::Discovery, format!("places: {}", err.message));
            }
        }
        match markup_result {
            Ok(extraction) => {
                partial.evidence.merge(extraction.observations);
                for menu_url in extraction.menu_urls {
                    priority_urls.push(ClassifiedUrl {
                        url: menu_url,
                        page_type: crate::extractors::sitemap::PageType::Menu,
                    });
                }
            }
            Err(err) => {
                failures += 1;
                ledger.record_error(PhaseId::Discovery, format!("homepage markup: {}", err.message));
            }
        }
        match sitemap_result {
            Ok(analysis) => {
                cost += SITEMAP_COST_PER_FETCH_USD * (analysis.sitemaps_read + 1) as f64;
                pdf_urls = analysis.pdf_urls;
                for classified in analysis.classified_urls {
                    if classified.page_type.is_priority() {
                        priority_urls.push(classified);
                    }
                }
            }
            Err(err) => {
                failures += 1;
                ledger.record_error(PhaseId::Discovery, format!("sitemap: {}", err.message));
            }
        }
        priority_urls.truncate(MAX_PRIORITY_URLS);

        if failures == 3 {
            ledger.consecutive_failures += 1;
        } else {
            ledger.consecutive_failures = 0;
        }
        (cost, priority_urls, pdf_urls)
    }

    fn places_query(&self, target: &Url) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(name) = &self.options.restaurant_name_hint {
            parts.push(name.clone());
        } else if let Some(host) = target.host_str() {
            let stem = host
                .trim_start_matches("www.")
                .split('.')
                .next()
                .unwrap_or(host)
                .replace(['-', '_'], " ");
            parts.push(stem);
        }
        if let Some(address) = &self.options.address_hint {
            parts.push(address.clone());
        }
        parts.push("restaurant".to_string());
        parts.join(" ")
    }

    fn context_hints(&self, partial: &PartialRecord) -> BTreeMap<String, String> {
        let mut hints = BTreeMap::new();
        if let Some(name) = partial.evidence.name.first() {
            hints.insert("name".to_string(), name.value.clone());
        }
        if let Some(address) = partial.evidence.address.first() {
            hints.insert("address".to_string(), address.value.clone());
        }
        if let Some(hint) = &self.options.restaurant_name_hint {
            hints.entry("name".to_string()).or_insert_with(|| hint.clone());
        }
        if let Some(hint) = &self.options.address_hint {
            hints
                .entry("address".to_string())
                .or_insert_with(|| hint.clone());
        }
        hints
    }

    fn budget_exhausted(&self, ledger: &RunLedger, started_at: DateTime<Utc>) -> Option<&'static str> {
        let elapsed = seconds_between(started_at, self.capabilities.clock.now());
        if elapsed >= self.options.budgets.max_wall_time_s as f64 {
            return Some("wall time cap");
        }
        if ledger.total_cost() >= self.options.budgets.max_cost_usd {
            return Some("cost cap");
        }
        if ledger.consecutive_failures >= self.options.budgets.max_consecutive_phase_failures {
            return Some("consecutive failures cap");
        }
        None
    }
}

/// # NDOC
/// component: `orchestrator`
/// purpose: Convenience entry point matching the inbound interface contract.
pub async fn run_extraction(
    target_url: &str,
    options: ExtractionOptions,
    capabilities: Capabilities,
    cancel: CancellationToken,
) -> ExtractResult<ExtractionOutcome> {
    PhaseOrchestrator::new(capabilities, options)
        .run_extraction(target_url, cancel)
        .await
}
