// engine_core/src/integration_tests.rs

#[cfg(test)]
mod integration_tests {
    use crate::artifact_store::{ArtifactStore, InMemoryArtifactStore};
    use crate::capabilities::agentic::{
        AgenticBrowser, AgenticOutcome, AgenticScreenshot, AgenticTask,
    };
    use crate::capabilities::browser::{
        BrowserSession, HeadlessBrowser, PageLimits, RenderedPage,
    };
    use crate::capabilities::llm::{TextModel, TextRequest, VisionModel, VisionRequest};
    use crate::capabilities::places::{
        CandidateCompetitor, PlaceDetails, PlaceId, PlacesDirectory,
    };
    use crate::capabilities::{Capabilities, Clock, FixedClock};
    use crate::config::ExtractionOptions;
    use crate::contracts::{ExtractError, ExtractResult};
    use crate::data_models::record::{OverallStatus, PhaseId, SourceTag};
    use crate::orchestrator::run_extraction;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    // --- capability doubles ---

    struct ScriptedPlaces {
        details: Option<PlaceDetails>,
        competitors: Vec<CandidateCompetitor>,
        quota: bool,
    }

    #[async_trait]
    impl PlacesDirectory for ScriptedPlaces {
        async fn lookup(&self, _query: &str) -> ExtractResult<Option<PlaceId>> {
            if self.quota {
                return Err(ExtractError::quota("places quota exhausted"));
            }
            Ok(self.details.as_ref().map(|_| PlaceId("pid".to_string())))
        }

        async fn details(&self, _place: &PlaceId, _fields: &[&str]) -> ExtractResult<PlaceDetails> {
            Ok(self.details.clone().unwrap_or_default())
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

    struct ScriptedBrowser {
        pages: BTreeMap<String, String>,
        launch_fails: bool,
        cancel_on_render: Option<CancellationToken>,
    }

    struct ScriptedSession {
        pages: BTreeMap<String, String>,
        cancel_on_render: Option<CancellationToken>,
        rendered: AtomicUsize,
    }

    #[async_trait]
    impl HeadlessBrowser for ScriptedBrowser {
        async fn open_session(&self) -> ExtractResult<Box<dyn BrowserSession>> {
            if self.launch_fails {
                return Err(ExtractError::resource("browser launch failed", false));
            }
            Ok(Box::new(ScriptedSession {
                pages: self.pages.clone(),
                cancel_on_render: self.cancel_on_render.clone(),
                rendered: AtomicUsize::new(0),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for ScriptedSession {
        async fn render_page(&self, url: &str, _limits: &PageLimits) -> ExtractResult<RenderedPage> {
            let path = url::Url::parse(url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| url.to_string());
            let html = self
                .pages
                .get(&path)
                .cloned()
                .ok_or_else(|| ExtractError::transient(format!("no page at {}", url)))?;
            self.rendered.fetch_add(1, Ordering::SeqCst);
            if let Some(cancel) = &self.cancel_on_render {
                cancel.cancel();
            }
            Ok(RenderedPage {
                final_url: url.to_string(),
                html,
                screenshot_png: format!("png of {}", path).into_bytes(),
            })
        }

        async fn close(&self) -> ExtractResult<()> {
            Ok(())
        }
    }

    const SYNTHESIS_JSON: &str = r#"{
        "executive_hook": "A strong neighborhood brand with an under-marketed menu.",
        "competitive_landscape": "A dense Italian segment within walking distance.",
        "top_opportunities": ["Publish the menu with prices online"],
        "action_items": ["Add online ordering"],
        "premium_teasers": ["Full competitor teardown available"],
        "forward_looking_insights": ["Delivery demand keeps growing"]
    }"#;

    /// Answers canonicalizer and analyzer prompts by recognizing the schema
    /// each one demands.
    struct RoutedText;

    #[async_trait]
    impl TextModel for RoutedText {
        async fn complete(&self, request: TextRequest) -> ExtractResult<String> {
            let prompt = request.prompt.as_str();
            let response = if prompt.contains("Pick the best canonical business name") {
                r#"{"canonical_name": "Example Bistro"}"#.to_string()
            } else if prompt.contains("Convert this phone number to E.164") {
                r#"{"e164": null, "extension": null}"#.to_string()
            } else if prompt.contains("Split this restaurant address") {
                r#"{"street": null, "city": null, "region": null, "postal_code": null, "country": null}"#
                    .to_string()
            } else if prompt.contains("Assign each menu item one category") {
                r#"{"items": []}"#.to_string()
            } else if prompt.contains("two-sentence business description") {
                r#"{"description": "A neighborhood bistro serving Italian classics."}"#.to_string()
            } else if prompt.contains("market position") {
                r#"{"strengths": ["loyal base"], "weaknesses": ["thin web presence"], "positioning": "casual Italian"}"#
                    .to_string()
            } else if prompt.contains("competitor restaurant") {
                r#"{"strengths": ["higher volume"], "weaknesses": ["generic menu"]}"#.to_string()
            } else if prompt.contains("strategic business analysis")
                || prompt.contains("Return ONLY a JSON object")
            {
                SYNTHESIS_JSON.to_string()
            } else {
                "{}".to_string()
            };
            Ok(response)
        }
    }

    struct RoutedVision {
        menu_json: String,
    }

    #[async_trait]
    impl VisionModel for RoutedVision {
        async fn complete(&self, request: VisionRequest) -> ExtractResult<String> {
            if request.prompt.contains("impressions") {
                return Ok(
                    r#"{"impressions": ["clean hero image"], "extracted_facts": []}"#.to_string(),
                );
            }
            Ok(self.menu_json.clone())
        }
    }

    struct ScriptedAgentic {
        hours: String,
    }

    #[async_trait]
    impl AgenticBrowser for ScriptedAgentic {
        async fn execute(&self, task: AgenticTask) -> ExtractResult<AgenticOutcome> {
            assert!(task.focused_schema["hours"].as_bool().unwrap_or(false));
            let mut field_values = BTreeMap::new();
            field_values.insert("hours".to_string(), self.hours.clone());
            Ok(AgenticOutcome {
                field_values,
                screenshots: vec![AgenticScreenshot {
                    png: b"hours page".to_vec(),
                    caption: "looked for opening hours".to_string(),
                }],
                pages_visited: 2,
            })
        }
    }

    struct CountingAgentic {
        called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AgenticBrowser for CountingAgentic {
        async fn execute(&self, _task: AgenticTask) -> ExtractResult<AgenticOutcome> {
            self.called.store(true, Ordering::SeqCst);
            Ok(AgenticOutcome::default())
        }
    }

    // --- fixtures ---

    fn fixed_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ))
    }

    const EMPTY_MENU_JSON: &str = r#"{"items": [], "notes": null}"#;

    fn make_caps(
        places: ScriptedPlaces,
        browser: ScriptedBrowser,
        vision_menu_json: &str,
        agentic: Option<Arc<dyn AgenticBrowser>>,
    ) -> (Capabilities, Arc<InMemoryArtifactStore>) {
        let store = Arc::new(InMemoryArtifactStore::new());
        let caps = Capabilities {
            places: Arc::new(places),
            browser: Arc::new(browser),
            llm_text: Arc::new(RoutedText),
            llm_vision: Arc::new(RoutedVision {
                menu_json: vision_menu_json.to_string(),
            }),
            agentic_browser: agentic,
            artifact_store: store.clone(),
            http: reqwest::Client::new(),
            clock: fixed_clock(),
        };
        (caps, store)
    }

    fn full_place_details(website: &str, with_hours: bool) -> PlaceDetails {
        PlaceDetails {
            name: Some("Example Bistro".to_string()),
            formatted_address: Some("123 Main St, San Francisco, CA 94105, USA".to_string()),
            phone: Some("+1 415 555 0101".to_string()),
            website: Some(website.to_string()),
            rating: Some(4.5),
            review_count: Some(312),
            hours: if with_hours {
                vec![
                    "Monday: 11:00 AM – 10:00 PM".to_string(),
                    "Tuesday: 11:00 AM – 10:00 PM".to_string(),
                    "Wednesday: 11:00 AM – 10:00 PM".to_string(),
                    "Thursday: 11:00 AM – 10:00 PM".to_string(),
                    "Friday: 11:00 AM – 11:00 PM".to_string(),
                    "Saturday: 10:00 AM – 11:00 PM".to_string(),
                    "Sunday: 10:00 AM – 9:00 PM".to_string(),
                ]
            } else {
                Vec::new()
            },
            price_level: Some(2),
            photo_refs: Vec::new(),
            review_snippets: Vec::new(),
            geo: None,
        }
    }

    fn rival() -> CandidateCompetitor {
        CandidateCompetitor {
            name: "Rival Trattoria".to_string(),
            address: Some("99 Side St".to_string()),
            website: None,
            rating: Some(4.2),
            review_count: Some(120),
            distance_km: Some(0.4),
        }
    }

    /// Homepage that confirms the directory data through structured markup.
    fn rich_homepage(website: &str) -> String {
        format!(
            r#"<html><head>
            <meta property="og:description" content="Wood-fired Italian cooking in the Mission."/>
            <script type="application/ld+json">
            {{
              "@type": "Restaurant",
              "name": "Example Bistro",
              "telephone": "+1 415 555 0101",
              "url": "{website}",
              "servesCuisine": "Italian",
              "address": {{
                "@type": "PostalAddress",
                "streetAddress": "123 Main St",
                "addressLocality": "San Francisco",
                "addressRegion": "CA",
                "postalCode": "94105"
              }}
            }}
            </script>
            </head><body><p>Welcome to Example Bistro.</p></body></html>"#
        )
    }

    /// Homepage with cuisine markup only, plus crawlable contact/social/menu
    /// signals for the DOM phase.
    fn crawlable_homepage(with_menu_link: bool) -> String {
        let menu_link = if with_menu_link {
            r#"<a href="/menu">Our Menu</a>"#
        } else {
            ""
        };
        format!(
            r#"<html><head>
            <script type="application/ld+json">
            {{"@type": "Restaurant", "servesCuisine": "Italian"}}
            </script>
            </head><body>
              <a href="tel:+14155550101">Call us</a>
              <a href="https://www.instagram.com/examplebistro">Instagram</a>
              {menu_link}
            </body></html>"#
        )
    }

    fn menu_page() -> String {
        let dishes = [
            "Margherita Pizza $14.99",
            "Wood Fired Calzone $13.50",
            "Spaghetti Carbonara $16.00",
            "Lasagna della Casa $17.25",
            "Caprese Salad $11.00",
            "Garlic Focaccia $6.50",
            "Chicken Parmigiana $18.75",
            "Risotto ai Funghi $17.00",
            "Tiramisu Classico $9.00",
            "Panna Cotta $8.50",
            "House Chianti Glass $9.00",
            "San Pellegrino $4.00",
        ];
        let items: Vec<String> = dishes.iter().map(|d| format!("<li>{}</li>", d)).collect();
        format!(
            r#"<html><body><div class="menu"><ul>{}</ul></div></body></html>"#,
            items.join("")
        )
    }

    /// Registers the HTTP endpoints Phase 1 touches. Every route answers any
    /// number of times so a fixture can be reused across runs.
    fn serve_site(server: &Server, homepage: &str, sitemap_urls: Vec<String>) {
        server.expect(
            Expectation::matching(request::method_path("GET", "/"))
                .times(0..)
                .respond_with(status_code(200).body(homepage.to_string())),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/robots.txt"))
                .times(0..)
                .respond_with(status_code(404)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/sitemap_index.xml"))
                .times(0..)
                .respond_with(status_code(404)),
        );
        if sitemap_urls.is_empty() {
            server.expect(
                Expectation::matching(request::method_path("GET", "/sitemap.xml"))
                    .times(0..)
                    .respond_with(status_code(404)),
            );
        } else {
            let body = format!(
                r#"<?xml version="1.0"?><urlset>{}</urlset>"#,
                sitemap_urls
                    .iter()
                    .map(|u| format!("<url><loc>{}</loc></url>", u))
                    .collect::<String>()
            );
            server.expect(
                Expectation::matching(request::method_path("GET", "/sitemap.xml"))
                    .times(0..)
                    .respond_with(status_code(200).body(body)),
            );
        }
    }

    fn assert_costs_balance(metadata: &crate::data_models::record::ExtractionMetadata) {
        let sum: f64 = metadata.per_phase.iter().map(|e| e.cost_usd).sum();
        assert!((metadata.total_cost - sum).abs() < 1e-9);
    }

    // --- S1: places hit, no crawl needed ---

    #[tokio::test]
    async fn s1_places_hit_skips_later_phases() {
        let server = Server::run();
        let target = server.url_str("/");
        serve_site(&server, &rich_homepage(&target), Vec::new());

        let (caps, _store) = make_caps(
            ScriptedPlaces {
                details: Some(full_place_details(&target, true)),
                competitors: vec![rival()],
                quota: false,
            },
            ScriptedBrowser {
                pages: BTreeMap::new(),
                launch_fails: false,
                cancel_on_render: None,
            },
            EMPTY_MENU_JSON,
            None,
        );

        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.metadata.phases_completed, vec![PhaseId::Discovery]);
        assert!(outcome.metadata.final_quality_score >= 0.80);
        assert_eq!(outcome.metadata.overall_status, OverallStatus::Ok);
        let record = &outcome.record;
        assert_eq!(record.name.canonical.as_deref(), Some("Example Bistro"));
        assert_eq!(
            record.phone.canonical.as_ref().unwrap().e164.as_deref(),
            Some("+14155550101")
        );
        assert!(record
            .cuisines
            .canonical
            .as_ref()
            .unwrap()
            .iter()
            .any(|c| c == "Italian"));
        assert!(record.menu_items.is_empty());
        assert!(outcome.analysis.is_some());
        assert_eq!(record.competitors.len(), 1);
        assert_costs_balance(&outcome.metadata);
    }

    // --- S2: crawl fills the menu ---

    fn s2_fixture(server: &Server) -> (String, Capabilities, Arc<InMemoryArtifactStore>) {
        let target = server.url_str("/");
        serve_site(server, &crawlable_homepage(true), vec![server.url_str("/menu")]);
        let mut pages = BTreeMap::new();
        pages.insert("/".to_string(), crawlable_homepage(true));
        pages.insert("/menu".to_string(), menu_page());
        let (caps, store) = make_caps(
            ScriptedPlaces {
                details: Some(full_place_details(&target, true)),
                competitors: Vec::new(),
                quota: false,
            },
            ScriptedBrowser {
                pages,
                launch_fails: false,
                cancel_on_render: None,
            },
            EMPTY_MENU_JSON,
            None,
        );
        (target, caps, store)
    }

    #[tokio::test]
    async fn s2_crawl_fills_menu_and_gate_two_stops() {
        let server = Server::run();
        let (target, caps, _store) = s2_fixture(&server);

        let mut options = ExtractionOptions::default();
        options.phase_gates.t2 = 0.78;
        let outcome = run_extraction(&target, options, caps, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.metadata.phases_completed,
            vec![PhaseId::Discovery, PhaseId::DomCrawl]
        );
        let record = &outcome.record;
        assert!(record.menu_items.len() >= 10);
        let margherita = record
            .menu_items
            .iter()
            .find(|i| i.name == "Margherita Pizza")
            .expect("margherita present");
        assert_eq!(margherita.price_numeric, Some(14.99));
        assert_eq!(margherita.source_tag, SourceTag::Dom);
        assert_costs_balance(&outcome.metadata);

        // Every populated canonical field keeps at least one raw observation.
        assert!(!record.name.observations.is_empty());
        assert!(!record.phone.observations.is_empty());
        assert!(!record.hours.observations.is_empty());
    }

    // --- S3: vision on a PDF menu ---

    #[tokio::test]
    async fn s3_vision_extracts_menu_when_crawl_found_none() {
        let server = Server::run();
        let target = server.url_str("/");
        let pdf_url = server.url_str("/files/menu.pdf");
        serve_site(&server, &crawlable_homepage(false), vec![pdf_url]);
        server.expect(
            Expectation::matching(request::method_path("GET", "/files/menu.pdf"))
                .times(0..)
                .respond_with(status_code(200).body("%PDF-1.4 fake menu")),
        );

        let vision_items: Vec<String> = (1..=20)
            .map(|i| format!(r#"{{"name": "Course {} Plate", "price_cleaned": {}.5}}"#, i, 10 + i))
            .collect();
        let vision_json = format!(r#"{{"items": [{}], "notes": null}}"#, vision_items.join(","));

        let mut pages = BTreeMap::new();
        pages.insert("/".to_string(), crawlable_homepage(false));
        let (caps, store) = make_caps(
            ScriptedPlaces {
                details: Some(full_place_details(&target, true)),
                competitors: Vec::new(),
                quota: false,
            },
            ScriptedBrowser {
                pages,
                launch_fails: false,
                cancel_on_render: None,
            },
            &vision_json,
            None,
        );

        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.metadata.phases_completed,
            vec![PhaseId::Discovery, PhaseId::DomCrawl, PhaseId::Vision]
        );
        let record = &outcome.record;
        assert_eq!(record.menu_items.len(), 20);
        let mut names: Vec<String> = record
            .menu_items
            .iter()
            .map(|i| i.normalized_name())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 20);
        assert!(record
            .menu_items
            .iter()
            .all(|i| i.source_tag == SourceTag::Vision));
        // The captured PDF is an artifact, and every artifact URI resolves.
        assert!(record
            .artifacts
            .iter()
            .any(|a| a.media_kind == crate::data_models::record::MediaKind::ApplicationPdf));
        for artifact in &record.artifacts {
            assert!(store.get(&artifact.uri).await.is_ok());
        }
    }

    // --- S4: selective fallback recovers hours ---

    #[tokio::test]
    async fn s4_selective_browsing_fills_missing_hours() {
        let server = Server::run();
        let target = server.url_str("/");
        serve_site(&server, &crawlable_homepage(true), vec![server.url_str("/menu")]);
        let mut pages = BTreeMap::new();
        pages.insert("/".to_string(), crawlable_homepage(true));
        pages.insert("/menu".to_string(), menu_page());

        let hours_text = "Monday: 11-10\nTuesday: 11-10\nWednesday: 11-10\nThursday: 11-10\nFriday: 11-11\nSaturday: 10-11\nSunday: 10-9";
        let (caps, _store) = make_caps(
            ScriptedPlaces {
                details: Some(full_place_details(&target, false)),
                competitors: Vec::new(),
                quota: false,
            },
            ScriptedBrowser {
                pages,
                launch_fails: false,
                cancel_on_render: None,
            },
            EMPTY_MENU_JSON,
            Some(Arc::new(ScriptedAgentic {
                hours: hours_text.to_string(),
            })),
        );

        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.metadata.phases_completed,
            vec![
                PhaseId::Discovery,
                PhaseId::DomCrawl,
                PhaseId::Vision,
                PhaseId::SelectiveBrowsing
            ]
        );
        let record = &outcome.record;
        let hours = record.hours.canonical.as_deref().expect("hours canonical");
        assert_eq!(hours.lines().count(), 7);
        assert_eq!(record.hours.observations.len(), 1);
        assert_eq!(record.hours.observations[0].source, SourceTag::SelectiveLlm);
        assert_costs_balance(&outcome.metadata);
    }

    // --- S5: quota exhaustion on places ---

    #[tokio::test]
    async fn s5_places_quota_yields_partial_not_error() {
        let server = Server::run();
        let target = server.url_str("/");
        serve_site(&server, &rich_homepage(&target), Vec::new());
        let mut pages = BTreeMap::new();
        pages.insert("/".to_string(), rich_homepage(&target));

        let (caps, _store) = make_caps(
            ScriptedPlaces {
                details: None,
                competitors: Vec::new(),
                quota: true,
            },
            ScriptedBrowser {
                pages,
                launch_fails: false,
                cancel_on_render: None,
            },
            EMPTY_MENU_JSON,
            None,
        );

        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.metadata.overall_status, OverallStatus::Partial);
        assert!(outcome
            .metadata
            .phase_errors
            .iter()
            .any(|e| e.phase == PhaseId::Discovery && e.message.contains("quota")));
        // The record still canonicalizes from markup evidence alone.
        let record = &outcome.record;
        assert_eq!(record.name.canonical.as_deref(), Some("Example Bistro"));
        assert_eq!(record.name.observations[0].source, SourceTag::SchemaOrg);
        assert_costs_balance(&outcome.metadata);
    }

    // --- S6: cancellation mid-crawl ---

    #[tokio::test]
    async fn s6_cancellation_mid_crawl_returns_partial_with_note() {
        let server = Server::run();
        let target = server.url_str("/");
        serve_site(&server, &crawlable_homepage(true), vec![server.url_str("/menu")]);
        let cancel = CancellationToken::new();
        let mut pages = BTreeMap::new();
        pages.insert("/".to_string(), crawlable_homepage(true));
        pages.insert("/menu".to_string(), menu_page());

        let (caps, _store) = make_caps(
            ScriptedPlaces {
                details: Some(full_place_details(&target, true)),
                competitors: Vec::new(),
                quota: false,
            },
            ScriptedBrowser {
                pages,
                launch_fails: false,
                cancel_on_render: Some(cancel.clone()),
            },
            EMPTY_MENU_JSON,
            None,
        );

        let outcome = run_extraction(&target, ExtractionOptions::default(), caps, cancel)
            .await
            .unwrap();

        assert_eq!(outcome.metadata.overall_status, OverallStatus::Partial);
        assert!(outcome.metadata.cancelled);
        assert!(outcome
            .metadata
            .error_message
            .as_deref()
            .unwrap()
            .contains("cancelled"));
        assert_eq!(
            outcome.metadata.phases_completed,
            vec![PhaseId::Discovery, PhaseId::DomCrawl]
        );
        // Phase-1 evidence survived into the canonical record.
        assert_eq!(
            outcome.record.name.canonical.as_deref(),
            Some("Example Bistro")
        );
        assert!(outcome.analysis.is_none());
    }

    // --- budget/gate extras ---

    #[tokio::test]
    async fn no_selective_phase_when_critical_fields_are_covered() {
        let server = Server::run();
        let (target, mut caps, _store) = s2_fixture(&server);
        let called = Arc::new(AtomicBool::new(false));
        caps.agentic_browser = Some(Arc::new(CountingAgentic {
            called: called.clone(),
        }));

        // Default gates: the crawl score stays under t2, vision adds nothing,
        // but no critical field is missing after phase 3.
        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.metadata.phases_completed,
            vec![PhaseId::Discovery, PhaseId::DomCrawl, PhaseId::Vision]
        );
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn browser_launch_failure_is_partial_not_fatal() {
        let server = Server::run();
        let target = server.url_str("/");
        serve_site(&server, &crawlable_homepage(false), Vec::new());

        let (caps, _store) = make_caps(
            ScriptedPlaces {
                details: Some(full_place_details(&target, true)),
                competitors: Vec::new(),
                quota: false,
            },
            ScriptedBrowser {
                pages: BTreeMap::new(),
                launch_fails: true,
                cancel_on_render: None,
            },
            EMPTY_MENU_JSON,
            None,
        );

        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.metadata.overall_status, OverallStatus::Partial);
        assert!(outcome
            .metadata
            .phase_errors
            .iter()
            .any(|e| e.phase == PhaseId::DomCrawl));
        assert_eq!(
            outcome.record.name.canonical.as_deref(),
            Some("Example Bistro")
        );
    }

    #[tokio::test]
    async fn malformed_target_url_fails_before_any_phase() {
        let (caps, _store) = make_caps(
            ScriptedPlaces {
                details: None,
                competitors: Vec::new(),
                quota: false,
            },
            ScriptedBrowser {
                pages: BTreeMap::new(),
                launch_fails: false,
                cancel_on_render: None,
            },
            EMPTY_MENU_JSON,
            None,
        );
        let err = run_extraction(
            "not a url",
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .expect_err("must fail");
        assert_eq!(err.kind, crate::contracts::ExtractErrorKind::InputError);
    }

    #[tokio::test]
    async fn identical_inputs_produce_byte_equal_records() {
        let server = Server::run();
        let target = server.url_str("/");
        serve_site(&server, &rich_homepage(&target), Vec::new());

        let mut serialized = Vec::new();
        for _ in 0..2 {
            let (caps, _store) = make_caps(
                ScriptedPlaces {
                    details: Some(full_place_details(&target, true)),
                    competitors: vec![rival()],
                    quota: false,
                },
                ScriptedBrowser {
                    pages: BTreeMap::new(),
                    launch_fails: false,
                    cancel_on_render: None,
                },
                EMPTY_MENU_JSON,
                None,
            );
            let outcome = run_extraction(
                &target,
                ExtractionOptions::default(),
                caps,
                CancellationToken::new(),
            )
            .await
            .unwrap();
            serialized.push(serde_json::to_string(&outcome.record).unwrap());
        }
        assert_eq!(serialized[0], serialized[1]);
    }

    #[tokio::test]
    async fn phase_order_is_monotonic_without_repeats() {
        let server = Server::run();
        let (target, caps, _store) = s2_fixture(&server);
        let outcome = run_extraction(
            &target,
            ExtractionOptions::default(),
            caps,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let indices: Vec<u8> = outcome
            .metadata
            .phases_completed
            .iter()
            .map(|p| p.index())
            .collect();
        let mut sorted = indices.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(indices, sorted);
    }
}
