use crate::contracts::ExtractResult;
use crate::utils::fetch::fetch_text;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

const MAX_SUB_SITEMAPS: usize = 10;
const MAX_URLS_TOTAL: usize = 2000;

static LOC_FALLBACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").expect("static regex"));

/// # NDOC
/// component: `extractors::sitemap`
/// purpose: Page-type vocabulary used by URL classification and crawl
///   prioritization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    Menu,
    Contact,
    About,
    Reservation,
    Location,
    Blog,
    PdfMenu,
    Other,
}

impl PageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Homepage => "homepage",
            PageType::Menu => "menu",
            PageType::Contact => "contact",
            PageType::About => "about",
            PageType::Reservation => "reservation",
            PageType::Location => "location",
            PageType::Blog => "blog",
            PageType::PdfMenu => "pdf_menu",
            PageType::Other => "other",
        }
    }

    /// Page types worth visiting before anything else during the crawl.
    pub fn is_priority(self) -> bool {
        matches!(
            self,
            PageType::Menu | PageType::Contact | PageType::About | PageType::Reservation
        )
    }
}

/// Classifies a URL by path keywords alone.
pub fn classify_url(url: &str) -> PageType {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    let is_pdf = path.ends_with(".pdf");
    let menuish = ["menu", "carte", "dinner", "lunch", "brunch", "food", "drink"]
        .iter()
        .any(|kw| path.contains(kw));
    if is_pdf {
        return if menuish { PageType::PdfMenu } else { PageType::Other };
    }
    if menuish {
        return PageType::Menu;
    }
    if path.contains("contact") {
        return PageType::Contact;
    }
    if path.contains("about") || path.contains("story") || path.contains("team") {
        return PageType::About;
    }
    if path.contains("reserv") || path.contains("book") {
        return PageType::Reservation;
    }
    if path.contains("location") || path.contains("directions") || path.contains("find-us") || path.contains("hours")
    {
        return PageType::Location;
    }
    if path.contains("blog") || path.contains("news") || path.contains("press") {
        return PageType::Blog;
    }
    PageType::Other
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedUrl {
    pub url: String,
    pub page_type: PageType,
}

/// # NDOC
/// component: `extractors::sitemap`
/// purpose: Result of the sitemap pass: classified site URLs plus the PDF
///   subset, with fetch errors recorded instead of raised.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SitemapAnalysis {
    pub classified_urls: Vec<ClassifiedUrl>,
    pub pdf_urls: Vec<String>,
    pub sitemaps_read: usize,
    pub errors: Vec<String>,
}

enum SitemapDoc {
    Index(Vec<String>),
    UrlSet(Vec<String>),
}

/// Parses one sitemap document, distinguishing index files from url sets.
/// Falls back to a lenient `<loc>` scan when strict XML parsing fails.
fn parse_sitemap_document(body: &str) -> SitemapDoc {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut is_index = false;
    let mut in_loc = false;
    let mut locs: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    let mut parse_failed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"sitemapindex" => is_index = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if in_loc {
                    if let Ok(value) = text.unescape() {
                        let value = value.trim().to_string();
                        if !value.is_empty() {
                            locs.push(value);
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => {
                parse_failed = true;
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    if parse_failed && locs.is_empty() {
        locs = LOC_FALLBACK_RE
            .captures_iter(body)
            .map(|c| c[1].trim().to_string())
            .collect();
        is_index = body.contains("<sitemapindex");
    }

    if is_index {
        SitemapDoc::Index(locs)
    } else {
        SitemapDoc::UrlSet(locs)
    }
}

fn sitemap_directives_from_robots(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        })
        .filter(|v| !v.is_empty())
        .collect()
}

/// # NDOC
/// component: `extractors::sitemap`
/// purpose: Fetch robots + sitemaps for a site and classify every discovered
///   URL. Bounded fan-out: at most 10 sub-sitemaps and 2000 URLs total, with
///   a visited set guarding against index cycles.
pub async fn analyze_site(client: &reqwest::Client, base: &Url) -> ExtractResult<SitemapAnalysis> {
    let mut analysis = SitemapAnalysis::default();

    let robots_url = base.join("/robots.txt").map_err(|e| {
        crate::contracts::ExtractError::input(format!("cannot derive robots url: {}", e))
    })?;
    let mut queue: Vec<String> = match fetch_text(client, robots_url.as_str()).await {
        Ok(body) => sitemap_directives_from_robots(&body),
        Err(err) => {
            analysis.errors.push(format!("robots.txt: {}", err.message));
            Vec::new()
        }
    };
    if queue.is_empty() {
        // Conventional fallbacks when robots has no directive.
        for probe in ["/sitemap.xml", "/sitemap_index.xml"] {
            if let Ok(u) = base.join(probe) {
                queue.push(u.to_string());
            }
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut page_urls: Vec<String> = Vec::new();

    while let Some(sitemap_url) = queue.pop() {
        if analysis.sitemaps_read >= MAX_SUB_SITEMAPS || page_urls.len() >= MAX_URLS_TOTAL {
            break;
        }
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }
        let body = match fetch_text(client, &sitemap_url).await {
            Ok(body) => body,
            Err(err) => {
                analysis.errors.push(format!("{}: {}", sitemap_url, err.message));
                continue;
            }
        };
        analysis.sitemaps_read += 1;
        match parse_sitemap_document(&body) {
            SitemapDoc::Index(children) => {
                for child in children {
                    if !visited.contains(&child) {
                        queue.push(child);
                    }
                }
            }
            SitemapDoc::UrlSet(urls) => {
                let remaining = MAX_URLS_TOTAL.saturating_sub(page_urls.len());
                page_urls.extend(urls.into_iter().take(remaining));
            }
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    for url in page_urls {
        if !seen.insert(url.clone()) {
            continue;
        }
        let page_type = classify_url(&url);
        if page_type == PageType::PdfMenu || url.to_lowercase().ends_with(".pdf") {
            analysis.pdf_urls.push(url.clone());
        }
        analysis.classified_urls.push(ClassifiedUrl { url, page_type });
    }

    log::info!(
        target: "sitemap",
        sitemaps_read = analysis.sitemaps_read,
        urls = analysis.classified_urls.len(),
        pdfs = analysis.pdf_urls.len();
        "sitemap analysis complete"
    );
    Ok(analysis)
}
