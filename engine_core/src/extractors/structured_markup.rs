use crate::data_models::contact::{platform_for_host, SocialLink, StructuredAddress};
use crate::data_models::record::{GeoPoint, Observations, RawField, SourceTag};
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

const JSONLD_CONFIDENCE: f64 = 0.9;
const MICRODATA_CONFIDENCE: f64 = 0.8;
const OPENGRAPH_CONFIDENCE: f64 = 0.6;

/// Schema.org types treated as restaurant-shaped.
const RESTAURANT_TYPES: [&str; 6] = [
    "Restaurant",
    "FoodEstablishment",
    "CafeOrCoffeeShop",
    "BarOrPub",
    "Bakery",
    "LocalBusiness",
];

/// # NDOC
/// component: `extractors::structured_markup`
/// purpose: Output of the markup pass: observations plus menu URLs worth
///   prioritizing in the crawl phase.
#[derive(Debug, Default)]
pub struct MarkupExtraction {
    pub observations: Observations,
    pub menu_urls: Vec<String>,
}

/// # NDOC
/// component: `extractors::structured_markup`
/// purpose: Parse JSON-LD, microdata, and OpenGraph from one HTML document
///   into schema_org-tagged observations. Pure: no network I/O; malformed
///   markup yields an empty partial, never an error.
pub fn extract_structured_markup(
    html: &str,
    base_url: &Url,
    observed_at: DateTime<Utc>,
) -> MarkupExtraction {
    let document = Html::parse_document(html);
    let mut out = MarkupExtraction::default();

    extract_json_ld(&document, base_url, observed_at, &mut out);
    extract_microdata(&document, observed_at, &mut out);
    extract_opengraph(&document, observed_at, &mut out);

    out
}

fn field<T>(value: T, confidence: f64, observed_at: DateTime<Utc>) -> RawField<T> {
    RawField::new(value, SourceTag::SchemaOrg, confidence, observed_at)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// --- JSON-LD ---

fn extract_json_ld(
    document: &Html,
    base_url: &Url,
    observed_at: DateTime<Utc>,
    out: &mut MarkupExtraction,
) {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return;
    };
    for script in document.select(&selector) {
        let text = script.text().collect::<String>();
        let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        for node in flatten_ld_nodes(&parsed) {
            if is_restaurant_node(node) {
                map_restaurant_node(node, base_url, observed_at, out);
            }
        }
    }
}

/// Flattens top-level arrays and `@graph` containers into candidate nodes.
fn flatten_ld_nodes(value: &Value) -> Vec<&Value> {
    let mut nodes = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                nodes.extend(flatten_ld_nodes(item));
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                nodes.extend(flatten_ld_nodes(graph));
            }
            nodes.push(value);
        }
        _ => {}
    }
    nodes
}

fn node_types(node: &Value) -> Vec<&str> {
    match &node["@type"] {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn is_restaurant_node(node: &Value) -> bool {
    node_types(node)
        .iter()
        .any(|t| RESTAURANT_TYPES.contains(t))
}

fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => non_empty(s).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(non_empty)
            .collect(),
        _ => Vec::new(),
    }
}

fn map_restaurant_node(
    node: &Value,
    base_url: &Url,
    observed_at: DateTime<Utc>,
    out: &mut MarkupExtraction,
) {
    map_address(&node["address"], observed_at, out);
    map_geo(&node["geo"], observed_at, out);
    map_hours(node, observed_at, out);

    let obs = &mut out.observations;

    if let Some(name) = node["name"].as_str().and_then(|s| non_empty(s)) {
        obs.name.push(field(name, JSONLD_CONFIDENCE, observed_at));
    }
    if let Some(description) = node["description"].as_str().and_then(|s| non_empty(s)) {
        obs.description
            .push(field(description, JSONLD_CONFIDENCE, observed_at));
    }
    if let Some(phone) = node["telephone"].as_str().and_then(|s| non_empty(s)) {
        obs.phones.push(field(phone, JSONLD_CONFIDENCE, observed_at));
    }
    if let Some(email) = node["email"].as_str().and_then(|s| non_empty(s)) {
        obs.emails.push(field(email, JSONLD_CONFIDENCE, observed_at));
    }
    if let Some(url) = node["url"].as_str().and_then(|s| non_empty(s)) {
        obs.website.push(field(url, JSONLD_CONFIDENCE, observed_at));
    }
    if let Some(price_range) = node["priceRange"].as_str().and_then(|s| non_empty(s)) {
        obs.price_range
            .push(field(price_range, JSONLD_CONFIDENCE, observed_at));
    }
    for cuisine in string_or_list(&node["servesCuisine"]) {
        obs.cuisines.push(field(cuisine, JSONLD_CONFIDENCE, observed_at));
    }

    if let Some(rating) = node["aggregateRating"]["ratingValue"]
        .as_f64()
        .or_else(|| {
            node["aggregateRating"]["ratingValue"]
                .as_str()
                .and_then(|s| s.parse().ok())
        })
    {
        obs.rating.push(field(rating, JSONLD_CONFIDENCE, observed_at));
    }
    if let Some(count) = node["aggregateRating"]["reviewCount"]
        .as_u64()
        .or_else(|| {
            node["aggregateRating"]["reviewCount"]
                .as_str()
                .and_then(|s| s.parse().ok())
        })
    {
        obs.review_count
            .push(field(count, JSONLD_CONFIDENCE, observed_at));
    }

    for same_as in string_or_list(&node["sameAs"]) {
        if let Ok(parsed) = Url::parse(&same_as) {
            if let Some(platform) = parsed.host_str().and_then(platform_for_host) {
                obs.social.push(field(
                    SocialLink {
                        platform: platform.to_string(),
                        url: same_as,
                    },
                    JSONLD_CONFIDENCE,
                    observed_at,
                ));
            }
        }
    }

    let menu_value = if node["hasMenu"].is_null() {
        &node["menu"]
    } else {
        &node["hasMenu"]
    };
    let menu_candidate = menu_value
        .as_str()
        .map(str::to_string)
        .or_else(|| menu_value["url"].as_str().map(str::to_string));
    if let Some(menu_url) = menu_candidate {
        if let Ok(resolved) = base_url.join(&menu_url) {
            out.menu_urls.push(resolved.to_string());
        }
    }
}

fn map_address(address: &Value, observed_at: DateTime<Utc>, out: &mut MarkupExtraction) {
    if let Some(raw) = address.as_str().and_then(non_empty) {
        out.observations
            .address
            .push(field(raw, JSONLD_CONFIDENCE, observed_at));
        return;
    }
    if !address.is_object() {
        return;
    }
    let structured = StructuredAddress {
        street: address["streetAddress"].as_str().and_then(non_empty),
        city: address["addressLocality"].as_str().and_then(non_empty),
        region: address["addressRegion"].as_str().and_then(non_empty),
        postal_code: address["postalCode"].as_str().and_then(non_empty),
        country: address["addressCountry"]
            .as_str()
            .or_else(|| address["addressCountry"]["name"].as_str())
            .and_then(non_empty),
    };
    let parts: Vec<&String> = [
        &structured.street,
        &structured.city,
        &structured.region,
        &structured.postal_code,
        &structured.country,
    ]
    .into_iter()
    .flatten()
    .collect();
    if parts.is_empty() {
        return;
    }
    let raw = parts
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    out.observations
        .address
        .push(field(raw, JSONLD_CONFIDENCE, observed_at));
    out.observations
        .address_components
        .push(field(structured, JSONLD_CONFIDENCE, observed_at));
}

fn map_geo(geo: &Value, observed_at: DateTime<Utc>, out: &mut MarkupExtraction) {
    let lat = geo["latitude"]
        .as_f64()
        .or_else(|| geo["latitude"].as_str().and_then(|s| s.parse().ok()));
    let lon = geo["longitude"]
        .as_f64()
        .or_else(|| geo["longitude"].as_str().and_then(|s| s.parse().ok()));
    if let (Some(lat), Some(lon)) = (lat, lon) {
        out.observations
            .geo
            .push(field(GeoPoint { lat, lon }, JSONLD_CONFIDENCE, observed_at));
    }
}

fn map_hours(node: &Value, observed_at: DateTime<Utc>, out: &mut MarkupExtraction) {
    let mut lines = string_or_list(&node["openingHours"]);
    if let Some(specs) = node["openingHoursSpecification"].as_array() {
        for spec in specs {
            let days = string_or_list(&spec["dayOfWeek"])
                .iter()
                .map(|d| d.rsplit('/').next().unwrap_or(d).to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let opens = spec["opens"].as_str().unwrap_or("");
            let closes = spec["closes"].as_str().unwrap_or("");
            if !days.is_empty() && !opens.is_empty() && !closes.is_empty() {
                lines.push(format!("{}: {}-{}", days, opens, closes));
            }
        }
    }
    if !lines.is_empty() {
        out.observations
            .hours
            .push(field(lines.join("\n"), JSONLD_CONFIDENCE, observed_at));
    }
}

// --- Microdata ---

fn extract_microdata(document: &Html, observed_at: DateTime<Utc>, out: &mut MarkupExtraction) {
    let Ok(scope_selector) = Selector::parse("[itemscope][itemtype]") else {
        return;
    };
    let Ok(prop_selector) = Selector::parse("[itemprop]") else {
        return;
    };
    for scope in document.select(&scope_selector) {
        let itemtype = scope.value().attr("itemtype").unwrap_or("");
        if !RESTAURANT_TYPES
            .iter()
            .any(|t| itemtype.ends_with(t))
        {
            continue;
        }
        let mut structured = StructuredAddress::default();
        for prop in scope.select(&prop_selector) {
            let name = prop.value().attr("itemprop").unwrap_or("");
            let value = prop
                .value()
                .attr("content")
                .map(str::to_string)
                .unwrap_or_else(|| prop.text().collect::<String>());
            let Some(value) = non_empty(&value) else {
                continue;
            };
            let obs = &mut out.observations;
            match name {
                "name" => obs.name.push(field(value, MICRODATA_CONFIDENCE, observed_at)),
                "telephone" => obs.phones.push(field(value, MICRODATA_CONFIDENCE, observed_at)),
                "servesCuisine" => {
                    obs.cuisines.push(field(value, MICRODATA_CONFIDENCE, observed_at))
                }
                "priceRange" => {
                    obs.price_range.push(field(value, MICRODATA_CONFIDENCE, observed_at))
                }
                "openingHours" => obs.hours.push(field(value, MICRODATA_CONFIDENCE, observed_at)),
                "streetAddress" => structured.street = Some(value),
                "addressLocality" => structured.city = Some(value),
                "addressRegion" => structured.region = Some(value),
                "postalCode" => structured.postal_code = Some(value),
                "addressCountry" => structured.country = Some(value),
                _ => {}
            }
        }
        let parts: Vec<&String> = [
            &structured.street,
            &structured.city,
            &structured.region,
            &structured.postal_code,
            &structured.country,
        ]
        .into_iter()
        .flatten()
        .collect();
        if !parts.is_empty() {
            let raw = parts
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            out.observations
                .address
                .push(field(raw, MICRODATA_CONFIDENCE, observed_at));
            out.observations
                .address_components
                .push(field(structured, MICRODATA_CONFIDENCE, observed_at));
        }
    }
}

// --- OpenGraph ---

fn extract_opengraph(document: &Html, observed_at: DateTime<Utc>, out: &mut MarkupExtraction) {
    let Ok(selector) = Selector::parse("meta[property], meta[name]") else {
        return;
    };
    for meta in document.select(&selector) {
        let key = meta
            .value()
            .attr("property")
            .or_else(|| meta.value().attr("name"))
            .unwrap_or("");
        let Some(content) = meta.value().attr("content").and_then(non_empty) else {
            continue;
        };
        let obs = &mut out.observations;
        match key {
            "og:title" | "og:site_name" => {
                obs.name.push(field(content, OPENGRAPH_CONFIDENCE, observed_at))
            }
            "og:description" | "description" => {
                obs.description
                    .push(field(content, OPENGRAPH_CONFIDENCE, observed_at))
            }
            "og:url" => obs.website.push(field(content, OPENGRAPH_CONFIDENCE, observed_at)),
            _ => {}
        }
    }
}
