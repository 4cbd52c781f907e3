use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static E164_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("static regex"));

/// # NDOC
/// component: `data_models::contact`
/// purpose: Phone number with raw form and, when derivable, canonical E.164.
/// invariants:
///   - `e164`, when present, passes E.164 validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phone {
    pub raw: String,
    #[serde(default)]
    pub e164: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

impl Phone {
    pub fn is_valid_e164(candidate: &str) -> bool {
        E164_RE.is_match(candidate)
    }
}

/// # NDOC
/// component: `data_models::contact`
/// purpose: Structured address components backing a raw address string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredAddress {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// # NDOC
/// component: `data_models::contact`
/// purpose: Raw address plus optional structured breakdown.
/// invariants:
///   - If `structured` is present, every populated component appears in the
///     raw string after case/whitespace normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    pub raw: String,
    #[serde(default)]
    pub structured: Option<StructuredAddress>,
}

fn squash(value: &str) -> String {
    value.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Address {
    /// Substring-equivalence check between structured components and the raw
    /// string, after case/whitespace normalization.
    pub fn structured_is_consistent(&self) -> bool {
        let Some(structured) = &self.structured else {
            return true;
        };
        let raw = squash(&self.raw);
        [
            &structured.street,
            &structured.city,
            &structured.region,
            &structured.postal_code,
            &structured.country,
        ]
        .into_iter()
        .flatten()
        .all(|component| raw.contains(&squash(component)))
    }
}

/// Platform vocabulary for social link collapsing. Anything else lands in
/// the free-form `other` map.
pub const SOCIAL_PLATFORMS: [&str; 8] = [
    "facebook",
    "instagram",
    "x",
    "tiktok",
    "youtube",
    "linkedin",
    "yelp",
    "tripadvisor",
];

/// Maps a hostname to a platform key from the fixed vocabulary.
pub fn platform_for_host(host: &str) -> Option<&'static str> {
    let host = host.trim_start_matches("www.");
    match host {
        "facebook.com" | "fb.com" | "m.facebook.com" => Some("facebook"),
        "instagram.com" => Some("instagram"),
        "x.com" | "twitter.com" => Some("x"),
        "tiktok.com" => Some("tiktok"),
        "youtube.com" | "youtu.be" => Some("youtube"),
        "linkedin.com" => Some("linkedin"),
        "yelp.com" => Some("yelp"),
        "tripadvisor.com" => Some("tripadvisor"),
        _ => None,
    }
}

/// # NDOC
/// component: `data_models::contact`
/// purpose: One observed social profile link before canonical collapsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialLink {
    pub platform: String,
    pub url: String,
}

/// # NDOC
/// component: `data_models::contact`
/// purpose: Canonical platform -> URL mapping with a free-form overflow map.
/// invariants:
///   - Keys of `platforms` come from `SOCIAL_PLATFORMS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialLinks {
    #[serde(default)]
    pub platforms: BTreeMap<String, String>,
    #[serde(default)]
    pub other: BTreeMap<String, String>,
}

impl SocialLinks {
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty() && self.other.is_empty()
    }

    /// First-wins insert per platform; later URLs for a taken platform go to
    /// `other` keyed by host.
    pub fn insert(&mut self, platform: &str, url: &str) {
        if SOCIAL_PLATFORMS.contains(&platform) {
            if !self.platforms.contains_key(platform) {
                self.platforms.insert(platform.to_string(), url.to_string());
                return;
            }
            if self.platforms.get(platform).map(String::as_str) == Some(url) {
                return;
            }
        }
        let key = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            .unwrap_or_else(|| platform.to_string());
        self.other.entry(key).or_insert_with(|| url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_validation_accepts_canonical_us_number() {
        assert!(Phone::is_valid_e164("+14155550101"));
        assert!(!Phone::is_valid_e164("+0415555"));
        assert!(!Phone::is_valid_e164("4155550101"));
        assert!(!Phone::is_valid_e164("+1 415 555 0101"));
    }

    #[test]
    fn structured_address_consistency_ignores_case_and_spacing() {
        let address = Address {
            raw: "123  Main St, San Francisco, CA 94105, USA".to_string(),
            structured: Some(StructuredAddress {
                street: Some("123 Main St".to_string()),
                city: Some("san francisco".to_string()),
                region: Some("CA".to_string()),
                postal_code: Some("94105".to_string()),
                country: Some("USA".to_string()),
            }),
        };
        assert!(address.structured_is_consistent());
    }

    #[test]
    fn structured_address_inconsistency_detected() {
        let address = Address {
            raw: "123 Main St".to_string(),
            structured: Some(StructuredAddress {
                city: Some("Oakland".to_string()),
                ..Default::default()
            }),
        };
        assert!(!address.structured_is_consistent());
    }

    #[test]
    fn social_insert_is_first_wins_with_overflow() {
        let mut links = SocialLinks::default();
        links.insert("facebook", "https://facebook.com/bistro");
        links.insert("facebook", "https://facebook.com/bistro-old");
        links.insert("untappd", "https://untappd.com/v/bistro");
        assert_eq!(
            links.platforms.get("facebook").map(String::as_str),
            Some("https://facebook.com/bistro")
        );
        assert_eq!(links.other.len(), 2);
        assert!(links.other.contains_key("untappd.com"));
    }

    #[test]
    fn platform_host_matching_covers_vocabulary() {
        assert_eq!(platform_for_host("www.instagram.com"), Some("instagram"));
        assert_eq!(platform_for_host("twitter.com"), Some("x"));
        assert_eq!(platform_for_host("example.com"), None);
    }
}
