use crate::data_models::record::{Observations, RawField, SourceTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const CRITICAL_WEIGHT: f64 = 2.0;
const IMPORTANT_WEIGHT: f64 = 1.0;

const CONFIDENCE_MULTI_SOURCE: f64 = 1.0;
const CONFIDENCE_SINGLE_SOURCE: f64 = 0.6;
const CONFIDENCE_HEURISTIC_ONLY: f64 = 0.3;

const COMPLETENESS_SHARE: f64 = 0.4;
const CONFIDENCE_SHARE: f64 = 0.3;
const RELIABILITY_SHARE: f64 = 0.3;

/// # NDOC
/// component: `quality`
/// purpose: Quality snapshot of a working record, evaluated at phase gates.
/// invariants:
///   - All scores live in `[0, 1]`.
///   - `overall = 0.4*completeness + 0.3*confidence + 0.3*reliability`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub completeness: f64,
    pub confidence: f64,
    pub reliability: f64,
    pub overall: f64,
    pub missing_critical_fields: Vec<String>,
}

struct FieldSample {
    path: &'static str,
    weight: f64,
    sources: BTreeSet<SourceTag>,
}

fn sources_of<T>(fields: &[RawField<T>]) -> BTreeSet<SourceTag> {
    fields.iter().map(|f| f.source).collect()
}

fn collect_samples(evidence: &Observations) -> Vec<FieldSample> {
    let menu_sources: BTreeSet<SourceTag> =
        evidence.menu_items.iter().map(|i| i.source_tag).collect();
    vec![
        FieldSample {
            path: "name",
            weight: CRITICAL_WEIGHT,
            sources: sources_of(&evidence.name),
        },
        FieldSample {
            path: "address",
            weight: CRITICAL_WEIGHT,
            sources: sources_of(&evidence.address),
        },
        FieldSample {
            path: "phone",
            weight: CRITICAL_WEIGHT,
            sources: sources_of(&evidence.phones),
        },
        FieldSample {
            path: "website",
            weight: CRITICAL_WEIGHT,
            sources: sources_of(&evidence.website),
        },
        FieldSample {
            path: "hours",
            weight: CRITICAL_WEIGHT,
            sources: sources_of(&evidence.hours),
        },
        FieldSample {
            path: "menu_items",
            weight: IMPORTANT_WEIGHT,
            sources: menu_sources,
        },
        FieldSample {
            path: "cuisines",
            weight: IMPORTANT_WEIGHT,
            sources: sources_of(&evidence.cuisines),
        },
        FieldSample {
            path: "price_range",
            weight: IMPORTANT_WEIGHT,
            sources: sources_of(&evidence.price_range),
        },
        FieldSample {
            path: "rating",
            weight: IMPORTANT_WEIGHT,
            sources: sources_of(&evidence.rating),
        },
        FieldSample {
            path: "social",
            weight: IMPORTANT_WEIGHT,
            sources: sources_of(&evidence.social),
        },
        FieldSample {
            path: "description",
            weight: IMPORTANT_WEIGHT,
            sources: sources_of(&evidence.description),
        },
        FieldSample {
            path: "geo",
            weight: IMPORTANT_WEIGHT,
            sources: sources_of(&evidence.geo),
        },
    ]
}

fn field_confidence(sources: &BTreeSet<SourceTag>) -> f64 {
    if sources.iter().all(|s| s.is_heuristic()) {
        CONFIDENCE_HEURISTIC_ONLY
    } else if sources.len() >= 2 {
        CONFIDENCE_MULTI_SOURCE
    } else {
        CONFIDENCE_SINGLE_SOURCE
    }
}

/// # NDOC
/// component: `quality`
/// purpose: Score a working record on completeness, cross-source agreement,
///   and source reliability. Pure over the observation lists.
pub fn assess(evidence: &Observations) -> QualityReport {
    let samples = collect_samples(evidence);

    let total_weight: f64 = samples.iter().map(|s| s.weight).sum();
    let covered_weight: f64 = samples
        .iter()
        .filter(|s| !s.sources.is_empty())
        .map(|s| s.weight)
        .sum();
    let completeness = covered_weight / total_weight;

    let populated: Vec<&FieldSample> =
        samples.iter().filter(|s| !s.sources.is_empty()).collect();
    let (confidence, reliability) = if populated.is_empty() {
        (0.0, 0.0)
    } else {
        let confidence = populated
            .iter()
            .map(|s| field_confidence(&s.sources) * s.weight)
            .sum::<f64>()
            / populated.iter().map(|s| s.weight).sum::<f64>();
        let reliability = populated
            .iter()
            .map(|s| {
                s.sources
                    .iter()
                    .map(|tag| tag.reliability_prior())
                    .fold(0.0_f64, f64::max)
                    * s.weight
            })
            .sum::<f64>()
            / populated.iter().map(|s| s.weight).sum::<f64>();
        (confidence, reliability)
    };

    let overall = COMPLETENESS_SHARE * completeness
        + CONFIDENCE_SHARE * confidence
        + RELIABILITY_SHARE * reliability;

    let missing_critical_fields = samples
        .iter()
        .filter(|s| s.weight == CRITICAL_WEIGHT && s.sources.is_empty())
        .map(|s| s.path.to_string())
        .collect();

    QualityReport {
        completeness,
        confidence,
        reliability,
        overall,
        missing_critical_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn raw(value: &str, source: SourceTag) -> RawField<String> {
        RawField::new(
            value.to_string(),
            source,
            0.8,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn empty_record_scores_zero_and_lists_all_critical_fields() {
        let report = assess(&Observations::default());
        assert_eq!(report.overall, 0.0);
        assert_eq!(
            report.missing_critical_fields,
            vec!["name", "address", "phone", "website", "hours"]
        );
    }

    #[test]
    fn multi_source_fields_outscore_single_source() {
        let mut single = Observations::default();
        single.name.push(raw("Example Bistro", SourceTag::Places));

        let mut multi = Observations::default();
        multi.name.push(raw("Example Bistro", SourceTag::Places));
        multi.name.push(raw("Example Bistro", SourceTag::SchemaOrg));

        assert!(assess(&multi).confidence > assess(&single).confidence);
    }

    #[test]
    fn heuristic_only_fields_score_low_confidence() {
        let mut obs = Observations::default();
        obs.hours.push(raw("Mon: 9-5", SourceTag::Dom));
        let report = assess(&obs);
        assert_relative_eq!(report.confidence, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn reliability_takes_max_prior_per_field() {
        let mut obs = Observations::default();
        obs.phones.push(raw("415 555 0101", SourceTag::Dom));
        obs.phones.push(raw("+1 415 555 0101", SourceTag::Places));
        let report = assess(&obs);
        assert_relative_eq!(report.reliability, 0.95, epsilon = 1e-9);
    }

    #[test]
    fn overall_is_the_documented_weighted_sum() {
        let mut obs = Observations::default();
        obs.name.push(raw("Example Bistro", SourceTag::Places));
        obs.website.push(raw("https://example-bistro.test", SourceTag::Places));
        let report = assess(&obs);
        let expected = 0.4 * report.completeness + 0.3 * report.confidence + 0.3 * report.reliability;
        assert_relative_eq!(report.overall, expected, epsilon = 1e-12);
    }

    #[test]
    fn missing_critical_fields_shrink_as_evidence_arrives() {
        let mut obs = Observations::default();
        obs.name.push(raw("Example Bistro", SourceTag::Places));
        obs.address.push(raw("123 Main St", SourceTag::Places));
        obs.phones.push(raw("+14155550101", SourceTag::Places));
        obs.website.push(raw("https://example-bistro.test", SourceTag::Places));
        let report = assess(&obs);
        assert_eq!(report.missing_critical_fields, vec!["hours"]);
    }

    #[test]
    fn rich_multi_source_record_clears_the_strictest_gate() {
        let mut obs = Observations::default();
        for source in [SourceTag::Places, SourceTag::SchemaOrg] {
            obs.name.push(raw("Example Bistro", source));
            obs.address.push(raw("123 Main St", source));
            obs.phones.push(raw("+14155550101", source));
            obs.website.push(raw("https://example-bistro.test", source));
            obs.hours.push(raw("Mon-Sun 11-10", source));
            obs.cuisines.push(raw("Italian", source));
            obs.price_range.push(raw("$$", source));
            obs.description.push(raw("A bistro.", source));
        }
        obs.rating.push(RawField::new(
            4.5,
            SourceTag::Places,
            0.95,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        obs.rating.push(RawField::new(
            4.5,
            SourceTag::SchemaOrg,
            0.9,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let report = assess(&obs);
        assert!(report.missing_critical_fields.is_empty());
        // menu/social/geo absent: completeness 14/17.
        assert!(report.overall > 0.8);
    }
}
