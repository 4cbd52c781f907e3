use crate::data_models::analysis::StrategicAnalysis;
use crate::data_models::record::{FinalRecord, OverallStatus};

const MENU_HIGHLIGHT_COUNT: usize = 12;

/// # NDOC
/// component: `report`
/// purpose: Assemble the human-readable report body from a canonical record
///   and optional strategic analysis. Downstream PDF templating consumes this
///   markdown; rendering itself lives outside the engine.
pub fn build_report_markdown(
    record: &FinalRecord,
    analysis: Option<&StrategicAnalysis>,
) -> String {
    let mut report = String::new();

    let title = record
        .name
        .canonical
        .as_deref()
        .unwrap_or(record.target_url.as_str());
    report.push_str(&format!("# Business Intelligence Report: {}\n\n", title));
    report.push_str(&format!("Target site: {}\n\n", record.target_url));

    push_profile_section(&mut report, record);
    push_menu_section(&mut report, record);
    push_competitor_section(&mut report, record);
    if let Some(analysis) = analysis {
        push_analysis_section(&mut report, analysis);
    } else {
        report.push_str("## Strategic Analysis\n\n_Analysis unavailable for this run._\n\n");
    }
    push_run_section(&mut report, record);

    report
}

fn push_profile_section(report: &mut String, record: &FinalRecord) {
    report.push_str("## Business Profile\n\n");
    if let Some(description) = &record.description.canonical {
        report.push_str(&format!("{}\n\n", description));
    }
    if let Some(address) = &record.address.canonical {
        report.push_str(&format!("- Address: {}\n", address.raw));
    }
    if let Some(phone) = &record.phone.canonical {
        let shown = phone.e164.as_deref().unwrap_or(phone.raw.as_str());
        report.push_str(&format!("- Phone: {}\n", shown));
    }
    if let Some(emails) = &record.emails.canonical {
        report.push_str(&format!("- Email: {}\n", emails.join(", ")));
    }
    if let Some(website) = &record.website.canonical {
        report.push_str(&format!("- Website: {}\n", website));
    }
    if let Some(cuisines) = &record.cuisines.canonical {
        report.push_str(&format!("- Cuisine: {}\n", cuisines.join(", ")));
    }
    if let Some(price_range) = &record.price_range.canonical {
        report.push_str(&format!("- Price range: {}\n", price_range));
    }
    if let Some(rating) = record.rating.canonical {
        let reviews = record
            .review_count
            .canonical
            .map(|count| format!(" across {} reviews", count))
            .unwrap_or_default();
        report.push_str(&format!("- Rating: {:.1}{}\n", rating, reviews));
    }
    if let Some(social) = &record.social.canonical {
        for (platform, url) in &social.platforms {
            report.push_str(&format!("- {}: {}\n", platform, url));
        }
    }
    report.push('\n');
    if let Some(hours) = &record.hours.canonical {
        report.push_str("### Hours\n\n");
        for line in hours.lines() {
            report.push_str(&format!("- {}\n", line));
        }
        report.push('\n');
    }
}

fn push_menu_section(report: &mut String, record: &FinalRecord) {
    if record.menu_items.is_empty() {
        return;
    }
    report.push_str(&format!(
        "## Menu ({} items extracted)\n\n",
        record.menu_items.len()
    ));
    for item in record.menu_items.iter().take(MENU_HIGHLIGHT_COUNT) {
        let price = item
            .price_numeric
            .map(|p| format!(" — {:.2}", p))
            .or_else(|| item.price_raw.clone().map(|p| format!(" — {}", p)))
            .unwrap_or_default();
        let category = item
            .category
            .as_deref()
            .map(|c| format!(" _({})_", c))
            .unwrap_or_default();
        report.push_str(&format!("- {}{}{}\n", item.name, price, category));
    }
    if record.menu_items.len() > MENU_HIGHLIGHT_COUNT {
        report.push_str(&format!(
            "- …and {} more\n",
            record.menu_items.len() - MENU_HIGHLIGHT_COUNT
        ));
    }
    report.push('\n');
}

fn push_competitor_section(report: &mut String, record: &FinalRecord) {
    if record.competitors.is_empty() {
        return;
    }
    report.push_str("## Nearby Competitors\n\n");
    for competitor in &record.competitors {
        let rating = competitor
            .rating
            .map(|r| format!(", rated {:.1}", r))
            .unwrap_or_default();
        let reviews = competitor
            .review_count
            .map(|c| format!(" ({} reviews)", c))
            .unwrap_or_default();
        report.push_str(&format!("- {}{}{}\n", competitor.name, rating, reviews));
    }
    report.push('\n');
}

fn push_analysis_section(report: &mut String, analysis: &StrategicAnalysis) {
    report.push_str("## Strategic Analysis\n\n");
    report.push_str(&format!("{}\n\n", analysis.executive_hook));
    report.push_str("### Competitive Landscape\n\n");
    report.push_str(&format!("{}\n\n", analysis.competitive_landscape));

    let sections: [(&str, &Vec<String>); 4] = [
        ("Top Opportunities", &analysis.top_opportunities),
        ("Action Items", &analysis.action_items),
        ("Premium Insights Preview", &analysis.premium_teasers),
        ("Forward-Looking Insights", &analysis.forward_looking_insights),
    ];
    for (heading, entries) in sections {
        if entries.is_empty() {
            continue;
        }
        report.push_str(&format!("### {}\n\n", heading));
        for entry in entries {
            report.push_str(&format!("- {}\n", entry));
        }
        report.push('\n');
    }
}

fn push_run_section(report: &mut String, record: &FinalRecord) {
    let metadata = &record.extraction_metadata;
    report.push_str("## Extraction Run\n\n");
    let status = match metadata.overall_status {
        OverallStatus::Ok => "complete",
        OverallStatus::Partial => "partial",
        OverallStatus::Error => "failed",
    };
    report.push_str(&format!("- Status: {}\n", status));
    report.push_str(&format!(
        "- Quality score: {:.2}\n",
        metadata.final_quality_score
    ));
    report.push_str(&format!("- Cost: ${:.4}\n", metadata.total_cost));
    report.push_str(&format!(
        "- Phases completed: {}\n",
        metadata
            .phases_completed
            .iter()
            .map(|p| p.index().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    report.push_str(&format!(
        "- Artifacts captured: {}\n",
        record.artifacts.len()
    ));
    if let Some(message) = &metadata.error_message {
        report.push_str(&format!("- Note: {}\n", message));
    }
    report.push('\n');
}
