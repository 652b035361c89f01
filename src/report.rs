use std::fmt::Write as _;
use std::time::Duration;

use chrono::Utc;

use crate::schema::{AggregatedReport, BatchSummary, Insights, TokenUsage};
use crate::stats::StatsSnapshot;

/// Separator placed between per-batch summaries in the merged body.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

const INSIGHT_PLACEHOLDER: &str = "No specific insights found.";

const COMMUNITY_ACTIVITY_KEYWORDS: &[&str] =
    &["activity", "engagement", "community", "participation"];
const FEATURE_FEEDBACK_KEYWORDS: &[&str] =
    &["feedback", "feature", "request", "improvement", "suggestion"];
const SUCCESS_STORY_KEYWORDS: &[&str] =
    &["success", "story", "case study", "achievement", "win"];
const SUPPORT_PATTERN_KEYWORDS: &[&str] = &["support", "help", "question", "issue", "problem"];
const EMERGING_TREND_KEYWORDS: &[&str] =
    &["trend", "emerging", "pattern", "development", "growth"];

/// Merge per-batch summaries into one report. Summaries are joined in
/// batch index order with their text untouched; usage and elapsed time
/// are summed across batches.
pub fn aggregate(results: &[BatchSummary], total_records: usize) -> AggregatedReport {
    let mut ordered: Vec<&BatchSummary> = results.iter().collect();
    ordered.sort_by_key(|r| r.batch_index);

    let mut usage = TokenUsage::default();
    let mut total_elapsed = Duration::ZERO;
    for result in &ordered {
        usage.add(result.usage);
        total_elapsed += result.elapsed;
    }

    let body = ordered
        .iter()
        .map(|r| r.summary.as_str())
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR);
    let insights = extract_insights(&body);

    AggregatedReport {
        total_batches: results.len(),
        total_records,
        usage,
        total_elapsed,
        body,
        insights,
    }
}

/// Pull one section of merged text per insight category by keyword match.
/// Categories with no matching section get a fixed placeholder.
pub fn extract_insights(body: &str) -> Insights {
    let sections = split_sections(body);
    Insights {
        community_activity: find_section(&sections, COMMUNITY_ACTIVITY_KEYWORDS),
        feature_feedback: find_section(&sections, FEATURE_FEEDBACK_KEYWORDS),
        success_stories: find_section(&sections, SUCCESS_STORY_KEYWORDS),
        support_patterns: find_section(&sections, SUPPORT_PATTERN_KEYWORDS),
        emerging_trends: find_section(&sections, EMERGING_TREND_KEYWORDS),
    }
}

/// A section is a `## ` heading line plus everything up to the next one.
fn split_sections(body: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut title: Option<String> = None;
    let mut content = String::new();

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some(t) = title.take() {
                sections.push((t, content.trim().to_string()));
            }
            title = Some(heading.trim().to_string());
            content = String::new();
        } else if title.is_some() {
            content.push_str(line);
            content.push('\n');
        }
    }
    if let Some(t) = title {
        sections.push((t, content.trim().to_string()));
    }
    sections
}

fn find_section(sections: &[(String, String)], keywords: &[&str]) -> String {
    for (title, content) in sections {
        let haystack = title.to_lowercase();
        if keywords.iter().any(|k| haystack.contains(k)) && !content.is_empty() {
            return content.clone();
        }
    }
    INSIGHT_PLACEHOLDER.to_string()
}

/// Render the final markdown document: header, summary statistics, the
/// pre-computed statistics block, merged analysis body, and the
/// structured insight sections.
pub fn render_markdown(report: &AggregatedReport, stats: &StatsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# Slack Community Analysis Report\n\n");
    let _ = writeln!(
        out,
        "*Generated on {}*\n",
        Utc::now().format("%B %-d, %Y at %H:%M UTC")
    );

    out.push_str("## Summary Statistics\n\n");
    let _ = writeln!(out, "- **Total Messages Analyzed:** {}", report.total_records);
    let _ = writeln!(out, "- **Batches Processed:** {}", report.total_batches);
    let _ = writeln!(
        out,
        "- **Total Tokens Used:** {} (prompt: {}, completion: {})",
        report.usage.total, report.usage.prompt, report.usage.completion
    );
    let _ = writeln!(
        out,
        "- **Processing Time:** {:.2}s\n",
        report.total_elapsed.as_secs_f64()
    );

    out.push_str(&stats.to_markdown());
    out.push_str("\n---\n\n## Analysis Results\n\n");
    out.push_str(&report.body);
    out.push_str("\n\n---\n\n## Structured Insights\n\n");

    let _ = writeln!(out, "### Community Activity\n\n{}\n", report.insights.community_activity);
    let _ = writeln!(out, "### Feature Feedback\n\n{}\n", report.insights.feature_feedback);
    let _ = writeln!(out, "### Success Stories\n\n{}\n", report.insights.success_stories);
    let _ = writeln!(out, "### Support Patterns\n\n{}\n", report.insights.support_patterns);
    let _ = writeln!(out, "### Emerging Trends\n\n{}", report.insights.emerging_trends);

    out
}
