use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DigestError, DigestResult};

/// One chat message or thread reply, normalized at the extraction boundary.
/// Immutable once created; every pipeline stage reads it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub channel: String,
    pub user: String,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub thread_parent: Option<String>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub is_thread_reply: bool,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub has_files: bool,
    #[serde(default)]
    pub reaction_count: u32,
}

impl MessageRecord {
    /// Enforces the record invariants once, at the ingestion boundary.
    /// Malformed rows are rejected here rather than propagated downstream.
    pub fn validate(&self) -> DigestResult<()> {
        if self.channel.is_empty() {
            return Err(DigestError::Input("record has an empty channel".into()));
        }
        if self.user.is_empty() {
            return Err(DigestError::Input("record has an empty user".into()));
        }
        if self.is_thread_reply != self.thread_parent.is_some() {
            return Err(DigestError::Input(format!(
                "record in #{}: thread-reply flag does not match thread parent",
                self.channel
            )));
        }
        Ok(())
    }
}

/// Load a JSON export (an array of records) from disk. Records that fail
/// validation are skipped with a warning rather than aborting the load;
/// an unreadable or malformed file is an input error.
pub fn load_export(path: &Path) -> DigestResult<Vec<MessageRecord>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| DigestError::Input(format!("cannot read {}: {e}", path.display())))?;
    let parsed: Vec<MessageRecord> = serde_json::from_str(&raw)
        .map_err(|e| DigestError::Input(format!("{} is not a record array: {e}", path.display())))?;

    let mut records = Vec::with_capacity(parsed.len());
    for (i, record) in parsed.into_iter().enumerate() {
        match record.validate() {
            Ok(()) => records.push(record),
            Err(e) => warn!(index = i, error = %e, "Skipping invalid record"),
        }
    }
    Ok(records)
}

/// A contiguous, order-preserving slice of records submitted together to
/// the LLM collaborator. Indexes are 1-based.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub total: usize,
    pub records: Vec<MessageRecord>,
    pub estimated_tokens: usize,
}

/// Billed token counts reported by the LLM collaborator for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// Output of one successful LLM call for one batch. Never mutated.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_index: usize,
    pub summary: String,
    pub usage: TokenUsage,
    pub elapsed: Duration,
}

/// The five fixed insight sections extracted from the merged report body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insights {
    pub community_activity: String,
    pub feature_feedback: String,
    pub success_stories: String,
    pub support_patterns: String,
    pub emerging_trends: String,
}

/// Final merged artifact of a run, created exactly once after all batches
/// succeed.
#[derive(Debug, Clone)]
pub struct AggregatedReport {
    pub total_batches: usize,
    pub total_records: usize,
    pub usage: TokenUsage,
    pub total_elapsed: Duration,
    pub body: String,
    pub insights: Insights,
}

/// Successful slide-generation outcome: remote job id plus shareable URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationOutcome {
    pub generation_id: String,
    pub url: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn record(channel: &str, user: &str, text: &str, minute: u32) -> MessageRecord {
        MessageRecord {
            channel: channel.to_string(),
            user: user.to_string(),
            text: text.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, 7, 12, minute, 0).unwrap(),
            thread_parent: None,
            urls: None,
            permalink: None,
            is_thread_reply: false,
            message_type: "message".to_string(),
            has_attachments: false,
            has_files: false,
            reaction_count: 0,
        }
    }
}
