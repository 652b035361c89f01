use tracing::info;

use crate::schema::{Batch, MessageRecord};

/// Characters-per-token heuristic used for the pre-flight cost estimate.
/// This is an approximation only, never billed usage.
const CHARS_PER_TOKEN: usize = 4;

/// Split an ordered record sequence into ceil(N/B) batches of up to
/// `batch_size` records each, preserving the original order. Indexes are
/// 1-based; concatenating all batches in index order reconstructs the
/// input exactly.
pub fn partition(records: &[MessageRecord], batch_size: usize) -> Vec<Batch> {
    assert!(batch_size > 0, "batch size must be positive");

    let total = records.len().div_ceil(batch_size);
    let batches: Vec<Batch> = records
        .chunks(batch_size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            index: i + 1,
            total,
            records: chunk.to_vec(),
            estimated_tokens: chunk.iter().map(|msg| estimate_tokens(&msg.text)).sum(),
        })
        .collect();

    info!(
        records = records.len(),
        batches = batches.len(),
        batch_size,
        "Partitioned records into batches"
    );
    batches
}

pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Aggregate figures over a partition, logged before any LLM call as a
/// sanity baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub total_batches: usize,
    pub total_records: usize,
    pub total_estimated_tokens: usize,
    pub average_tokens_per_batch: usize,
    pub max_tokens_in_batch: usize,
    pub min_tokens_in_batch: usize,
}

pub fn batch_stats(batches: &[Batch]) -> BatchStats {
    let total_records = batches.iter().map(|b| b.records.len()).sum();
    let total_estimated_tokens: usize = batches.iter().map(|b| b.estimated_tokens).sum();
    BatchStats {
        total_batches: batches.len(),
        total_records,
        total_estimated_tokens,
        average_tokens_per_batch: if batches.is_empty() {
            0
        } else {
            total_estimated_tokens / batches.len()
        },
        max_tokens_in_batch: batches.iter().map(|b| b.estimated_tokens).max().unwrap_or(0),
        min_tokens_in_batch: batches.iter().map(|b| b.estimated_tokens).min().unwrap_or(0),
    }
}
