use std::fmt::Write as _;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DigestError, DigestResult};
use crate::llm::CompletionClient;
use crate::metrics::{BATCHES_FAILED, BATCHES_SUMMARIZED, LLM_RETRIES, LLM_TOKENS_USED};
use crate::schema::{Batch, BatchSummary, MessageRecord};
use crate::stats::StatsSnapshot;

const DATA_PLACEHOLDER: &str = "{{SLACK_DATA}}";

/// Batch lifecycle notifications published by the driver. The display
/// layer subscribes independently; the driver never blocks on a slow or
/// dropped receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    BatchStarted { index: usize, total: usize },
    BatchCompleted { index: usize, total: usize, tokens: u64 },
}

/// Plain placeholder-substitution template, checked at construction so a
/// malformed template fails fast instead of emitting literal placeholder
/// text mid-run.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: &str) -> DigestResult<Self> {
        if !template.contains(DATA_PLACEHOLDER) {
            return Err(DigestError::Template(DATA_PLACEHOLDER));
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    pub fn render(&self, data: &str) -> String {
        self.template.replace(DATA_PLACEHOLDER, data)
    }
}

/// Drives per-batch LLM summarization: prompt rendering, retry with
/// linear backoff, inter-call pacing, usage accounting. Batches are
/// processed strictly one at a time, in index order.
pub struct Summarizer<'a> {
    cfg: &'a Config,
    client: &'a dyn CompletionClient,
    template: PromptTemplate,
    progress: Option<UnboundedSender<Progress>>,
}

impl<'a> Summarizer<'a> {
    pub fn new(cfg: &'a Config, client: &'a dyn CompletionClient) -> DigestResult<Self> {
        let template = PromptTemplate::new(&cfg.user_prompt_template)?;
        Ok(Self {
            cfg,
            client,
            template,
            progress: None,
        })
    }

    pub fn with_progress(mut self, sender: UnboundedSender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Summarize every batch in index order. Any batch that exhausts its
    /// retries aborts the whole run; no partial result is returned.
    pub async fn summarize_batches(&self, batches: &[Batch]) -> DigestResult<Vec<BatchSummary>> {
        let mut results = Vec::with_capacity(batches.len());

        for (i, batch) in batches.iter().enumerate() {
            self.publish(Progress::BatchStarted {
                index: batch.index,
                total: batch.total,
            });
            info!(
                batch = batch.index,
                total = batch.total,
                records = batch.records.len(),
                estimated_tokens = batch.estimated_tokens,
                "Summarizing batch"
            );

            let data = render_records(&batch.records, batch.index, batch.total);
            let result = self.call_with_retry(batch.index, &self.template.render(&data)).await?;

            BATCHES_SUMMARIZED.inc();
            LLM_TOKENS_USED.inc_by(result.usage.total as f64);
            self.publish(Progress::BatchCompleted {
                index: batch.index,
                total: batch.total,
                tokens: result.usage.total,
            });
            info!(
                batch = batch.index,
                tokens = result.usage.total,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Batch summarized"
            );
            results.push(result);

            // Pace calls to respect collaborator rate limits.
            if i + 1 < batches.len() {
                sleep(self.cfg.inter_call_delay).await;
            }
        }

        Ok(results)
    }

    /// Unified mode: the whole record set plus the pre-computed statistics
    /// block goes through as one synthetic batch.
    pub async fn summarize_unified(
        &self,
        records: &[MessageRecord],
        stats: &StatsSnapshot,
    ) -> DigestResult<BatchSummary> {
        self.publish(Progress::BatchStarted { index: 1, total: 1 });

        let mut data = String::new();
        data.push_str("## Pre-calculated Statistics\n\n");
        data.push_str(&stats.to_markdown());
        data.push('\n');
        data.push_str(&render_records(records, 1, 1));

        let result = self.call_with_retry(1, &self.template.render(&data)).await?;
        BATCHES_SUMMARIZED.inc();
        LLM_TOKENS_USED.inc_by(result.usage.total as f64);
        self.publish(Progress::BatchCompleted {
            index: 1,
            total: 1,
            tokens: result.usage.total,
        });
        Ok(result)
    }

    /// One batch call with linear backoff: delay = base * attempt number.
    /// Transient failures and empty completions are retried up to the
    /// ceiling; permanent failures surface immediately. Only the final
    /// successful attempt's usage and elapsed time are recorded.
    async fn call_with_retry(
        &self,
        batch_index: usize,
        user_prompt: &str,
    ) -> DigestResult<BatchSummary> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();

            let outcome = self
                .client
                .complete(&self.cfg.system_prompt, user_prompt, self.cfg.max_output_tokens)
                .await
                .and_then(|completion| {
                    if completion.text.trim().is_empty() {
                        Err(DigestError::EmptyCompletion {
                            operation: "llm_complete",
                        })
                    } else {
                        Ok(completion)
                    }
                });

            match outcome {
                Ok(completion) => {
                    return Ok(BatchSummary {
                        batch_index,
                        summary: completion.text,
                        usage: completion.usage,
                        elapsed: started.elapsed(),
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.cfg.retry_attempts => {
                    warn!(
                        batch = batch_index,
                        attempt,
                        ceiling = self.cfg.retry_attempts,
                        error = %err,
                        "Batch summarization failed, retrying"
                    );
                    LLM_RETRIES.inc();
                    sleep(self.cfg.retry_base_delay * attempt).await;
                }
                Err(err) if err.is_retryable() => {
                    BATCHES_FAILED.inc();
                    return Err(DigestError::BatchExhausted {
                        batch_index,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    // Permanent failure: do not retry blindly.
                    BATCHES_FAILED.inc();
                    return Err(err);
                }
            }
        }
    }

    fn publish(&self, event: Progress) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(event);
        }
    }
}

/// Render a record block for prompt substitution. Field layout matches the
/// report consumers' expectations; optional fields are omitted entirely.
pub fn render_records(records: &[MessageRecord], index: usize, total: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Batch {index}/{total} - {} messages", records.len());
    out.push_str(&"=".repeat(50));
    out.push('\n');

    for (i, msg) in records.iter().enumerate() {
        let mut flags = String::new();
        if msg.is_thread_reply {
            flags.push_str("[THREAD REPLY] ");
        }
        if msg.has_attachments {
            flags.push_str("[HAS ATTACHMENTS] ");
        }
        if msg.has_files {
            flags.push_str("[HAS FILES] ");
        }

        let _ = writeln!(out, "{}. {}", i + 1, flags.trim_end());
        let _ = writeln!(out, "Channel: {}", msg.channel);
        let _ = writeln!(out, "User: {}", msg.user);
        let _ = writeln!(out, "Timestamp: {}", msg.timestamp.to_rfc3339());
        let _ = writeln!(out, "Message: {}", msg.text);
        if let Some(urls) = &msg.urls {
            if !urls.is_empty() {
                let _ = writeln!(out, "URLs: {}", urls.join(", "));
            }
        }
        if let Some(permalink) = &msg.permalink {
            let _ = writeln!(out, "Permalink: {permalink}");
        }
        if let Some(parent) = &msg.thread_parent {
            let _ = writeln!(out, "Thread Parent: {parent}");
        }
        out.push_str("---\n");
    }

    out.push_str(&"=".repeat(50));
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::partition;
    use crate::llm::Completion;
    use crate::schema::test_support::record;
    use crate::schema::TokenUsage;
    use crate::stats::{analyze, StaffPredicate, TopicTable};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_config() -> Config {
        Config::new("sk-test", "gk-test")
    }

    /// Fails with a transient error for the first `fail_first` calls, then
    /// succeeds with usage that identifies the attempt number.
    struct FlakyClient {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FlakyClient {
        async fn complete(&self, _: &str, _: &str, _: u32) -> DigestResult<Completion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(DigestError::transient("llm_complete", "503 upstream"))
            } else {
                Ok(Completion {
                    text: format!("## Summary from attempt {n}"),
                    usage: TokenUsage::new(1000 + u64::from(n), 500),
                })
            }
        }
    }

    /// Always succeeds, recording every user prompt it receives.
    struct RecordingClient {
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for RecordingClient {
        async fn complete(&self, _: &str, user: &str, _: u32) -> DigestResult<Completion> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(user.to_string());
            Ok(Completion {
                text: format!("## Batch summary {}", prompts.len()),
                usage: TokenUsage::new(100, 50),
            })
        }
    }

    struct PermanentFailClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionClient for PermanentFailClient {
        async fn complete(&self, _: &str, _: &str, _: u32) -> DigestResult<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DigestError::permanent("llm_complete", "401 unauthorized"))
        }
    }

    /// Returns 2xx-with-empty-text once, then a real summary.
    struct EmptyThenGoodClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionClient for EmptyThenGoodClient {
        async fn complete(&self, _: &str, _: &str, _: u32) -> DigestResult<Completion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                Ok(Completion {
                    text: "   ".to_string(),
                    usage: TokenUsage::default(),
                })
            } else {
                Ok(Completion {
                    text: "## Recovered".to_string(),
                    usage: TokenUsage::new(10, 5),
                })
            }
        }
    }

    fn one_batch() -> Vec<Batch> {
        partition(&[record("general", "amanda", "hello world", 0)], 25)
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        assert!(matches!(
            PromptTemplate::new("no placeholder here"),
            Err(DigestError::Template(_))
        ));
        assert!(PromptTemplate::new("data: {{SLACK_DATA}}").is_ok());
    }

    #[test]
    fn summarizer_construction_validates_the_config_template() {
        let mut cfg = test_config();
        cfg.user_prompt_template = "broken template".to_string();
        let client = RecordingClient::new();
        assert!(Summarizer::new(&cfg, &client).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_final_usage_and_backoff() {
        let cfg = test_config();
        let client = FlakyClient::new(2);
        let summarizer = Summarizer::new(&cfg, &client).unwrap();

        let started = tokio::time::Instant::now();
        let results = summarizer.summarize_batches(&one_batch()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].usage, TokenUsage::new(1003, 500));
        assert!(results[0].summary.contains("attempt 3"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        // delay = base*1 + base*2
        assert!(started.elapsed() >= Duration::from_millis(2000 + 4000));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_call_stops_at_the_attempt_ceiling() {
        let cfg = test_config();
        let client = FlakyClient::new(u32::MAX);
        let summarizer = Summarizer::new(&cfg, &client).unwrap();

        let err = summarizer.summarize_batches(&one_batch()).await.unwrap_err();
        match err {
            DigestError::BatchExhausted {
                batch_index,
                attempts,
                ..
            } => {
                assert_eq!(batch_index, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected BatchExhausted, got {other}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let cfg = test_config();
        let client = PermanentFailClient {
            calls: AtomicU32::new(0),
        };
        let summarizer = Summarizer::new(&cfg, &client).unwrap();

        let err = summarizer.summarize_batches(&one_batch()).await.unwrap_err();
        assert!(matches!(err, DigestError::Permanent { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_completion_is_a_failure_and_gets_retried() {
        let cfg = test_config();
        let client = EmptyThenGoodClient {
            calls: AtomicU32::new(0),
        };
        let summarizer = Summarizer::new(&cfg, &client).unwrap();

        let results = summarizer.summarize_batches(&one_batch()).await.unwrap();
        assert_eq!(results[0].summary, "## Recovered");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_summarized_sequentially_in_index_order() {
        let cfg = test_config();
        let records: Vec<_> = (0..104)
            .map(|i| record("general", &format!("user-{i}"), "hi there", (i % 60) as u32))
            .collect();
        let batches = partition(&records, 25);
        let client = RecordingClient::new();
        let summarizer = Summarizer::new(&cfg, &client).unwrap();

        let results = summarizer.summarize_batches(&batches).await.unwrap();

        assert_eq!(results.len(), 5);
        let indexes: Vec<usize> = results.iter().map(|r| r.batch_index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4, 5]);

        let prompts = client.prompts.lock().unwrap();
        for (i, prompt) in prompts.iter().enumerate() {
            assert!(prompt.contains(&format!("Batch {}/5", i + 1)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_events_bracket_every_batch() {
        let cfg = test_config();
        let records: Vec<_> = (0..30)
            .map(|i| record("general", "amanda", "hello", i % 60))
            .collect();
        let batches = partition(&records, 25);
        let client = RecordingClient::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let summarizer = Summarizer::new(&cfg, &client).unwrap().with_progress(tx);

        summarizer.summarize_batches(&batches).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], Progress::BatchStarted { index: 1, total: 2 });
        assert!(matches!(
            events[1],
            Progress::BatchCompleted { index: 1, total: 2, .. }
        ));
        assert_eq!(events[2], Progress::BatchStarted { index: 2, total: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn unified_mode_includes_stats_and_every_record() {
        let cfg = test_config();
        let records = vec![
            record("general", "amanda", "found a bug", 0),
            record("bugs", "ibby", "the api broke?", 1),
        ];
        let staff = StaffPredicate::new(cfg.staff_markers.clone());
        let stats = analyze(&records, &staff, &TopicTable::default_table());
        let client = RecordingClient::new();
        let summarizer = Summarizer::new(&cfg, &client).unwrap();

        let result = summarizer.summarize_unified(&records, &stats).await.unwrap();
        assert_eq!(result.batch_index, 1);

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Pre-calculated Statistics"));
        assert!(prompts[0].contains("Batch 1/1 - 2 messages"));
        assert!(prompts[0].contains("found a bug"));
    }
}
