use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::chunking::{batch_stats, partition};
use crate::config::Config;
use crate::error::{DigestError, DigestResult};
use crate::gamma::{request_presentation, SlideClient};
use crate::llm::CompletionClient;
use crate::metrics::RECORDS_ANALYZED;
use crate::report::{aggregate, render_markdown};
use crate::schema::{AggregatedReport, MessageRecord, PresentationOutcome};
use crate::stats::{analyze, StaffPredicate, StatsSnapshot, TopicTable};
use crate::summarizer::{Progress, Summarizer};

/// Everything a finished run produces: the aggregated report, the
/// statistics it was built from, the rendered markdown document, and the
/// slide generation outcome.
#[derive(Debug)]
pub struct RunOutput {
    pub report: AggregatedReport,
    pub stats: StatsSnapshot,
    pub markdown: String,
    pub presentation: PresentationOutcome,
}

/// End-to-end orchestration: statistics, batch partitioning, LLM
/// summarization, report rendering, slide generation. Collaborators are
/// injected behind traits; staff detection and topic classification use
/// deployment defaults unless overridden.
pub struct Pipeline<'a> {
    cfg: &'a Config,
    completion: &'a dyn CompletionClient,
    slides: &'a dyn SlideClient,
    staff: StaffPredicate,
    topics: TopicTable,
    progress: Option<UnboundedSender<Progress>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        cfg: &'a Config,
        completion: &'a dyn CompletionClient,
        slides: &'a dyn SlideClient,
    ) -> Self {
        Self {
            cfg,
            completion,
            slides,
            staff: StaffPredicate::new(cfg.staff_markers.clone()),
            topics: TopicTable::default_table(),
            progress: None,
        }
    }

    pub fn with_staff_predicate(mut self, staff: StaffPredicate) -> Self {
        self.staff = staff;
        self
    }

    pub fn with_topic_table(mut self, topics: TopicTable) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_progress(mut self, sender: UnboundedSender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Chunked mode: partition records into token-bounded batches and
    /// summarize each one before merging.
    pub async fn run(&self, records: &[MessageRecord]) -> DigestResult<RunOutput> {
        let run_id = Uuid::new_v4();
        let span = info_span!("digest_run", run_id = %run_id, mode = "chunked");
        self.execute(records, false).instrument(span).await
    }

    /// Unified mode: the whole record set goes through as one synthetic
    /// batch together with the pre-computed statistics block.
    pub async fn run_unified(&self, records: &[MessageRecord]) -> DigestResult<RunOutput> {
        let run_id = Uuid::new_v4();
        let span = info_span!("digest_run", run_id = %run_id, mode = "unified");
        self.execute(records, true).instrument(span).await
    }

    async fn execute(&self, records: &[MessageRecord], unified: bool) -> DigestResult<RunOutput> {
        if records.is_empty() {
            return Err(DigestError::Input(
                "no records to analyze; extraction produced an empty set".to_string(),
            ));
        }
        RECORDS_ANALYZED.inc_by(records.len() as f64);

        let stats = analyze(records, &self.staff, &self.topics);
        info!(
            records = stats.total_records,
            community = stats.community_records,
            staff = stats.staff_records,
            date_range = %stats.date_range,
            "Computed workspace statistics"
        );

        let mut summarizer = Summarizer::new(self.cfg, self.completion)?;
        if let Some(sender) = &self.progress {
            summarizer = summarizer.with_progress(sender.clone());
        }

        let results = if unified {
            vec![summarizer.summarize_unified(records, &stats).await?]
        } else {
            let batches = partition(records, self.cfg.batch_size);
            let preflight = batch_stats(&batches);
            info!(
                batches = preflight.total_batches,
                batch_size = self.cfg.batch_size,
                estimated_tokens = preflight.total_estimated_tokens,
                max_batch_tokens = preflight.max_tokens_in_batch,
                "Partitioned records"
            );
            summarizer.summarize_batches(&batches).await?
        };

        let report = aggregate(&results, records.len());
        info!(
            batches = report.total_batches,
            tokens = report.usage.total,
            "Aggregated batch summaries"
        );

        let markdown = render_markdown(&report, &stats);
        let description = format!("Slack community analysis, {}", stats.date_range);
        let presentation =
            request_presentation(self.slides, self.cfg, &markdown, &description).await?;

        Ok(RunOutput {
            report,
            stats,
            markdown,
            presentation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamma::{GenerationRequest, GenerationStatus};
    use crate::llm::Completion;
    use crate::schema::test_support::record;
    use crate::schema::TokenUsage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct CountingCompletion {
        calls: AtomicU32,
    }

    impl CountingCompletion {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for CountingCompletion {
        async fn complete(&self, _: &str, _: &str, _: u32) -> DigestResult<Completion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Completion {
                text: format!("## Community Activity\n\nSummary for call {n}."),
                usage: TokenUsage::new(200, 100),
            })
        }
    }

    struct InstantSlides {
        submissions: Mutex<Vec<GenerationRequest>>,
    }

    impl InstantSlides {
        fn new() -> Self {
            Self {
                submissions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SlideClient for InstantSlides {
        async fn submit(&self, request: &GenerationRequest) -> DigestResult<String> {
            self.submissions.lock().unwrap().push(request.clone());
            Ok("gen-777".to_string())
        }

        async fn poll(&self, _: &str) -> DigestResult<GenerationStatus> {
            Ok(GenerationStatus::Completed {
                url: "https://gamma.app/docs/run".to_string(),
            })
        }
    }

    fn records(n: usize) -> Vec<MessageRecord> {
        (0..n)
            .map(|i| record("general", &format!("user-{i}"), "hello team", (i % 60) as u32))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn chunked_run_makes_one_llm_call_per_batch() {
        let cfg = Config::new("sk-test", "gk-test");
        let completion = CountingCompletion::new();
        let slides = InstantSlides::new();
        let pipeline = Pipeline::new(&cfg, &completion, &slides);

        let output = pipeline.run(&records(104)).await.unwrap();

        assert_eq!(completion.calls.load(Ordering::SeqCst), 5);
        assert_eq!(output.report.total_batches, 5);
        assert_eq!(output.report.total_records, 104);
        assert_eq!(output.report.usage, TokenUsage::new(1000, 500));
        assert_eq!(output.presentation.url, "https://gamma.app/docs/run");

        let submissions = slides.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].input_text.contains("Summary for call 1."));
        assert!(submissions[0].input_text.contains("Summary for call 5."));
    }

    #[tokio::test]
    async fn empty_input_fails_before_any_collaborator_call() {
        let cfg = Config::new("sk-test", "gk-test");
        let completion = CountingCompletion::new();
        let slides = InstantSlides::new();
        let pipeline = Pipeline::new(&cfg, &completion, &slides);

        let err = pipeline.run(&[]).await.unwrap_err();
        assert!(matches!(err, DigestError::Input(_)));
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
        assert!(slides.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unified_run_is_a_single_call_counted_as_one_batch() {
        let cfg = Config::new("sk-test", "gk-test");
        let completion = CountingCompletion::new();
        let slides = InstantSlides::new();
        let pipeline = Pipeline::new(&cfg, &completion, &slides);

        let output = pipeline.run_unified(&records(104)).await.unwrap();

        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.report.total_batches, 1);
        assert_eq!(output.report.total_records, 104);
    }

    #[tokio::test(start_paused = true)]
    async fn markdown_output_carries_stats_and_insights() {
        let cfg = Config::new("sk-test", "gk-test");
        let completion = CountingCompletion::new();
        let slides = InstantSlides::new();
        let pipeline = Pipeline::new(&cfg, &completion, &slides);

        let output = pipeline.run(&records(10)).await.unwrap();

        assert!(output.markdown.contains("# Slack Community Analysis Report"));
        assert!(output.markdown.contains("### Community Activity"));
        assert_eq!(output.report.insights.community_activity, "Summary for call 1.");
        assert_eq!(output.stats.total_records, 10);
    }
}
