use std::env;
use std::fs;
use std::path::Path;
use std::process;

use chrono::Utc;
use dotenv::dotenv;
use tracing::{error, info};

use slack_digest::config::Config;
use slack_digest::gamma::GammaClient;
use slack_digest::llm::OpenAiClient;
use slack_digest::pipeline::Pipeline;
use slack_digest::schema::load_export;
use slack_digest::summarizer::Progress;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let export_path = env::args()
        .nth(1)
        .or_else(|| env::var("SLACK_EXPORT_PATH").ok())
        .unwrap_or_else(|| {
            error!("Usage: digest <export.json> (or set SLACK_EXPORT_PATH)");
            process::exit(2);
        });

    let cfg = Config::from_env();
    let unified = env::var("UNIFIED_ANALYSIS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let records = match load_export(Path::new(&export_path)) {
        Ok(records) => records,
        Err(e) => {
            error!(path = %export_path, error = %e, "Failed to load export file");
            process::exit(1);
        }
    };
    info!(path = %export_path, records = records.len(), unified, "Loaded Slack export");

    let completion = OpenAiClient::new(&cfg);
    let slides = match GammaClient::new(&cfg) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build Gamma client");
            process::exit(1);
        }
    };

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            match event {
                Progress::BatchStarted { index, total } => {
                    info!(batch = index, total, "Batch started");
                }
                Progress::BatchCompleted { index, total, tokens } => {
                    info!(batch = index, total, tokens, "Batch completed");
                }
            }
        }
    });

    let pipeline = Pipeline::new(&cfg, &completion, &slides).with_progress(progress_tx);
    let output = if unified {
        pipeline.run_unified(&records).await
    } else {
        pipeline.run(&records).await
    };

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "Digest run failed");
            process::exit(1);
        }
    };

    let report_path = format!("slack-analysis-{}.md", Utc::now().format("%Y-%m-%d"));
    if let Err(e) = fs::write(&report_path, &output.markdown) {
        error!(path = %report_path, error = %e, "Failed to write report");
        process::exit(1);
    }

    info!(
        path = %report_path,
        batches = output.report.total_batches,
        records = output.report.total_records,
        tokens = output.report.usage.total,
        "Report written"
    );
    info!(
        generation_id = %output.presentation.generation_id,
        url = %output.presentation.url,
        "Presentation ready"
    );
}
