use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DigestError, DigestResult};
use crate::llm::classify_http_failure;
use crate::metrics::{GAMMA_GENERATION_DURATION, GAMMA_POLLS};

const TRUNCATION_MARKER: &str = "\n\n[content truncated]";
const TRUNCATION_BUFFER: usize = 1000;

/// State of a slide generation job as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationStatus {
    Processing,
    Completed { url: String },
    Failed { message: String },
}

/// Slide generation service seam. Submitting returns a generation id;
/// polling reports the job's current state.
#[async_trait]
pub trait SlideClient: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> DigestResult<String>;
    async fn poll(&self, generation_id: &str) -> DigestResult<GenerationStatus>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub input_text: String,
    pub format: String,
    pub text_mode: String,
    pub num_cards: u32,
    pub card_split: String,
    pub additional_instructions: String,
    pub text_options: TextOptions,
    pub image_options: ImageOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextOptions {
    pub amount: String,
    pub tone: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageOptions {
    pub source: String,
}

impl GenerationRequest {
    pub fn new(input_text: String, num_cards: u32, description: &str) -> Self {
        Self {
            input_text,
            format: "presentation".to_string(),
            text_mode: "preserve".to_string(),
            num_cards,
            card_split: "auto".to_string(),
            additional_instructions: description.to_string(),
            text_options: TextOptions {
                amount: "detailed".to_string(),
                tone: "professional".to_string(),
                language: "en".to_string(),
            },
            image_options: ImageOptions {
                source: "unsplash".to_string(),
            },
        }
    }
}

/// HTTP client for the Gamma generations API.
pub struct GammaClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GammaClient {
    pub fn new(cfg: &Config) -> DigestResult<Self> {
        let api_key: String = cfg
            .gamma_api_key
            .trim()
            .chars()
            .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
            .collect();
        if api_key.is_empty() {
            return Err(DigestError::Input(
                "Gamma API key is empty after sanitization".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            base_url: cfg.gamma_base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl SlideClient for GammaClient {
    async fn submit(&self, request: &GenerationRequest) -> DigestResult<String> {
        let response = self
            .client
            .post(format!("{}/generations", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| DigestError::transient("gamma_submit", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DigestError::transient("gamma_submit", e.to_string()))?;
        if !status.is_success() {
            return Err(classify_http_failure("gamma_submit", status, &body));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| DigestError::permanent("gamma_submit", e.to_string()))?;
        parsed["generationId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                DigestError::permanent("gamma_submit", "response missing generationId")
            })
    }

    async fn poll(&self, generation_id: &str) -> DigestResult<GenerationStatus> {
        let response = self
            .client
            .get(format!("{}/generations/{generation_id}", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| DigestError::transient("gamma_poll", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DigestError::transient("gamma_poll", e.to_string()))?;
        if !status.is_success() {
            return Err(classify_http_failure("gamma_poll", status, &body));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| DigestError::permanent("gamma_poll", e.to_string()))?;
        match parsed["status"].as_str() {
            Some("completed") => {
                let url = parsed["gammaUrl"]
                    .as_str()
                    .or_else(|| parsed["url"].as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(GenerationStatus::Completed { url })
            }
            Some("failed") => Ok(GenerationStatus::Failed {
                message: parsed["error"]
                    .as_str()
                    .unwrap_or("generation failed")
                    .to_string(),
            }),
            _ => Ok(GenerationStatus::Processing),
        }
    }
}

/// Cut markdown down to the service's input ceiling. The cut lands on
/// the last section or paragraph boundary past 80% of the limit, falling
/// back to a hard character-boundary cut, and appends a visible marker.
pub fn truncate_content(content: &str, max_length: usize) -> String {
    if content.len() <= max_length {
        return content.to_string();
    }

    let limit = max_length.saturating_sub(TRUNCATION_BUFFER + TRUNCATION_MARKER.len());
    let mut cut = limit;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &content[..cut];

    let floor = limit * 8 / 10;
    let boundary = ["\n## ", "\n### ", "\n\n"]
        .iter()
        .filter_map(|sep| head.rfind(sep))
        .max()
        .filter(|&pos| pos > floor);

    let kept = match boundary {
        Some(pos) => &head[..pos],
        None => head,
    };
    format!("{kept}{TRUNCATION_MARKER}")
}

/// Submit the report and poll until the job finishes. The status is
/// checked immediately after submission, then at the configured interval
/// while the job is still processing; exceeding the attempt ceiling is a
/// distinct timeout error carrying the generation id.
pub async fn request_presentation(
    client: &dyn SlideClient,
    cfg: &Config,
    markdown: &str,
    description: &str,
) -> DigestResult<crate::schema::PresentationOutcome> {
    let input_text = truncate_content(markdown, cfg.max_content_length);
    if input_text.len() < markdown.len() {
        warn!(
            original = markdown.len(),
            truncated = input_text.len(),
            "Report exceeded content ceiling, truncated for slide generation"
        );
    }

    let request = GenerationRequest::new(input_text, cfg.num_cards, description);
    let timer = GAMMA_GENERATION_DURATION.start_timer();
    let generation_id = client.submit(&request).await?;
    info!(generation_id = %generation_id, "Slide generation submitted");

    for attempt in 1..=cfg.max_poll_attempts {
        GAMMA_POLLS.inc();

        match client.poll(&generation_id).await? {
            GenerationStatus::Completed { url } => {
                timer.observe_duration();
                info!(generation_id = %generation_id, url = %url, "Slide generation completed");
                return Ok(crate::schema::PresentationOutcome { generation_id, url });
            }
            GenerationStatus::Failed { message } => {
                timer.observe_duration();
                return Err(DigestError::GenerationFailed {
                    generation_id,
                    message,
                });
            }
            GenerationStatus::Processing => {
                info!(
                    generation_id = %generation_id,
                    attempt,
                    ceiling = cfg.max_poll_attempts,
                    "Slide generation still processing"
                );
                if attempt < cfg.max_poll_attempts {
                    sleep(cfg.poll_interval).await;
                }
            }
        }
    }

    timer.observe_duration();
    Err(DigestError::PollTimeout {
        generation_id,
        attempts: cfg.max_poll_attempts,
    })
}
