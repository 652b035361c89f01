use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DigestError, DigestResult};
use crate::metrics::LLM_REQUEST_DURATION;
use crate::schema::TokenUsage;

/// One model completion: generated text plus billed usage.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// LLM completion collaborator. Implementations must signal distinctly
/// between transport/HTTP failure and a 2xx response with empty text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32)
        -> DigestResult<Completion>;
}

/// Chat-completions client for the OpenAI API.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.openai_base_url.clone(),
            api_key: cfg.openai_api_key.clone(),
            model: cfg.model.clone(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> DigestResult<Completion> {
        let _timer = LLM_REQUEST_DURATION.start_timer();

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user }
                ],
                "max_completion_tokens": max_tokens,
                "temperature": 0.7,
                "top_p": 0.9
            }))
            .send()
            .await
            .map_err(|err| DigestError::transient("llm_complete", err.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_http_failure("llm_complete", status, &body));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|err| DigestError::permanent("llm_complete", err.to_string()))?;

        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            warn!("Model returned an empty completion: {body:?}");
            return Err(DigestError::EmptyCompletion {
                operation: "llm_complete",
            });
        }

        let usage = TokenUsage {
            prompt: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total: body["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        info!(len = text.len(), tokens = usage.total, "Got completion");
        Ok(Completion { text, usage })
    }
}

/// 429 and 5xx are worth retrying; other 4xx (auth, validation) are not.
pub(crate) fn classify_http_failure(
    operation: &'static str,
    status: StatusCode,
    body: &str,
) -> DigestError {
    let message = format!("{status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        DigestError::transient(operation, message)
    } else {
        DigestError::permanent(operation, message)
    }
}
