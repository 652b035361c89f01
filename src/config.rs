use std::env;
use std::time::Duration;

/// Default system instruction sent with every summarization call.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Slack community data analyst. \
Extract actionable insights from community conversations and create \
presentation-ready content.\n\n\
CRITICAL INSTRUCTIONS:\n\
1. Follow the exact template structure provided\n\
2. Include interactive Slack thread links: [descriptive text](slack-url)\n\
3. Extract actual quotes and link to source threads\n\
4. Focus on patterns, trends, and actionable insights\n\
5. Output only the markdown template - no preambles or JSON\n\
6. Be concise but comprehensive";

/// Default user prompt. The `{{SLACK_DATA}}` placeholder is replaced with
/// the rendered batch (or the whole dataset in unified mode).
pub const DEFAULT_USER_PROMPT: &str = "# Community Analysis

Analyze this Slack community data and create presentation content for the \
weekly team review. Focus on what's working, what's challenging, and \
emerging patterns.

**Data:** {{SLACK_DATA}}

Extract: feature feedback, success stories, recurring questions, feature \
requests, community support, emerging trends. Use markdown links \
`[text](url)` for key examples only.

Output markdown only. No JSON. No preambles. Start with # heading.

## Community Overview
[2-3 sentences: vibe, energy, themes]

## What's Resonating

**Features People Love**
[3-5 items]

**Success Stories**
[2-3 examples]

## What's Challenging

**Recurring Questions**
[3-5 patterns]

**Feature Wishlist**
[3-5 requests]

## Notable Feedback

[4-6 quotes with links, mix positive/constructive]";

/// Immutable run configuration, constructed once and passed into each
/// component. Components never read the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub gamma_api_key: String,
    pub gamma_base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    /// Records per batch in chunked mode.
    pub batch_size: usize,
    /// Cap on completion tokens per LLM call.
    pub max_output_tokens: u32,
    /// Retry ceiling per batch, counting the first attempt.
    pub retry_attempts: u32,
    /// Backoff is retry_base_delay * attempt_number.
    pub retry_base_delay: Duration,
    /// Pause between successful batch calls, for collaborator rate limits.
    pub inter_call_delay: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Target slide count for the generated presentation.
    pub num_cards: u32,
    /// Slide collaborator's documented input-size ceiling, in characters.
    pub max_content_length: usize,
    /// Display-name substrings that mark an author as staff.
    pub staff_markers: Vec<String>,
}

impl Config {
    /// Defaults mirroring the production deployment; only the API keys are
    /// caller-supplied.
    pub fn new(openai_api_key: impl Into<String>, gamma_api_key: impl Into<String>) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gamma_api_key: gamma_api_key.into(),
            gamma_base_url: "https://public-api.gamma.app/v0.2".to_string(),
            model: "gpt-4o".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prompt_template: DEFAULT_USER_PROMPT.to_string(),
            batch_size: 25,
            max_output_tokens: 12_000,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(2000),
            inter_call_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
            num_cards: 10,
            max_content_length: 750_000,
            staff_markers: vec!["(Gamma".to_string(), "( Gamma".to_string()],
        }
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::new(
            env::var("OPENAI_API_KEY").expect("Expected OPENAI_API_KEY in env"),
            env::var("GAMMA_API_KEY").expect("Expected GAMMA_API_KEY in env"),
        );
        if let Ok(model) = env::var("GPT_MODEL") {
            cfg.model = model;
        }
        if let Ok(prompt) = env::var("GPT_SYSTEM_PROMPT") {
            cfg.system_prompt = prompt;
        }
        if let Ok(template) = env::var("GPT_USER_PROMPT") {
            cfg.user_prompt_template = template;
        }
        if let Some(size) = parse_env("CHUNK_SIZE") {
            cfg.batch_size = require_positive("CHUNK_SIZE", size);
        }
        if let Some(attempts) = parse_env::<u32>("RETRY_ATTEMPTS") {
            cfg.retry_attempts = require_positive("RETRY_ATTEMPTS", attempts as usize) as u32;
        }
        if let Some(ms) = parse_env("RETRY_DELAY_MS") {
            cfg.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env("API_DELAY_MS") {
            cfg.inter_call_delay = Duration::from_millis(ms);
        }
        cfg
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// A zero here would only surface later as a panic deep inside the run;
/// fail at startup instead, like the missing-key checks above.
fn require_positive(name: &str, value: usize) -> usize {
    assert!(value > 0, "Expected {name} to be a positive integer");
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let cfg = Config::new("sk-test", "gk-test");
        assert_eq!(cfg.batch_size, 25);
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retry_base_delay, Duration::from_millis(2000));
        assert_eq!(cfg.inter_call_delay, Duration::from_millis(1000));
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.max_poll_attempts, 60);
        assert_eq!(cfg.max_content_length, 750_000);
    }

    #[test]
    fn positive_overrides_pass_through() {
        assert_eq!(require_positive("CHUNK_SIZE", 25), 25);
    }

    #[test]
    #[should_panic(expected = "CHUNK_SIZE to be a positive integer")]
    fn zero_override_fails_at_startup() {
        require_positive("CHUNK_SIZE", 0);
    }

    #[test]
    fn default_template_contains_placeholder() {
        let cfg = Config::new("sk-test", "gk-test");
        assert!(cfg.user_prompt_template.contains("{{SLACK_DATA}}"));
    }
}
