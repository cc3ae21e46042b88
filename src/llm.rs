//! Text-completion client for analysis narratives.
//!
//! Speaks the OpenAI-compatible chat-completions format. A missing API key is
//! not an error: callers get a fixed explanatory text instead.

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::ApiConfig;
use crate::error::{Error, Result};

pub const UNAVAILABLE_TEXT: &str = "completion API key not configured; analysis unavailable";

const MAX_TOKENS: u32 = 2048;
const TEMPERATURE: f64 = 0.3;

const ANALYST_PROMPT: &str = "\
You are a financial analyst assistant for Turnbull, a building materials distributor. \
You analyze customer risk data and provide clear, actionable insights.

Risk Rating Scale:
- Rating 1 (A): Lowest risk - reliable customer, pays on time
- Rating 2 (B): Low risk - generally good payment behavior
- Rating 3 (C): Moderate risk - some late payments or minor concerns
- Rating 4 (D): Elevated risk - pattern of late payments or credit issues
- Rating 5 (E): High risk - significant overdue amounts or credit breaches
- Rating 6 (F): Critical risk - severe financial distress indicators

Key Metrics:
- running_balance: Current outstanding balance
- days_beyond_terms: How many days past agreed payment terms
- credit_usage: Percentage of credit limit used
- risk_score: ML model output (0-1, higher = riskier)
- insurance_limit: Trade credit insurance coverage amount

Always be specific with numbers and dates. Flag any critical concerns prominently.";

pub struct CompletionClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl CompletionClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            url: config.completion_url.clone(),
            model: config.completion_model.clone(),
            api_key: config
                .openrouter_api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask for an analysis of `prompt` under the analyst system prompt, or
    /// `system` when given.
    pub async fn analyze(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            return Ok(UNAVAILABLE_TEXT.to_string());
        };

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system.unwrap_or(ANALYST_PROMPT) },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(Error::upstream(format!(
                "completion API error (HTTP {}): {text}",
                status.as_u16()
            )));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| Error::upstream(format!("invalid JSON from completion API: {e}")))?;
        Ok(data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("No response generated.")
            .to_string())
    }
}
