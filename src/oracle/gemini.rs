use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::env;

use super::{extract_json, DecisionOracle, OracleError, PromptContext};
use crate::core::action::{decode_decision, Decision};
use crate::core::state::AgentConfig;
use crate::perception::Frame;

const SYSTEM_PROMPT: &str = r#"You are the decision brain of a desktop automation agent. You see a screenshot of the current screen plus context about the task in progress, and you answer with exactly one JSON object and nothing else.

Rules:
* Ground every action in what is actually visible in the screenshot. Never invent coordinates.
* Prefer the smallest action that makes progress. One click beats a plan.
* If the current step is already visibly satisfied, answer with the "done" action.
* If a repetition warning is present, the previous approach is not working. Choose something different.
* Confidence is your honest estimate that this action advances the step, from 0.0 to 1.0."#;

pub struct GeminiOracle {
    api_key: String,
    client: reqwest::Client,
    primary_model: String,
    fallback_model: String,
}

impl GeminiOracle {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .context("CRITICAL: GEMINI_API_KEY not found in .env or environment")?;

        Ok(Self {
            api_key,
            client: reqwest::Client::new(),
            primary_model: config.primary_model.clone(),
            fallback_model: config.fallback_model.clone(),
        })
    }

    async fn generate(&self, frame: &Frame, prompt: &str) -> Result<String, OracleError> {
        match self.generate_with(&self.primary_model, frame, prompt).await {
            Ok(text) => Ok(text),
            Err(OracleError::Malformed(raw)) => Err(OracleError::Malformed(raw)),
            Err(e) => {
                eprintln!("Primary model failed, switching to fallback. Error: {}", e);
                self.generate_with(&self.fallback_model, frame, prompt).await
            }
        }
    }

    async fn generate_with(
        &self,
        model: &str,
        frame: &Frame,
        prompt: &str,
    ) -> Result<String, OracleError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            model
        );

        let payload = json!({
            "systemInstruction": {
                "parts": [{ "text": SYSTEM_PROMPT }]
            },
            "contents": [{
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/jpeg",
                            "data": frame.to_jpeg_base64()
                                .map_err(|e| OracleError::Unavailable(e.to_string()))?
                        }
                    },
                    { "text": prompt }
                ]
            }]
        });

        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let status = res.status();
        if status.as_u16() == 429 {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let err_text = res.text().await.unwrap_or_default();
            return Err(OracleError::Unavailable(format!(
                "{} status {}: {:.200}",
                model, status, err_text
            )));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        extract_text(&body).ok_or_else(|| OracleError::Malformed(body.to_string()))
    }
}

#[async_trait::async_trait]
impl DecisionOracle for GeminiOracle {
    async fn decide(
        &self,
        frame: &Frame,
        context: &PromptContext,
    ) -> Result<Decision, OracleError> {
        let text = self.generate(frame, &context.render_decide()).await?;
        let value = extract_json(&text).ok_or_else(|| OracleError::Malformed(text.clone()))?;
        decode_decision(&value).map_err(|e| OracleError::Malformed(format!("{}: {}", e, text)))
    }

    async fn query(&self, frame: &Frame, prompt: &str) -> Result<Value, OracleError> {
        let text = self.generate(frame, prompt).await?;
        extract_json(&text).ok_or_else(|| OracleError::Malformed(text))
    }
}

fn extract_text(body: &Value) -> Option<String> {
    body.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}
