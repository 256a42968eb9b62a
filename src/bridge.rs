//! HTTP client for the desktop session bridge. The bridge owns the actual
//! screen capture and input injection; this side only speaks its small REST
//! surface: GET /screenshot, GET /elements, POST /input.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::actuator::ActuatorProvider;
use crate::core::action::ScrollDirection;
use crate::perception::{Element, Frame, PerceptionProvider};

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8765";

pub struct BridgeClient {
    base_url: String,
    client: reqwest::Client,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let url = std::env::var("SCREENPILOT_BRIDGE_URL")
            .unwrap_or_else(|_| DEFAULT_BRIDGE_URL.to_string());
        Self::new(url)
    }

    async fn post_input(&self, payload: serde_json::Value) -> Result<()> {
        let url = format!("{}/input", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("posting input to {}", url))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("bridge rejected input: {} {:.200}", status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl PerceptionProvider for BridgeClient {
    async fn capture(&self) -> Result<Frame> {
        let url = format!("{}/screenshot", self.base_url);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;
        if !res.status().is_success() {
            return Err(anyhow!("screenshot fetch failed: {}", res.status()));
        }
        let bytes = res.bytes().await.context("reading screenshot body")?;
        let image = image::load_from_memory(&bytes).context("decoding screenshot")?;
        Ok(Frame::new(image))
    }

    async fn detect_elements(&self, _frame: &Frame) -> Result<Vec<Element>> {
        let url = format!("{}/elements", self.base_url);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;
        if !res.status().is_success() {
            // Element detection is optional on the bridge side.
            return Ok(Vec::new());
        }
        let elements: Vec<Element> = res.json().await.context("decoding element list")?;
        Ok(elements)
    }
}

#[async_trait]
impl ActuatorProvider for BridgeClient {
    async fn click(&self, x: i32, y: i32) -> Result<()> {
        self.post_input(json!({ "type": "click", "x": x, "y": y })).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.post_input(json!({ "type": "type", "text": text })).await
    }

    async fn hotkey(&self, keys: &[String]) -> Result<()> {
        self.post_input(json!({ "type": "hotkey", "keys": keys })).await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: i32) -> Result<()> {
        self.post_input(json!({
            "type": "scroll",
            "direction": match direction {
                ScrollDirection::Up => "up",
                ScrollDirection::Down => "down",
            },
            "amount": amount,
        }))
        .await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.post_input(json!({ "type": "navigate", "url": url })).await
    }

    async fn open_app(&self, name: &str) -> Result<()> {
        self.post_input(json!({ "type": "open_app", "name": name })).await
    }
}
