use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach health endpoint")?;

        if !response.status().is_success() {
            anyhow::bail!("Health check failed: {}", response.status());
        }

        Ok(())
    }

    /// Raises an event at a user the way a producer service would.
    pub async fn push(
        &self,
        user_id: &str,
        event_name: &str,
        payload: Value,
        raw_id: &str,
    ) -> Result<()> {
        let url = format!("{}/push", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "user_id": user_id,
                "event_name": event_name,
                "payload": payload,
                "raw_id": raw_id,
            }))
            .send()
            .await
            .context("Failed to send push request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            anyhow::bail!("Push failed: {} - Response: {}", status, body);
        }

        Ok(())
    }
}
