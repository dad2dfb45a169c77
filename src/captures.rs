//! Assistant service REST client
//!
//! Health probe and the list of frames the assistant has saved through its
//! capture tool.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Client for the service's HTTP API
#[derive(Debug, Clone)]
pub struct CapturesClient {
    client: Client,
    base_url: Url,
}

/// A frame saved by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Identifier the assistant chose when saving
    #[serde(default)]
    pub frame_id: String,
    pub filename: String,
    pub filepath: String,
    /// Local time of capture on the service host
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct CapturesResponse {
    #[serde(default)]
    captures: HashMap<String, Capture>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

impl CapturesClient {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Check whether the service reports itself healthy
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is invalid
    pub async fn health(&self) -> Result<bool> {
        let response = self.client.get(self.endpoint("/api/health")?).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Api(format!("health check failed: {status}")));
        }

        let health: HealthResponse = response.json().await?;
        Ok(health.status == "healthy")
    }

    /// List saved captures, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is invalid
    pub async fn list(&self) -> Result<Vec<Capture>> {
        let response = self
            .client
            .get(self.endpoint("/api/captures")?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("captures request failed: {status} - {body}")));
        }

        let body = response.text().await?;
        parse_captures(&body)
    }
}

/// Parse a `/api/captures` body into captures sorted newest first
///
/// # Errors
///
/// Returns error if the body is not the expected JSON shape
pub fn parse_captures(body: &str) -> Result<Vec<Capture>> {
    let parsed: CapturesResponse = serde_json::from_str(body)?;
    let mut captures: Vec<Capture> = parsed
        .captures
        .into_iter()
        .map(|(id, mut capture)| {
            capture.frame_id = id;
            capture
        })
        .collect();
    captures.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.frame_id.cmp(&b.frame_id))
    });
    Ok(captures)
}
