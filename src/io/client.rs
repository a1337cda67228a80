//! HTTP alert source for remote operator consoles

use crate::domain::incident::{Incident, IncidentId, ResolveAction};
use crate::infra::error::{EngineError, EngineResult};
use crate::services::escalation::AlertSource;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Talks to a running `fieldwatch` server over its JSON API
pub struct HttpAlertSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAlertSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Unavailable(e.to_string())
}

/// Map a non-success response back onto the engine taxonomy
fn error_for_status(status: StatusCode, id: Option<IncidentId>, body: &str) -> EngineError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string());
    match (status, id) {
        (StatusCode::CONFLICT, Some(id)) => EngineError::AlreadyResolved(id),
        (StatusCode::NOT_FOUND, _) => EngineError::NotFound(message),
        (StatusCode::BAD_REQUEST, _) => EngineError::Validation(message),
        _ => EngineError::Unavailable(format!("server returned {status}: {message}")),
    }
}

#[async_trait]
impl AlertSource for HttpAlertSource {
    async fn pending_alerts(&self) -> EngineResult<Vec<Incident>> {
        let url = format!("{}/incidents/pending", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, None, &body));
        }
        let incidents: Vec<Incident> = response.json().await.map_err(transport_error)?;
        debug!(count = %incidents.len(), "pending_fetched");
        Ok(incidents)
    }

    async fn resolve(&self, id: IncidentId, action: ResolveAction) -> EngineResult<()> {
        let url = format!("{}/incidents/{}/resolve", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "action": action.as_str() }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, Some(id), &body))
    }
}
