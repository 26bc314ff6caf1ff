use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::PollerConfig;
use crate::error::TransportError;
use crate::protocol::{get_attributes_payload, ACTION_HEADER, GET_ATTRIBUTES};
use crate::Result;

/// Single-attempt JNAP transport for one controller.
///
/// Holds one `reqwest::Client`, so keep-alive connections to the controller
/// are reused across polls. Every failure leaves as a [`TransportError`].
#[derive(Debug, Clone)]
pub struct JnapClient {
    http: reqwest::Client,
    endpoint: String,
}

impl JnapClient {
    pub fn new(config: &PollerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one JNAP action and return the parsed JSON body.
    pub async fn fetch(&self, action: &str, payload: &Value) -> std::result::Result<Value, TransportError> {
        trace!(url = %self.endpoint, action, "JNAP request");

        let resp = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACTION_HEADER, action)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), action, "JNAP request rejected");
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| TransportError::MalformedBody(e.to_string()))
    }

    /// Fetch the named variables, or every variable when `names` is empty.
    pub async fn get_attributes(&self, names: &[&str]) -> std::result::Result<Value, TransportError> {
        self.fetch(GET_ATTRIBUTES, &get_attributes_payload(names)).await
    }
}
