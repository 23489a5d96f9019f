//! Reqwest-backed provider transport.

use std::time::Duration;

use base64::Engine;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{ProviderRequest, RawResponse, Transport};
use crate::error::GenerationError;

/// HTTPS transport posting JSON generation requests with bearer auth.
///
/// Owns the provider endpoint and API token; the orchestration core never
/// sees credentials. One instance is shared by all dispatcher workers.
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoint: String,
    api_token: String,
}

impl ReqwestTransport {
    /// Creates a transport for the given provider endpoint.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Full URL of the provider's generation endpoint
    /// * `api_token` - Bearer token attached to every request
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_token: api_token.into(),
        })
    }

    /// Builds the JSON body for a provider request.
    ///
    /// Parameters are flattened into the top-level object in their given
    /// order, after the fixed fields, matching the request/response JSON
    /// shape the provider expects.
    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("kind".to_string(), json!(request.kind.as_str()));
        body.insert("prompt".to_string(), json!(request.prompt));
        for (key, value) in &request.parameters {
            body.insert(key.clone(), value.clone());
        }
        if let Some(image) = &request.source_image {
            let encoded = base64::engine::general_purpose::STANDARD.encode(image);
            body.insert("image".to_string(), json!(encoded));
        }
        serde_json::Value::Object(body)
    }
}

impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, GenerationError> {
        let body = Self::build_body(request);
        trace!(
            endpoint = %self.endpoint,
            kind = request.kind.as_str(),
            "Sending generation request"
        );

        let call = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .timeout(timeout)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(endpoint = %self.endpoint, "Request aborted by cancellation");
                return Err(GenerationError::Cancelled);
            }
            result = call => result.map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(timeout)
                } else {
                    GenerationError::Transport(format!("request failed: {e}"))
                }
            })?,
        };

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            endpoint = %self.endpoint,
            status,
            bytes = bytes.len(),
            "Provider responded"
        );

        Ok(RawResponse::new(status, bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GenerationKind;

    #[test]
    fn test_body_contains_fixed_fields() {
        let request = ProviderRequest {
            kind: GenerationKind::Text,
            prompt: "describe a sword".to_string(),
            parameters: vec![("temperature".to_string(), json!(0.7))],
            source_image: None,
        };

        let body = ReqwestTransport::build_body(&request);
        assert_eq!(body["kind"], "text");
        assert_eq!(body["prompt"], "describe a sword");
        assert_eq!(body["temperature"], 0.7);
        assert!(body.get("image").is_none());
    }

    #[test]
    fn test_body_encodes_source_image() {
        let request = ProviderRequest {
            kind: GenerationKind::Image,
            prompt: "replace the tower".to_string(),
            parameters: vec![],
            source_image: Some(vec![1, 2, 3]),
        };

        let body = ReqwestTransport::build_body(&request);
        let encoded = body["image"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn test_transport_construction() {
        let transport = ReqwestTransport::new("https://api.example.com/v1/generate", "sk-token");
        assert!(transport.is_ok());
    }
}
