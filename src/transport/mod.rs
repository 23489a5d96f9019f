//! Transport boundary to the generative-AI provider.
//!
//! The core never speaks the provider's wire protocol itself; it hands a
//! [`ProviderRequest`] to a [`Transport`] implementation and gets back the
//! raw HTTP outcome. Credentials (bearer token) live entirely inside the
//! transport. This abstraction also enables mock transports in tests.

mod http;
mod mock;

pub use http::ReqwestTransport;
pub use mock::{ok_response, status_response, MockTransport};

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::GenerationError;
use crate::request::{GenerationKind, GenerationRequest};

/// Outbound call payload, provider-schema-agnostic.
///
/// Built from a [`GenerationRequest`]; the transport implementation maps it
/// onto the provider's actual wire format.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub kind: GenerationKind,
    pub prompt: String,
    /// Ordered tuning options, passed through opaquely
    pub parameters: Vec<(String, serde_json::Value)>,
    /// Optional image attachment for image-edit requests
    pub source_image: Option<Vec<u8>>,
}

impl From<&GenerationRequest> for ProviderRequest {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            kind: request.kind(),
            prompt: request.prompt().to_string(),
            parameters: request.parameters().to_vec(),
            source_image: request.source_image().map(|b| b.to_vec()),
        }
    }
}

/// A raw HTTP response from the provider.
///
/// Any response that arrived is `Ok` at this layer, whatever its status;
/// classifying non-2xx statuses is the decoder's job. Transports return
/// `Err` only when no response arrived at all.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Async HTTP transport to the provider.
///
/// Implementations attach authentication, honor the per-attempt timeout,
/// and abort best-effort when the cancellation token fires. The dispatcher
/// additionally enforces the timeout from the outside, so a transport that
/// ignores it cannot hang a worker.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<RawResponse, GenerationError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GenerationRequest;
    use serde_json::json;

    #[test]
    fn test_provider_request_from_generation_request() {
        let request = GenerationRequest::new(
            GenerationKind::Text,
            "describe a sword",
            vec![("temperature".to_string(), json!(0.7))],
            "quest.1.description",
            None,
        )
        .unwrap();

        let provider_request = ProviderRequest::from(&request);
        assert_eq!(provider_request.kind, GenerationKind::Text);
        assert_eq!(provider_request.prompt, "describe a sword");
        assert_eq!(provider_request.parameters.len(), 1);
        assert!(provider_request.source_image.is_none());
    }

    #[test]
    fn test_raw_response_success_range() {
        assert!(RawResponse::new(200, vec![]).is_success());
        assert!(RawResponse::new(204, vec![]).is_success());
        assert!(!RawResponse::new(199, vec![]).is_success());
        assert!(!RawResponse::new(301, vec![]).is_success());
        assert!(!RawResponse::new(429, vec![]).is_success());
        assert!(!RawResponse::new(500, vec![]).is_success());
    }
}
