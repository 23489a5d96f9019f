//! Request and result value types.

use std::sync::Arc;

use image::RgbaImage;

use super::Fingerprint;
use crate::error::GenerationError;

/// What kind of content a request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationKind {
    /// Prose content (quest descriptions, dialogue, item flavor text)
    Text,
    /// Illustrative imagery (scene concepts, item art)
    Image,
}

impl GenerationKind {
    /// Stable identifier used in fingerprints and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Text => "text",
            GenerationKind::Image => "image",
        }
    }
}

/// An author-issued generation request.
///
/// Immutable once constructed; all fields are read through accessors.
/// The fingerprint is computed at construction and identifies the request
/// for deduplication, so two widgets asking the same question share one
/// outbound call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    fingerprint: Fingerprint,
    kind: GenerationKind,
    prompt: String,
    parameters: Vec<(String, serde_json::Value)>,
    target_asset_id: String,
    source_image: Option<Arc<Vec<u8>>>,
}

impl GenerationRequest {
    /// Creates a validated generation request.
    ///
    /// # Arguments
    ///
    /// * `kind` - Content kind to generate
    /// * `prompt` - Prompt text sent to the provider; must be non-empty
    /// * `parameters` - Ordered provider tuning options, passed through opaquely
    /// * `target_asset_id` - Quest-data slot the result is destined for;
    ///   used only for UI correlation, never interpreted by the core
    /// * `source_image` - Optional image attachment (e.g., a masked
    ///   screenshot for image-edit requests)
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the prompt is empty or whitespace-only.
    pub fn new(
        kind: GenerationKind,
        prompt: impl Into<String>,
        parameters: Vec<(String, serde_json::Value)>,
        target_asset_id: impl Into<String>,
        source_image: Option<Vec<u8>>,
    ) -> Result<Self, GenerationError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }

        let target_asset_id = target_asset_id.into();
        let fingerprint = Fingerprint::compute(
            kind,
            &prompt,
            &parameters,
            &target_asset_id,
            source_image.as_deref(),
        );

        Ok(Self {
            fingerprint,
            kind,
            prompt,
            parameters,
            target_asset_id,
            source_image: source_image.map(Arc::new),
        })
    }

    /// The dedup/cache key for this request.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn kind(&self) -> GenerationKind {
        self.kind
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Ordered provider tuning options, opaque to the core.
    pub fn parameters(&self) -> &[(String, serde_json::Value)] {
        &self.parameters
    }

    /// The quest-data slot this result is destined for.
    pub fn target_asset_id(&self) -> &str {
        &self.target_asset_id
    }

    /// Optional image attachment for image-edit requests.
    pub fn source_image(&self) -> Option<&[u8]> {
        self.source_image.as_deref().map(|v| v.as_slice())
    }
}

/// Lifecycle state of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Work is queued or in flight
    Pending,
    /// Terminal: payload available
    Succeeded,
    /// Terminal: last error preserved
    Failed,
    /// Terminal: cancelled by the user or session teardown
    Cancelled,
}

impl GenerationStatus {
    /// Returns true for the three terminal states.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationStatus::Pending)
    }
}

/// Decoded content returned by the provider.
///
/// Images are reference-counted so fanning a result out to several
/// subscribers never copies pixel data.
#[derive(Debug, Clone)]
pub enum GenerationPayload {
    Text(String),
    Image(Arc<RgbaImage>),
}

impl GenerationPayload {
    /// Returns the text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            GenerationPayload::Text(text) => Some(text),
            GenerationPayload::Image(_) => None,
        }
    }

    /// Returns the decoded bitmap, if this is an image payload.
    pub fn as_image(&self) -> Option<&RgbaImage> {
        match self {
            GenerationPayload::Text(_) => None,
            GenerationPayload::Image(image) => Some(image),
        }
    }
}

/// Terminal outcome of a generation request.
///
/// Produced once by the orchestrator; read-only once handed to the UI.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Terminal status (never `Pending` once delivered)
    pub status: GenerationStatus,
    /// Present only when `Succeeded`
    pub payload: Option<GenerationPayload>,
    /// Present only when `Failed`
    pub error: Option<GenerationError>,
    /// Count of HTTP attempts made
    pub attempts: u32,
}

impl GenerationResult {
    /// A successful result carrying the decoded payload.
    pub fn succeeded(payload: GenerationPayload, attempts: u32) -> Self {
        Self {
            status: GenerationStatus::Succeeded,
            payload: Some(payload),
            error: None,
            attempts,
        }
    }

    /// A failed result preserving the last error.
    pub fn failed(error: GenerationError, attempts: u32) -> Self {
        Self {
            status: GenerationStatus::Failed,
            payload: None,
            error: Some(error),
            attempts,
        }
    }

    /// A cancelled result.
    pub fn cancelled(attempts: u32) -> Self {
        Self {
            status: GenerationStatus::Cancelled,
            payload: None,
            error: None,
            attempts,
        }
    }
}
