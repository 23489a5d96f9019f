//! Generation request and result model.
//!
//! Immutable value types describing what an author asked the tool to
//! generate and what came back. Requests are validated at construction and
//! carry a deterministic fingerprint used as the dedup/cache key.

mod fingerprint;
mod types;

pub use fingerprint::Fingerprint;
pub use types::{
    GenerationKind, GenerationPayload, GenerationRequest, GenerationResult, GenerationStatus,
};
