//! QuestGen - asynchronous generation-request orchestration for the quest editor.
//!
//! This library coordinates AI content generation for editor tooling: widgets
//! submit prompts, the orchestrator deduplicates identical requests, paces
//! calls to the provider, retries transient failures with exponential backoff,
//! and posts decoded results back to the UI through a thread-safe sink.
//!
//! # Architecture
//!
//! The system is composed of:
//! - **Request model** ([`request`]): validated requests with content-derived
//!   fingerprints used as dedup keys
//! - **Result store** ([`store`]): in-flight coalescing and terminal-result
//!   caching with age-based eviction
//! - **Dispatcher** ([`dispatch`]): bounded queue, worker pool, and pacing
//!   gate in front of the provider transport
//! - **Retry policy** ([`retry`]): transient-error classification and capped
//!   exponential backoff
//! - **Decoder** ([`decode`]): provider response bytes to text or RGBA images
//! - **Orchestrator** ([`orchestrator`]): the facade tying it all together
//!
//! # Example
//!
//! ```ignore
//! use questgen::config::OrchestratorConfig;
//! use questgen::decode::ImageRsDecoder;
//! use questgen::orchestrator::{ChannelSink, Orchestrator};
//! use questgen::request::{GenerationKind, GenerationRequest};
//! use questgen::transport::ReqwestTransport;
//! use std::sync::Arc;
//!
//! let transport = ReqwestTransport::new("https://provider.example/v1/generate", "token")?;
//! let (sink, mut deliveries) = ChannelSink::new();
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::default(),
//!     Arc::new(transport),
//!     Arc::new(ImageRsDecoder),
//!     Arc::new(sink),
//! );
//!
//! let request = GenerationRequest::new(
//!     GenerationKind::Text,
//!     "Describe the haunted lighthouse",
//!     vec![],
//!     "quest.act1.lighthouse.description",
//!     None,
//! )?;
//! let subscription = orchestrator.submit(request).await;
//!
//! // On the UI thread:
//! while let Some(delivery) = deliveries.recv().await {
//!     // write delivery.result into delivery.target_asset_id
//! }
//! ```

pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod request;
pub mod retry;
pub mod store;
pub mod transport;

pub use config::OrchestratorConfig;
pub use error::GenerationError;
pub use orchestrator::{ChannelSink, Delivery, Orchestrator, ResultSink, Subscription};
pub use request::{
    Fingerprint, GenerationKind, GenerationPayload, GenerationRequest, GenerationResult,
    GenerationStatus,
};

/// Library version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
