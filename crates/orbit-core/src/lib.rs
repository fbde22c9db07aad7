//! Orbit Core Library
//!
//! Provider normalization and relay layer: one process that drives
//! heterogeneous AI coding-agent backends and renders their event streams
//! as a single unified timeline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       orbit-core                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  acp/        - JSON-RPC client over provider subprocesses   │
//! │  normalize/  - streaming normalizer, delta buffering        │
//! │  provider/   - adapter contract, health, retry, registry    │
//! │  relay/      - client/anchor socket router                  │
//! │  types/      - normalized session/event model, validation   │
//! │  config.rs   - provider and relay settings                  │
//! │  error.rs    - error types                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod acp;
pub mod config;
pub mod error;
pub mod normalize;
pub mod provider;
pub mod relay;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result, ValidationFailure};
pub use types::*;

// Re-export the ACP client layer
pub use acp::{AcpClient, AcpNotification, AcpTransport, ProcessTransport, ProtocolHandler};

// Re-export normalization
pub use normalize::StreamNormalizer;

// Re-export provider components
pub use provider::{
    AcpProviderAdapter, AdapterFactory, LifecycleReport, ProviderAdapter, ProviderRegistry,
};

// Re-export the relay router
pub use relay::{PeerHandle, PeerRole, RelayRouter};

// Re-export configuration
pub use config::{OrbitConfig, RelaySettings};
