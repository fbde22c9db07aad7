//! Streaming event normalization
//!
//! Translates heterogeneous provider notifications into the unified
//! [`NormalizedEvent`](crate::types::NormalizedEvent) model: `classify`
//! discriminates raw shapes, `normalizer` buffers partial deltas and
//! flushes immutable events in authoritative order.

mod classify;
mod normalizer;

pub use classify::{classify, RawKind};
pub use normalizer::StreamNormalizer;
