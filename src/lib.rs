//! Gossip hub: a verifiable-log personality that accepts signed heads from
//! known source logs, records them in a backend log and serves proofs over
//! that log through a small HTTP API.

// Export modules
pub mod backend;
pub mod keys;
pub mod leaf;
pub mod scanner;
pub mod service;

pub use backend::{BackendError, Code, LogBackend, MemoryBackend};
pub use keys::{HashAlgorithm, KeyRegistry, PublicKey, SourceLogKey};
pub use leaf::{HubLeaf, LeafError};
pub use scanner::{scan, LeafConsumer, ScanError};
pub use service::{Hub, HubClient, HubConfig, HubError, HubMetrics, HubOptions};
