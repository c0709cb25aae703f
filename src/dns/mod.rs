//! DNS Probing
//!
//! # Module Structure
//!
//! * `buffer` - Low-level packet buffer operations
//! * `protocol` - DNS protocol definitions and packet handling
//! * `client` - DNS client for outgoing queries
//! * `resolve` - Turns an upstream response into an answer set
//! * `candidate` - Input normalization and zone computation
//! * `wildcard` - Wildcard signatures and the masking check
//! * `probe` - Classification of a single candidate
//! * `dispatch` - Worker pool and result sinks
//! * `context` - Run configuration and component wiring

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// Candidate name normalization
pub mod candidate;

/// DNS client for making outgoing queries
pub mod client;

/// Run configuration and component wiring
pub mod context;

/// Worker pool feeding candidates through the prober
pub mod dispatch;

/// Per candidate classification
pub mod probe;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// Answer set extraction from upstream responses
pub mod resolve;

/// Wildcard zone detection
pub mod wildcard;

/// Internal network utilities
mod netutil;
