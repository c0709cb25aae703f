//! dnsprobe
//!
//! Bulk DNS resolution of candidate names with optional wildcard detection.
//!
//! Candidates are read one per line, resolved concurrently against a single
//! upstream server and written back out depending on whether they resolved.
//! With wildcard detection enabled, names whose answers are fully explained
//! by their zone's wildcard record are treated as unresolved.

/// Resolution, wildcard classification and the worker pool
pub mod dns;
