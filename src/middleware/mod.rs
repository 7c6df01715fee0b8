//! HTTP middleware.
//!
//! One layer lives here: the bearer-key gate in front of the internal
//! payment API. It runs before those route handlers and:
//! - Extracts the `Authorization: Bearer` header
//! - Compares the key's SHA-256 digest against the configured one
//! - Short-circuits with 401 on any mismatch
//!
//! The gateway callback and health routes are mounted outside this layer;
//! callbacks authenticate per request through their signature.

/// Static API key authentication middleware
pub mod auth;
