//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to the service layer
//! 3. Returns HTTP response (JSON, status code)

/// Gateway callback endpoint
pub mod gateway;
/// Service health endpoint
pub mod health;
/// Internal payments API
pub mod payments;
