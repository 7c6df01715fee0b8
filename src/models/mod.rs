//! Data models representing database entities and the gateway wire format.

/// Gateway callback wire types and result codes
pub mod callback;
/// Payment entity and status lifecycle
pub mod payment;
/// User entity
pub mod user;
