//! Business logic services.
//!
//! Services contain core protocol and payment logic separated from HTTP
//! handlers. Handlers translate the wire; services decide and persist.

pub mod access_service;
pub mod gateway_service;
pub mod payment_service;
pub mod signature;
pub mod state_machine;
