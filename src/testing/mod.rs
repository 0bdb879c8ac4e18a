//! Testing utilities and mock implementations
//!
//! Doubles for the transport and the other collaborators so the middleware
//! core can be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
