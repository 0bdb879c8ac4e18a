//! Platform protocol: message types, envelopes and send services

pub mod envelope;
pub mod messages;
pub mod services;

pub use envelope::{
    RequestEnvelope, RequestMode, ResponseEnvelope, ResponseMessageEntry, ResponseType,
};
pub use messages::*;
