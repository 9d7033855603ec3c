//! Transport-level primitives for the ESL protocol engine.
//!
//! This crate owns nothing about the wire grammar — it only knows how to
//! bind/accept on the outbound server side and connect-with-timeout on the
//! inbound client side. Framing and event parsing live in `esl`.

mod connect;
mod error;
mod listener;

pub use connect::connect_with_timeout;
pub use error::Error;
pub use listener::CandidateListener;
