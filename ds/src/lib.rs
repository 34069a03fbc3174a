//! Delivery service for Felix.
//!
//! Every connection in Felix carries exactly one exchange: the caller writes one
//! [`Envelope`], the callee answers with one [`Envelope`], and the connection is
//! closed. This crate holds the envelope type with its reserved control
//! vocabulary, the line-delimited JSON framing and both sides of the exchange.

pub mod envelope;
pub mod transport;
pub mod wire;

mod error;

pub use envelope::{split_control, ControlKind, Envelope};
pub use error::DeliveryServiceError;
pub use transport::{request, Exchange, DEFAULT_EXCHANGE_TIMEOUT};
pub use wire::{EnvelopeCodec, MAX_LINE_LENGTH};
