//! # cloak-crypto
//!
//! Client side of the remote crypto engine. The engine owns keys and
//! algorithms; this crate only decides *whether* a value needs a round trip
//! and carries it there and back.
//!
//! - [`EnvelopeDetector`] recognises ciphertext envelopes
//!   (`scheme:policyId:base64(iv+ct+tag)` and the legacy unprefixed form)
//!   without any I/O.
//! - [`CryptoClient`] performs `encrypt`, `decrypt`, `encrypt_for_search`
//!   and their batch variants against the current engine endpoint.
//! - [`EngineTransport`] is the HTTP seam; [`HttpEngineTransport`] is the
//!   reqwest implementation.

pub mod client;
pub mod envelope;
pub mod error;
pub mod transport;

pub use client::CryptoClient;
pub use envelope::EnvelopeDetector;
pub use error::CryptoError;
pub use transport::{
    EngineOp, EngineRequest, EngineResponse, EngineTransport, HttpEngineTransport, NOT_ENCRYPTED,
};
