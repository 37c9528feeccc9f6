//! Opaque chain value types handed to the stores by the transport layer.
//!
//! The stores never look inside these values beyond their identifiers. What they rely on is
//! the canonical string form: every value prints (`Display`) to a string that its `FromStr`
//! implementation parses back into an equal value. Snapshots store that string form and the
//! rehydrator turns it back into typed values on restart.

/// Block header, transaction and instant-lock value types
mod types;

pub use types::*;

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A chain value with a canonical, re-parseable string form.
pub trait ChainValue: FromStr<Err = ParseError> + fmt::Display + Clone + PartialEq {
	/// The key the chain store indexes this value under.
	fn id(&self) -> String;
}

/// Errors produced while parsing the canonical form of a chain value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
	#[error("Invalid hex: {0}")]
	InvalidHex(String),

	#[error("Invalid length: expected {expected} bytes, got {actual}")]
	InvalidLength { expected: usize, actual: usize },

	#[error("Invalid layout: {0}")]
	InvalidLayout(String),
}

/// Double SHA-256, byte-reversed and hex encoded (the usual display order for hashes).
pub fn display_hash(bytes: &[u8]) -> String {
	let first = Sha256::digest(bytes);
	let mut second = Sha256::digest(first).to_vec();
	second.reverse();
	hex::encode(second)
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>, ParseError> {
	hex::decode(value).map_err(|e| ParseError::InvalidHex(e.to_string()))
}
