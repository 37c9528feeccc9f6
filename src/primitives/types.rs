use super::{ChainValue, ParseError, decode_hex, display_hash};

use std::fmt;
use std::str::FromStr;

/// Serialized block header size in bytes.
pub const HEADER_SIZE: usize = 80;

/// Length of a hex encoded 32-byte hash.
const HASH_HEX_LEN: usize = 64;

/// Block header together with the height it was received at.
///
/// Canonical form: `<height>:<80 header bytes as hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
	height: u64,
	raw: Vec<u8>,
}

impl BlockHeader {
	pub fn new(height: u64, raw: Vec<u8>) -> Result<Self, ParseError> {
		if raw.len() != HEADER_SIZE {
			return Err(ParseError::InvalidLength {
				expected: HEADER_SIZE,
				actual: raw.len(),
			});
		}
		Ok(Self { height, raw })
	}

	pub fn height(&self) -> u64 {
		self.height
	}

	pub fn hash(&self) -> String {
		display_hash(&self.raw)
	}

	pub fn raw(&self) -> &[u8] {
		&self.raw
	}
}

impl ChainValue for BlockHeader {
	fn id(&self) -> String {
		self.hash()
	}
}

impl fmt::Display for BlockHeader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.height, hex::encode(&self.raw))
	}
}

impl FromStr for BlockHeader {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (height, raw) = s
			.split_once(':')
			.ok_or_else(|| ParseError::InvalidLayout("expected <height>:<hex>".to_string()))?;
		let height = height
			.parse::<u64>()
			.map_err(|e| ParseError::InvalidLayout(format!("invalid height {:?}: {}", height, e)))?;
		Self::new(height, decode_hex(raw)?)
	}
}

/// Raw transaction. Canonical form is the hex encoded serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	raw: Vec<u8>,
}

impl Transaction {
	pub fn new(raw: Vec<u8>) -> Result<Self, ParseError> {
		if raw.is_empty() {
			return Err(ParseError::InvalidLayout("empty transaction".to_string()));
		}
		Ok(Self { raw })
	}

	pub fn txid(&self) -> String {
		display_hash(&self.raw)
	}

	pub fn raw(&self) -> &[u8] {
		&self.raw
	}
}

impl ChainValue for Transaction {
	fn id(&self) -> String {
		self.txid()
	}
}

impl fmt::Display for Transaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(&self.raw))
	}
}

impl FromStr for Transaction {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(decode_hex(s)?)
	}
}

/// Instant-lock message for a single transaction.
///
/// Canonical form: `<txid>:<message bytes as hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantLock {
	txid: String,
	raw: Vec<u8>,
}

impl InstantLock {
	pub fn new(txid: impl Into<String>, raw: Vec<u8>) -> Result<Self, ParseError> {
		let txid = txid.into().to_lowercase();
		if txid.len() != HASH_HEX_LEN || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
			return Err(ParseError::InvalidLayout(format!("invalid txid {:?}", txid)));
		}
		if raw.is_empty() {
			return Err(ParseError::InvalidLayout("empty instant lock".to_string()));
		}
		Ok(Self { txid, raw })
	}

	/// The transaction this lock attests.
	pub fn txid(&self) -> &str {
		&self.txid
	}

	pub fn raw(&self) -> &[u8] {
		&self.raw
	}
}

impl ChainValue for InstantLock {
	fn id(&self) -> String {
		self.txid.clone()
	}
}

impl fmt::Display for InstantLock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.txid, hex::encode(&self.raw))
	}
}

impl FromStr for InstantLock {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (txid, raw) = s
			.split_once(':')
			.ok_or_else(|| ParseError::InvalidLayout("expected <txid>:<hex>".to_string()))?;
		Self::new(txid, decode_hex(raw)?)
	}
}
