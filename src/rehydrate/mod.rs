//! Schema-driven conversion of persisted snapshots into typed state.
//!
//! Snapshots are plain JSON without type tags. Each store declares a [`SchemaNode`] tree for
//! its exported shape; [`rehydrate`] walks the stored value against it, checks primitive kinds,
//! requires every declared field, runs chain value strings through their parsers and returns
//! a normalized copy. [`rehydrate_into`] then deserializes the normalized value into the
//! store's state type. Any mismatch aborts the whole conversion and names the offending path,
//! so a failed import never leaves a store half populated.

/// Schema description types
mod schema;

pub use schema::*;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Root segment of every reported path.
pub const ROOT_PATH: &str = "$";

#[derive(Debug, thiserror::Error)]
pub enum RehydrateError {
	#[error("Missing field at {path}")]
	MissingField { path: String },

	#[error("Type mismatch at {path}: expected {expected}, found {found}")]
	TypeMismatch {
		path: String,
		expected: String,
		found: &'static str,
	},

	#[error("Factory {factory} rejected value at {path}: {reason}")]
	FactoryRejected {
		path: String,
		factory: &'static str,
		reason: String,
	},

	#[error("Invalid key at {path}: {reason}")]
	InvalidKey { path: String, reason: String },

	#[error("Unsupported schema at {path}: {reason}")]
	UnsupportedSchema { path: String, reason: String },

	#[error("Conversion error: {0}")]
	Conversion(#[from] serde_json::Error),
}

impl RehydrateError {
	/// Path of the offending value, when the error is tied to one.
	pub fn path(&self) -> Option<&str> {
		match self {
			RehydrateError::MissingField { path }
			| RehydrateError::TypeMismatch { path, .. }
			| RehydrateError::FactoryRejected { path, .. }
			| RehydrateError::InvalidKey { path, .. }
			| RehydrateError::UnsupportedSchema { path, .. } => Some(path),
			RehydrateError::Conversion(_) => None,
		}
	}
}

/// Check `value` against `schema` and return its normalized copy.
pub fn rehydrate(value: &Value, schema: &SchemaNode) -> Result<Value, RehydrateError> {
	rehydrate_at(value, schema, ROOT_PATH)
}

/// Check `value` against `schema`, then deserialize the result into `T`.
pub fn rehydrate_into<T: DeserializeOwned>(
	value: &Value,
	schema: &SchemaNode,
) -> Result<T, RehydrateError> {
	let normalized = rehydrate(value, schema)?;
	Ok(serde_json::from_value(normalized)?)
}

fn rehydrate_at(value: &Value, schema: &SchemaNode, path: &str) -> Result<Value, RehydrateError> {
	match schema {
		SchemaNode::Primitive(kind) => {
			let matches = match kind {
				Kind::Number => value.is_number(),
				Kind::Unsigned => value.is_u64(),
				Kind::Boolean => value.is_boolean(),
				Kind::String => value.is_string(),
			};
			if !matches {
				return Err(mismatch(path, kind.name(), value));
			}
			Ok(value.clone())
		}
		SchemaNode::Factory(factory) => {
			let raw = value
				.as_str()
				.ok_or_else(|| mismatch(path, &format!("string ({})", factory.name()), value))?;
			let canonical = factory
				.apply(raw)
				.map_err(|e| RehydrateError::FactoryRejected {
					path: path.to_string(),
					factory: factory.name(),
					reason: e.to_string(),
				})?;
			Ok(Value::String(canonical))
		}
		SchemaNode::Object(fields) => {
			let input = value
				.as_object()
				.ok_or_else(|| mismatch(path, "object", value))?;
			// undeclared fields pass through untouched
			let mut output = input.clone();
			for (name, node) in fields {
				let field_path = child_path(path, name);
				let field = input
					.get(name)
					.ok_or(RehydrateError::MissingField { path: field_path.clone() })?;
				output.insert(name.clone(), rehydrate_at(field, node, &field_path)?);
			}
			Ok(Value::Object(output))
		}
		SchemaNode::Wildcard(node) => {
			let input = value
				.as_object()
				.ok_or_else(|| mismatch(path, "object", value))?;
			let mut output = Map::with_capacity(input.len());
			for (key, entry) in input {
				let entry_path = child_path(path, key);
				output.insert(key.clone(), rehydrate_at(entry, node, &entry_path)?);
			}
			Ok(Value::Object(output))
		}
		SchemaNode::IndexMap { max, values } => {
			let input = value
				.as_object()
				.ok_or_else(|| mismatch(path, "object", value))?;
			let mut output = Map::with_capacity(input.len());
			for (key, entry) in input {
				let entry_path = child_path(path, key);
				let in_range = key
					.parse::<u64>()
					.is_ok_and(|index| index <= *max && index.to_string() == *key);
				if !in_range {
					return Err(RehydrateError::InvalidKey {
						path: entry_path,
						reason: format!("expected a decimal index no greater than {}", max),
					});
				}
				output.insert(key.clone(), rehydrate_at(entry, values, &entry_path)?);
			}
			Ok(Value::Object(output))
		}
		SchemaNode::Array(node) => {
			if !node.is_leaf() {
				return Err(RehydrateError::UnsupportedSchema {
					path: path.to_string(),
					reason: "arrays of objects, maps or arrays are not supported".to_string(),
				});
			}
			let input = value
				.as_array()
				.ok_or_else(|| mismatch(path, "array", value))?;
			input
				.iter()
				.enumerate()
				.map(|(index, element)| rehydrate_at(element, node, &format!("{}[{}]", path, index)))
				.collect::<Result<Vec<_>, _>>()
				.map(Value::Array)
		}
		SchemaNode::Nullable(node) => {
			if value.is_null() {
				Ok(Value::Null)
			} else {
				rehydrate_at(value, node, path)
			}
		}
	}
}

fn child_path(parent: &str, key: &str) -> String {
	format!("{}.{}", parent, key)
}

fn mismatch(path: &str, expected: &str, found: &Value) -> RehydrateError {
	RehydrateError::TypeMismatch {
		path: path.to_string(),
		expected: expected.to_string(),
		found: kind_of(found),
	}
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}
