use crate::primitives::{ChainValue, ParseError};

/// Primitive JSON kinds a schema leaf can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	Number,
	/// Non-negative integer that fits in a `u64`.
	Unsigned,
	Boolean,
	String,
}

impl Kind {
	pub fn name(&self) -> &'static str {
		match self {
			Kind::Number => "number",
			Kind::Unsigned => "unsigned integer",
			Kind::Boolean => "boolean",
			Kind::String => "string",
		}
	}
}

/// Parser turning a stored string into the canonical form of a chain value.
#[derive(Clone, Copy)]
pub struct Factory {
	name: &'static str,
	parse: fn(&str) -> Result<String, ParseError>,
}

impl Factory {
	/// Factory for any [`ChainValue`]: parse, then print back to canonical form.
	pub fn of<T: ChainValue>(name: &'static str) -> Self {
		Self {
			name,
			parse: canonicalize::<T>,
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn apply(&self, raw: &str) -> Result<String, ParseError> {
		(self.parse)(raw)
	}
}

impl std::fmt::Debug for Factory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Factory").field(&self.name).finish()
	}
}

fn canonicalize<T: ChainValue>(raw: &str) -> Result<String, ParseError> {
	raw.parse::<T>().map(|value| value.to_string())
}

/// Shape description the rehydrator checks persisted data against.
#[derive(Debug, Clone)]
pub enum SchemaNode {
	/// Leaf that must be a JSON value of the given kind.
	Primitive(Kind),
	/// Leaf string run through a chain value parser.
	Factory(Factory),
	/// Fixed set of required fields, in declaration order.
	Object(Vec<(String, SchemaNode)>),
	/// Homogeneous map: the sub-schema applies to every key of the input object.
	Wildcard(Box<SchemaNode>),
	/// Homogeneous map keyed by decimal integers no greater than `max`.
	IndexMap { max: u64, values: Box<SchemaNode> },
	/// Every element must match the sub-schema. Only leaf element schemas are supported.
	Array(Box<SchemaNode>),
	/// `null`, or a value matching the sub-schema.
	Nullable(Box<SchemaNode>),
}

impl SchemaNode {
	pub fn number() -> Self {
		SchemaNode::Primitive(Kind::Number)
	}

	pub fn unsigned() -> Self {
		SchemaNode::Primitive(Kind::Unsigned)
	}

	pub fn boolean() -> Self {
		SchemaNode::Primitive(Kind::Boolean)
	}

	pub fn string() -> Self {
		SchemaNode::Primitive(Kind::String)
	}

	pub fn factory<T: ChainValue>(name: &'static str) -> Self {
		SchemaNode::Factory(Factory::of::<T>(name))
	}

	pub fn object<I, K>(fields: I) -> Self
	where
		I: IntoIterator<Item = (K, SchemaNode)>,
		K: Into<String>,
	{
		SchemaNode::Object(
			fields
				.into_iter()
				.map(|(name, node)| (name.into(), node))
				.collect(),
		)
	}

	pub fn map(values: SchemaNode) -> Self {
		SchemaNode::Wildcard(Box::new(values))
	}

	pub fn index_map(max: u64, values: SchemaNode) -> Self {
		SchemaNode::IndexMap {
			max,
			values: Box::new(values),
		}
	}

	pub fn array(elements: SchemaNode) -> Self {
		SchemaNode::Array(Box::new(elements))
	}

	pub fn nullable(inner: SchemaNode) -> Self {
		SchemaNode::Nullable(Box::new(inner))
	}

	/// Whether this node describes a single value rather than a container.
	pub(crate) fn is_leaf(&self) -> bool {
		match self {
			SchemaNode::Primitive(_) | SchemaNode::Factory(_) => true,
			SchemaNode::Nullable(inner) => inner.is_leaf(),
			SchemaNode::Object(_)
			| SchemaNode::Wildcard(_)
			| SchemaNode::IndexMap { .. }
			| SchemaNode::Array(_) => false,
		}
	}
}
