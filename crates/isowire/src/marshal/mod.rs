//! # Marshaling engine
//!
//! Turns domain objects that cannot cross a worker boundary into tagged plain
//! maps, and rebuilds them on the other side.
//!
//! ## Philosophy
//!
//! - **Static Table**: converters are registered once, when the registry is
//!   built. Marshalling walks the table and the first converter that accepts the
//!   object wins.
//! - **Identity Otherwise**: plain values, unregistered objects and maps with an
//!   unknown tag pass through unchanged.
//! - **Top Level Only**: only the value itself is inspected, not its children.

use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;

use crate::value::ErrorValue;
use crate::value::MARSHALLER_KEY;
use crate::value::Map;
use crate::value::Object;
use crate::value::Value;

pub mod request;
pub mod response;

pub use request::RequestMarshaller;
pub use response::ResponseMarshaller;

#[derive(Debug)]
pub enum MarshalError {
    /// The body of a domain object could not be read to the end.
    Body { tag: &'static str, details: String },
    /// A marshalled envelope lacks a field its converter needs.
    MissingField { tag: &'static str, field: &'static str },
    /// A field holds a value the converter cannot use.
    InvalidField { tag: &'static str, field: &'static str, details: String },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body { tag, details } => write!(f, "{}: failed to read body: {}", tag, details),
            Self::MissingField { tag, field } => write!(f, "{}: missing field '{}'", tag, field),
            Self::InvalidField { tag, field, details } => {
                write!(f, "{}: invalid field '{}': {}", tag, field, details)
            }
        }
    }
}

impl std::error::Error for MarshalError {}

impl From<MarshalError> for ErrorValue {
    fn from(e: MarshalError) -> Self {
        ErrorValue::new("MarshalError", e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarshalError>;

/// A converter for one kind of domain object.
#[async_trait::async_trait]
pub trait Marshaller: Send + Sync + 'static {
    /// The value stored under `__marshaller__`.
    fn tag(&self) -> &'static str;

    /// Whether this converter handles `object`.
    fn accepts(&self, object: &Object) -> bool;

    /// Flattens an accepted object into plain fields. The tag is added by the
    /// registry.
    async fn marshal(&self, object: Object) -> Result<Map>;

    /// Rebuilds the object from its fields, tag already removed.
    async fn unmarshal(&self, fields: Map) -> Result<Value>;
}

/// The table of converters used on one side of a worker boundary.
#[derive(Clone)]
pub struct MarshalRegistry {
    marshallers: Vec<Arc<dyn Marshaller>>,
}

impl MarshalRegistry {
    /// A registry with the built-in HTTP request and response converters.
    pub fn new() -> Self {
        Self::empty()
            .with(ResponseMarshaller)
            .with(RequestMarshaller)
    }

    /// A registry without any converter, marshalling is the identity.
    pub fn empty() -> Self {
        Self { marshallers: Vec::new() }
    }

    pub fn with(mut self, marshaller: impl Marshaller) -> Self {
        self.register(marshaller);
        self
    }

    pub fn register(&mut self, marshaller: impl Marshaller) -> &mut Self {
        self.marshallers.push(Arc::new(marshaller));
        self
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.marshallers.iter().map(|m| m.tag())
    }

    fn by_tag(&self, tag: &str) -> Option<Arc<dyn Marshaller>> {
        self.marshallers.iter().find(|m| m.tag() == tag).cloned()
    }

    /// Converts `value` into its wire form.
    pub async fn marshal(&self, value: Value) -> Result<Value> {
        let object = match value {
            Value::Object(object) => object,
            plain => return Ok(plain),
        };

        let Some(marshaller) = self.marshallers.iter().find(|m| m.accepts(&object)) else {
            return Ok(Value::Object(object));
        };

        let mut fields = marshaller.marshal(object).await?;
        fields.insert(MARSHALLER_KEY.to_string(), Value::from(marshaller.tag()));
        Ok(Value::Map(fields))
    }

    /// Restores a value previously produced by `marshal`.
    pub async fn unmarshal(&self, value: Value) -> Result<Value> {
        let Some(marshaller) = value.marshaller_tag().and_then(|tag| self.by_tag(tag)) else {
            return Ok(value);
        };
        let mut fields = match value {
            Value::Map(fields) => fields,
            other => return Ok(other),
        };

        fields.remove(MARSHALLER_KEY);
        marshaller.unmarshal(fields).await
    }

    /// Marshals every argument concurrently, keeping their order.
    pub async fn marshal_args(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        try_join_all(args.into_iter().map(|arg| self.marshal(arg))).await
    }

    /// Unmarshals every argument concurrently, keeping their order.
    pub async fn unmarshal_args(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        try_join_all(args.into_iter().map(|arg| self.unmarshal(arg))).await
    }
}

impl Default for MarshalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MarshalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tags()).finish()
    }
}

// --- Field helpers shared by the built-in converters ---

pub(crate) fn take(fields: &mut Map, tag: &'static str, field: &'static str) -> Result<Value> {
    fields
        .remove(field)
        .ok_or(MarshalError::MissingField { tag, field })
}

pub(crate) fn take_string(fields: &mut Map, tag: &'static str, field: &'static str) -> Result<String> {
    match take(fields, tag, field)? {
        Value::String(s) => Ok(s),
        other => Err(MarshalError::InvalidField {
            tag,
            field,
            details: format!("expected a string, found {:?}", other),
        }),
    }
}

pub(crate) fn take_bytes(fields: &mut Map, tag: &'static str, field: &'static str) -> Result<bytes::Bytes> {
    match take(fields, tag, field)? {
        Value::Bytes(b) => Ok(b),
        Value::Null => Ok(bytes::Bytes::new()),
        other => Err(MarshalError::InvalidField {
            tag,
            field,
            details: format!("expected bytes, found {:?}", other),
        }),
    }
}

/// Headers as a list of `[name, value]` pairs.
pub(crate) fn headers_to_value(tag: &'static str, headers: &HeaderMap) -> Result<Value> {
    let mut pairs = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let value = value.to_str().map_err(|e| MarshalError::InvalidField {
            tag,
            field: "headers",
            details: format!("{}: {}", name, e),
        })?;
        pairs.push(Value::List(vec![Value::from(name.as_str()), Value::from(value)]));
    }
    Ok(Value::List(pairs))
}

pub(crate) fn headers_from_value(tag: &'static str, value: Value) -> Result<HeaderMap> {
    let invalid = |details: String| MarshalError::InvalidField { tag, field: "headers", details };

    let pairs = match value {
        Value::List(pairs) => pairs,
        other => return Err(invalid(format!("expected a list, found {:?}", other))),
    };

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for pair in pairs {
        let (Some(name), Some(value)) = (
            pair.as_list().and_then(|p| p.first()).and_then(Value::as_str),
            pair.as_list().and_then(|p| p.get(1)).and_then(Value::as_str),
        ) else {
            return Err(invalid(format!("expected a [name, value] pair, found {:?}", pair)));
        };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}
