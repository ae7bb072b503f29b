//! Runtime values produced by resolvers and the signatures resolvers are registered with.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;
use thiserror::Error;

use crate::context::Context;
use crate::json_ext::LinkedPath;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::to_path;

/// A GraphQL object backed by a Rust value.
///
/// Fields without a registered resolver are read through [`ObjectValue::field`].
pub trait ObjectValue: Any + Send + Sync {
    /// Returns the name of the concrete object type this value represents.
    ///
    /// Used when the schema indicates an abstract (interface or union) type and no type
    /// resolver was registered for it.
    fn type_name(&self) -> Option<&str> {
        None
    }

    /// Reads the field `name` of this object. `None` is treated as null.
    fn field(&self, name: &str) -> Option<ResolvedValue>;
}

impl dyn ObjectValue {
    /// Downcast to the concrete Rust type.
    pub fn downcast_ref<T: ObjectValue>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

/// The value of a resolved field
#[derive(Clone)]
pub enum ResolvedValue {
    /// * JSON null represents GraphQL null
    /// * A GraphQL enum value is represented as a JSON string
    /// * GraphQL built-in scalars are coerced according to their respective *Result Coercion* spec
    /// * For custom scalars, the registered serializer decides (any JSON value by default)
    /// * A JSON object can also stand for a GraphQL object, whose fields are read by name
    Leaf(Value),

    /// Expected where the GraphQL type is an object, interface, or union type
    Object(Arc<dyn ObjectValue>),

    /// Expected for GraphQL list types
    List(Vec<ResolvedValue>),
}

impl ResolvedValue {
    /// Construct a null leaf resolved value
    pub fn null() -> Self {
        Self::Leaf(Value::Null)
    }

    /// Construct a leaf resolved value from something that is convertible to JSON
    pub fn leaf(json: impl Into<Value>) -> Self {
        Self::Leaf(json.into())
    }

    /// Construct an object resolved value
    pub fn object(object: impl ObjectValue) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Construct an object resolved value or null
    pub fn opt_object(object: Option<impl ObjectValue>) -> Self {
        match object {
            Some(object) => Self::object(object),
            None => Self::null(),
        }
    }

    /// Construct a list resolved value from an iterator
    pub fn list<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::List(iter.into_iter().collect())
    }
}

impl From<Value> for ResolvedValue {
    fn from(value: Value) -> Self {
        Self::Leaf(value)
    }
}

impl fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Self::Object(object) => f
                .debug_tuple("Object")
                .field(&object.type_name().unwrap_or("?"))
                .finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

pub(crate) static NULL: Value = Value::Null;

/// Borrowed view of the parent value a field is resolved on.
#[derive(Clone, Copy)]
pub enum SourceValue<'a> {
    /// A JSON value, usually an object.
    Json(&'a Value),

    /// A Rust object.
    Object(&'a dyn ObjectValue),
}

impl<'a> SourceValue<'a> {
    /// The parent as JSON, if it is one.
    pub fn as_json(&self) -> Option<&'a Value> {
        match *self {
            SourceValue::Json(value) => Some(value),
            SourceValue::Object(_) => None,
        }
    }

    /// Read a key of a JSON parent.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.as_json().and_then(|value| value.as_object()?.get(key))
    }

    /// Downcast a Rust parent to its concrete type.
    pub fn downcast_ref<T: ObjectValue>(&self) -> Option<&'a T> {
        match *self {
            SourceValue::Object(object) => object.downcast_ref::<T>(),
            SourceValue::Json(_) => None,
        }
    }

    pub(crate) fn from_resolved(value: &'a ResolvedValue) -> Self {
        match value {
            ResolvedValue::Leaf(json) => SourceValue::Json(json),
            ResolvedValue::Object(object) => SourceValue::Object(&**object),
            ResolvedValue::List(_) => SourceValue::Json(&NULL),
        }
    }
}

impl fmt::Debug for SourceValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            SourceValue::Object(object) => f
                .debug_tuple("Object")
                .field(&object.type_name().unwrap_or("?"))
                .finish(),
        }
    }
}

/// Everything a resolver gets to see about the field being resolved.
#[derive(Clone, Copy)]
#[non_exhaustive]
pub struct ResolveInfo<'a> {
    /// The object this field belongs to.
    pub parent: SourceValue<'a>,
    /// Coerced argument values, with defaults applied.
    pub arguments: &'a Object,
    /// The field name (not the alias).
    pub field_name: &'a str,
    /// The concrete object type owning the field.
    pub parent_type: &'a str,
    /// Coerced variable values of the request.
    pub variables: &'a Object,
    /// The request context.
    pub context: &'a Context,
    pub(crate) path: LinkedPath<'a>,
}

impl<'a> ResolveInfo<'a> {
    /// The response path of the field being resolved.
    pub fn path(&self) -> Path {
        to_path(self.path)
    }

    /// The coerced value of an argument.
    pub fn argument(&self, name: &str) -> Option<&'a Value> {
        self.arguments.get(name)
    }
}

/// Error returned by a resolver.
///
/// Turned into exactly one GraphQL error at the field's path; `extensions` are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// Extensions copied into the GraphQL error.
    pub extensions: Object,
}

impl FieldError {
    /// A field error with a message and no extensions.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Object::new(),
        }
    }

    /// Add an extension entry.
    pub fn with_extension(mut self, key: impl Into<ByteString>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A resolver that completes without suspending.
pub type SyncResolverFn =
    dyn for<'a> Fn(&ResolveInfo<'a>) -> Result<ResolvedValue, FieldError> + Send + Sync;

/// A resolver that may suspend.
pub type AsyncResolverFn = dyn for<'a> Fn(ResolveInfo<'a>) -> BoxFuture<'a, Result<ResolvedValue, FieldError>>
    + Send
    + Sync;

/// Picks the concrete object type of a value returned for an interface or union field.
pub type TypeResolverFn = dyn for<'a> Fn(SourceValue<'a>) -> Option<String> + Send + Sync;

/// Serializes the internal value of a custom scalar for the response.
pub type ScalarSerializerFn = dyn Fn(&Value) -> Result<Value, FieldError> + Send + Sync;

/// A registered field resolver; whether it suspends is fixed at registration.
#[derive(Clone)]
pub(crate) enum FieldResolver {
    Sync(Arc<SyncResolverFn>),
    Async(Arc<AsyncResolverFn>),
}

impl FieldResolver {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, FieldResolver::Async(_))
    }
}

impl fmt::Debug for FieldResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldResolver::Sync(_) => f.write_str("FieldResolver::Sync"),
            FieldResolver::Async(_) => f.write_str("FieldResolver::Async"),
        }
    }
}

/// The concrete type name announced by a value itself.
pub(crate) fn default_type_name<'a>(value: SourceValue<'a>) -> Option<&'a str> {
    match value {
        SourceValue::Object(object) => object.type_name(),
        SourceValue::Json(json) => json.as_object()?.get("__typename")?.as_str(),
    }
}
