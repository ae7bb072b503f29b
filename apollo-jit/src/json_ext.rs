//! JSON value aliases and response paths.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// One element of a [`Path`]: either an object key or a list index.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index into a list.
    Index(usize),

    /// A response key.
    Key(String),
}

/// A path into the `data` of a response, as found in GraphQL errors.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    /// Create an empty path.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Number of elements in the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path points at the root of the response.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a key.
    pub fn push_key(&mut self, key: impl Into<String>) {
        self.0.push(PathElement::Key(key.into()))
    }

    /// Append an index.
    pub fn push_index(&mut self, index: usize) {
        self.0.push(PathElement::Index(index))
    }

    /// Iterate over path elements, from the root.
    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    /// Parses `a/1/b` style paths; numeric segments become indexes.
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::Key(segment.to_string()),
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

/// A path segment borrowed from the plan while executing.
#[derive(Clone, Copy, Debug)]
pub(crate) enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Reverse linked list of path segments living on the execution stack.
///
/// Only materialized into an owned [`Path`] when a field error is recorded or a resolver asks
/// for it.
pub(crate) type LinkedPath<'a> = Option<&'a LinkedPathElement<'a>>;

#[derive(Debug)]
pub(crate) struct LinkedPathElement<'a> {
    pub(crate) element: PathSegment<'a>,
    pub(crate) next: LinkedPath<'a>,
}

pub(crate) fn to_path(mut link: LinkedPath<'_>) -> Path {
    let mut elements = Vec::new();
    while let Some(node) = link {
        elements.push(match node.element {
            PathSegment::Key(key) => PathElement::Key(key.to_string()),
            PathSegment::Index(index) => PathElement::Index(index),
        });
        link = node.next;
    }
    elements.reverse();
    Path(elements)
}
