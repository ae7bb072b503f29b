//! Execution plans: the tree of merged field selections an operation compiles to.

pub(crate) mod arguments;
pub(crate) mod builder;
pub(crate) mod directives;
pub(crate) mod source;
pub(crate) mod variables;

use std::fmt;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::executable::Operation;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;
use serde_json_bytes::ByteString;

use self::arguments::Arguments;
use self::variables::InputTypes;
use self::variables::VariableBinding;
use crate::graphql::Location;
use crate::json_ext::Object;
use crate::schema::resolver::FieldResolver;
use crate::schema::resolver::ScalarSerializerFn;
use crate::schema::resolver::TypeResolverFn;

/// Maximum nesting of selection sets (fields and fragments) in a compiled operation.
pub(crate) const RECURSION_LIMIT: usize = 512;

/// The kind of a compiled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A query: root fields may run concurrently.
    Query,
    /// A mutation: root fields run one after another.
    Mutation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => f.write_str("query"),
            OperationKind::Mutation => f.write_str("mutation"),
        }
    }
}

/// A compiled operation.
pub(crate) struct Plan {
    pub(crate) kind: OperationKind,
    pub(crate) operation_name: Option<String>,
    pub(crate) root_type: Name,
    pub(crate) selection: Vec<ExecutionNode>,
    pub(crate) variables: Vec<VariableBinding>,
    pub(crate) input_types: InputTypes,
    pub(crate) introspection: Option<Introspection>,
    pub(crate) is_async: bool,
}

/// What schema introspection needs at execution time: the operation is run again through
/// apollo-compiler, which only evaluates the `__schema` and `__type` root fields.
pub(crate) struct Introspection {
    pub(crate) document: Valid<ExecutableDocument>,
    pub(crate) operation: Node<Operation>,
}

/// One merged field selection.
pub(crate) struct ExecutionNode {
    pub(crate) response_key: ByteString,
    pub(crate) field_name: Name,
    pub(crate) parent_type: Name,
    pub(crate) shape: Shape,
    pub(crate) resolution: Resolution,
    pub(crate) children: Children,
    pub(crate) inclusion: Inclusion,
    pub(crate) arguments: Arguments,
    pub(crate) location: Option<Location>,
    /// This field or one below it has an async resolver.
    pub(crate) is_async: bool,
    /// Some field below this one has an async resolver.
    pub(crate) children_async: bool,
}

/// Static shape of a field type: nullability at every level, list nesting and leaf kind.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Shape {
    pub(crate) nullable: bool,
    pub(crate) kind: ShapeKind,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ShapeKind {
    List(Box<Shape>),
    Leaf(LeafKind),
    /// An object, interface or union type.
    Composite(Name),
}

#[derive(Clone)]
pub(crate) enum LeafKind {
    Int,
    Float,
    String,
    Boolean,
    Id,
    Enum {
        name: Name,
        values: IndexSet<Name>,
    },
    Custom {
        name: Name,
        serializer: Option<Arc<ScalarSerializerFn>>,
    },
}

impl LeafKind {
    pub(crate) fn type_name(&self) -> &str {
        match self {
            LeafKind::Int => "Int",
            LeafKind::Float => "Float",
            LeafKind::String => "String",
            LeafKind::Boolean => "Boolean",
            LeafKind::Id => "ID",
            LeafKind::Enum { name, .. } | LeafKind::Custom { name, .. } => name.as_str(),
        }
    }
}

impl PartialEq for LeafKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_name() == other.type_name()
    }
}

impl fmt::Debug for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ShapeKind::List(inner) => write!(f, "[{inner}]")?,
            ShapeKind::Leaf(leaf) => f.write_str(leaf.type_name())?,
            ShapeKind::Composite(name) => f.write_str(name)?,
        }
        if !self.nullable {
            f.write_str("!")?;
        }
        Ok(())
    }
}

/// How the raw value of a field is obtained.
pub(crate) enum Resolution {
    /// Read the field name off the parent value.
    Property,
    /// The concrete parent type name.
    Typename,
    /// `__schema` or `__type`, answered from the introspection response of the request.
    Introspection,
    Resolver(FieldResolver),
}

pub(crate) enum Children {
    None,
    Object(Vec<ExecutionNode>),
    Abstract(AbstractDispatchTable),
}

impl Children {
    pub(crate) fn nodes(&self) -> Box<dyn Iterator<Item = &ExecutionNode> + '_> {
        match self {
            Children::None => Box::new(std::iter::empty()),
            Children::Object(nodes) => Box::new(nodes.iter()),
            Children::Abstract(table) => Box::new(table.by_type.values().flatten()),
        }
    }
}

/// Merged child selections of an interface or union field, per possible object type.
pub(crate) struct AbstractDispatchTable {
    pub(crate) abstract_type: Name,
    pub(crate) type_resolver: Option<Arc<TypeResolverFn>>,
    pub(crate) by_type: IndexMap<Name, Vec<ExecutionNode>>,
}

/// Whether a field is part of the response, given the request variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Inclusion {
    Always,
    /// Included if any of the condition sets fully holds.
    Conditional(Vec<ConditionSet>),
}

/// Conditions that must all hold.
pub(crate) type ConditionSet = Vec<Condition>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Condition {
    /// `@skip(if: $var)`: holds unless the variable is `true`.
    Skip(Name),
    /// `@include(if: $var)`: holds unless the variable is `false`.
    Include(Name),
}

impl Condition {
    fn holds(&self, variables: &Object) -> bool {
        match self {
            Condition::Skip(name) => !variables
                .get(name.as_str())
                .and_then(|value| value.as_bool())
                .unwrap_or(false),
            Condition::Include(name) => variables
                .get(name.as_str())
                .and_then(|value| value.as_bool())
                .unwrap_or(true),
        }
    }
}

impl Inclusion {
    pub(crate) fn is_included(&self, variables: &Object) -> bool {
        match self {
            Inclusion::Always => true,
            Inclusion::Conditional(sets) => sets
                .iter()
                .any(|set| set.iter().all(|condition| condition.holds(variables))),
        }
    }
}
