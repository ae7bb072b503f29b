//! <https://spec.graphql.org/October2021/#CompleteValue()>
//!
//! Completion returns `Err(PropagateNull)` for a field error being propagated upwards to find a
//! nullable place. The error itself has already been recorded where it happened.

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use serde_json_bytes::Value;

use super::engine::ExecutionContext;
use super::engine::ExecutionMode;
use super::engine::PropagateNull;
use super::engine::execute_selection_set_async;
use super::engine::execute_selection_set_sync;
use super::engine::field_error;
use super::engine::try_nullify;
use crate::graphql::Error;
use crate::json_ext::LinkedPath;
use crate::json_ext::LinkedPathElement;
use crate::json_ext::PathSegment;
use crate::plan::Children;
use crate::plan::ExecutionNode;
use crate::plan::LeafKind;
use crate::plan::Shape;
use crate::plan::ShapeKind;
use crate::schema::resolver::FieldError;
use crate::schema::resolver::NULL;
use crate::schema::resolver::ObjectValue;
use crate::schema::resolver::ResolvedValue;
use crate::schema::resolver::SourceValue;
use crate::schema::resolver::default_type_name;

/// A raw field value, before completion.
pub(crate) enum Resolved<'a> {
    /// Read out of a JSON parent without copying.
    Borrowed(&'a Value),
    Owned(ResolvedValue),
}

impl Resolved<'_> {
    pub(crate) fn as_completable(&self) -> Completable<'_> {
        match self {
            Resolved::Borrowed(value) => Completable::Json(value),
            Resolved::Owned(value) => Completable::from_resolved(value),
        }
    }
}

/// Borrowed view of a value being completed.
#[derive(Clone, Copy)]
pub(crate) enum Completable<'a> {
    Json(&'a Value),
    Object(&'a dyn ObjectValue),
    List(&'a [ResolvedValue]),
}

impl<'a> Completable<'a> {
    fn from_resolved(value: &'a ResolvedValue) -> Self {
        match value {
            ResolvedValue::Leaf(json) => Completable::Json(json),
            ResolvedValue::Object(object) => Completable::Object(&**object),
            ResolvedValue::List(items) => Completable::List(items),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Completable::Json(Value::Null))
    }

    fn describe(&self) -> String {
        match self {
            Completable::Json(json) => json.to_string(),
            Completable::Object(_) => "an object".to_string(),
            Completable::List(_) => "a list".to_string(),
        }
    }
}

#[derive(Clone, Copy)]
enum ListItems<'a> {
    Json(&'a [Value]),
    Resolved(&'a [ResolvedValue]),
}

impl<'a> ListItems<'a> {
    fn new(value: Completable<'a>) -> Option<Self> {
        match value {
            Completable::Json(Value::Array(items)) => Some(ListItems::Json(items)),
            Completable::List(items) => Some(ListItems::Resolved(items)),
            _ => None,
        }
    }

    fn len(&self) -> usize {
        match self {
            ListItems::Json(items) => items.len(),
            ListItems::Resolved(items) => items.len(),
        }
    }

    fn get(&self, index: usize) -> Completable<'a> {
        match *self {
            ListItems::Json(items) => Completable::Json(items.get(index).unwrap_or(&NULL)),
            ListItems::Resolved(items) => items
                .get(index)
                .map(Completable::from_resolved)
                .unwrap_or(Completable::Json(&NULL)),
        }
    }
}

fn complete_null(
    errors: &mut Vec<Error>,
    path: LinkedPath<'_>,
    node: &ExecutionNode,
    shape: &Shape,
) -> Result<Value, PropagateNull> {
    if shape.nullable {
        return Ok(Value::Null);
    }
    errors.push(field_error(
        node,
        path,
        FieldError::new(format!(
            "Cannot return null for non-nullable field {}.{}.",
            node.parent_type, node.field_name
        )),
    ));
    Err(PropagateNull)
}

/// Completes a value without suspending. Used for every subtree without async resolvers.
pub(crate) fn complete_value_sync<'a>(
    ctx: ExecutionContext<'a>,
    errors: &mut Vec<Error>,
    path: LinkedPath<'_>,
    node: &'a ExecutionNode,
    shape: &'a Shape,
    value: Completable<'a>,
) -> Result<Value, PropagateNull> {
    macro_rules! field_error {
        ($($arg: tt)+) => {
            {
                errors.push(field_error(node, path, FieldError::new(format!($($arg)+))));
                Err(PropagateNull)
            }
        };
    }
    if value.is_null() {
        return complete_null(errors, path, node, shape);
    }
    let result = match &shape.kind {
        ShapeKind::Leaf(leaf) => match coerce_leaf(leaf, value) {
            Ok(value) => Ok(value),
            Err(error) => {
                errors.push(field_error(node, path, error));
                Err(PropagateNull)
            }
        },
        ShapeKind::List(item_shape) => match ListItems::new(value) {
            Some(items) => {
                let mut completed = Vec::with_capacity(items.len());
                let mut propagate = false;
                for index in 0..items.len() {
                    let item_path = LinkedPathElement {
                        element: PathSegment::Index(index),
                        next: path,
                    };
                    match complete_value_sync(
                        ctx,
                        errors,
                        Some(&item_path),
                        node,
                        item_shape,
                        items.get(index),
                    ) {
                        Ok(item) => completed.push(item),
                        // A non-null item failed, keep completing its siblings
                        Err(PropagateNull) => propagate = true,
                    }
                }
                if propagate {
                    Err(PropagateNull)
                } else {
                    Ok(Value::Array(completed))
                }
            }
            None => field_error!(
                "Resolver returned {}, expected list type {shape}",
                value.describe()
            ),
        },
        ShapeKind::Composite(type_name) => {
            match select_object(errors, path, node, type_name, value) {
                Ok((nodes, source)) => execute_selection_set_sync(
                    ctx,
                    errors,
                    path,
                    ExecutionMode::Normal,
                    nodes,
                    source,
                )
                .map(Value::Object),
                Err(propagate) => Err(propagate),
            }
        }
    };
    try_nullify(shape, result)
}

/// Completes a value whose subtree contains async resolvers.
///
/// List items and sibling fields are completed concurrently; their errors are merged back in
/// list and field order.
pub(crate) fn complete_value_async<'a>(
    ctx: ExecutionContext<'a>,
    errors: &'a mut Vec<Error>,
    path: LinkedPath<'a>,
    node: &'a ExecutionNode,
    shape: &'a Shape,
    value: Completable<'a>,
) -> BoxFuture<'a, Result<Value, PropagateNull>> {
    async move {
        if value.is_null() {
            return complete_null(errors, path, node, shape);
        }
        let result = match &shape.kind {
            ShapeKind::Leaf(_) => return complete_value_sync(ctx, errors, path, node, shape, value),
            ShapeKind::List(item_shape) => match ListItems::new(value) {
                Some(items) => {
                    let completions = (0..items.len()).map(|index| {
                        let item = items.get(index);
                        async move {
                            let mut buffer = Vec::new();
                            let item_path = LinkedPathElement {
                                element: PathSegment::Index(index),
                                next: path,
                            };
                            let result = complete_value_async(
                                ctx,
                                &mut buffer,
                                Some(&item_path),
                                node,
                                item_shape,
                                item,
                            )
                            .await;
                            (result, buffer)
                        }
                    });
                    let mut completed = Vec::with_capacity(items.len());
                    let mut propagate = false;
                    for (result, buffer) in join_all(completions).await {
                        errors.extend(buffer);
                        match result {
                            Ok(item) => completed.push(item),
                            Err(PropagateNull) => propagate = true,
                        }
                    }
                    if propagate {
                        Err(PropagateNull)
                    } else {
                        Ok(Value::Array(completed))
                    }
                }
                None => {
                    errors.push(field_error(
                        node,
                        path,
                        FieldError::new(format!(
                            "Resolver returned {}, expected list type {shape}",
                            value.describe()
                        )),
                    ));
                    Err(PropagateNull)
                }
            },
            ShapeKind::Composite(type_name) => {
                match select_object(errors, path, node, type_name, value) {
                    Ok((nodes, source)) => execute_selection_set_async(
                        ctx,
                        errors,
                        path,
                        ExecutionMode::Normal,
                        nodes,
                        source,
                    )
                    .await
                    .map(Value::Object),
                    Err(propagate) => Err(propagate),
                }
            }
        };
        try_nullify(shape, result)
    }
    .boxed()
}

/// Picks the child selection for a composite value, resolving the concrete type of
/// interfaces and unions.
fn select_object<'a>(
    errors: &mut Vec<Error>,
    path: LinkedPath<'_>,
    node: &'a ExecutionNode,
    type_name: &str,
    value: Completable<'a>,
) -> Result<(&'a [ExecutionNode], SourceValue<'a>), PropagateNull> {
    macro_rules! field_error {
        ($($arg: tt)+) => {
            {
                errors.push(field_error(node, path, FieldError::new(format!($($arg)+))));
                return Err(PropagateNull);
            }
        };
    }
    let source = match value {
        Completable::Json(json) if json.is_object() => SourceValue::Json(json),
        Completable::Object(object) => SourceValue::Object(object),
        Completable::Json(_) | Completable::List(_) => {
            field_error!(
                "Resolver returned {}, expected an object for type {type_name}",
                value.describe()
            )
        }
    };
    match &node.children {
        Children::Object(nodes) => Ok((nodes, source)),
        Children::Abstract(table) => {
            let object_type = match &table.type_resolver {
                Some(type_resolver) => type_resolver(source),
                None => default_type_name(source).map(str::to_owned),
            };
            let Some(object_type) = object_type else {
                field_error!(
                    "Could not determine the object type of {} for field {}.{}",
                    table.abstract_type,
                    node.parent_type,
                    node.field_name
                )
            };
            match table.by_type.get(object_type.as_str()) {
                Some(nodes) => Ok((nodes, source)),
                None => field_error!(
                    "Runtime object type \"{object_type}\" is not a possible type for \"{}\"",
                    table.abstract_type
                ),
            }
        }
        Children::None => Ok((&[], source)),
    }
}

/// <https://spec.graphql.org/October2021/#sec-Scalars.Result-Coercion-and-Serialization>
///
/// Built-in scalars are not coerced from other internal types, to keep with Rust's strong
/// typing.
fn coerce_leaf(leaf: &LeafKind, value: Completable<'_>) -> Result<Value, FieldError> {
    let Completable::Json(json) = value else {
        return Err(FieldError::new(format!(
            "Resolver returned {}, expected {}",
            value.describe(),
            leaf.type_name()
        )));
    };
    let expected = |ty: &str| {
        Err(FieldError::new(format!(
            "Resolver returned {json}, expected {ty}"
        )))
    };
    match leaf {
        LeafKind::Int => {
            // Integral floats such as `7.0` are Ints
            let int = json.as_i64().or_else(|| {
                json.as_f64()
                    .filter(|float| float.fract() == 0.0)
                    .map(|float| float as i64)
            });
            match int {
                Some(int) if i32::try_from(int).is_ok() => Ok(Value::from(int)),
                Some(_) => Err(FieldError::new(format!(
                    "Resolver returned {json} which overflows Int"
                ))),
                None => expected("Int"),
            }
        }
        LeafKind::Float => match json {
            Value::Number(_) => Ok(json.clone()),
            _ => expected("Float"),
        },
        LeafKind::String => match json {
            Value::String(_) => Ok(json.clone()),
            _ => expected("String"),
        },
        LeafKind::Boolean => match json {
            Value::Bool(_) => Ok(json.clone()),
            _ => expected("Boolean"),
        },
        LeafKind::Id => match json {
            Value::String(_) => Ok(json.clone()),
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Ok(Value::String(number.to_string().into()))
            }
            _ => expected("ID"),
        },
        LeafKind::Enum { name, values } => {
            if json
                .as_str()
                .is_some_and(|member| values.contains(member))
            {
                Ok(json.clone())
            } else {
                expected(&format!("enum {name}"))
            }
        }
        LeafKind::Custom {
            serializer: Some(serializer),
            ..
        } => serializer(json),
        // Custom scalar: accept any JSON value
        LeafKind::Custom {
            serializer: None, ..
        } => Ok(json.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::Name;
    use serde_json_bytes::json;

    use super::*;
    use crate::schema::resolver::ScalarSerializerFn;

    fn coerce(leaf: &LeafKind, value: Value) -> Result<Value, String> {
        coerce_leaf(leaf, Completable::Json(&value)).map_err(|error| error.message)
    }

    #[test]
    fn built_in_scalars_are_not_converted() {
        assert_eq!(coerce(&LeafKind::Int, json!(7)), Ok(json!(7)));
        assert_eq!(
            coerce(&LeafKind::Int, json!(3_000_000_000_i64)),
            Err("Resolver returned 3000000000 which overflows Int".to_string())
        );
        assert_eq!(
            coerce(&LeafKind::Int, json!("7")),
            Err("Resolver returned \"7\", expected Int".to_string())
        );
        assert_eq!(coerce(&LeafKind::Float, json!(7)), Ok(json!(7)));
        assert_eq!(
            coerce(&LeafKind::String, json!(true)),
            Err("Resolver returned true, expected String".to_string())
        );
        assert_eq!(coerce(&LeafKind::Id, json!(42)), Ok(json!("42")));
        assert_eq!(
            coerce(&LeafKind::Boolean, json!(1)),
            Err("Resolver returned 1, expected Boolean".to_string())
        );
    }

    #[test]
    fn integral_floats_are_ints() {
        assert_eq!(coerce(&LeafKind::Int, json!(7.0)), Ok(json!(7)));
        assert_eq!(coerce(&LeafKind::Int, json!(-2.0)), Ok(json!(-2)));
        assert_eq!(
            coerce(&LeafKind::Int, json!(7.5)),
            Err("Resolver returned 7.5, expected Int".to_string())
        );
        let overflow = coerce(&LeafKind::Int, json!(3e9)).unwrap_err();
        assert!(overflow.ends_with("which overflows Int"), "{overflow}");
    }

    #[test]
    fn enum_values_must_be_members() {
        let leaf = LeafKind::Enum {
            name: Name::new("Episode").unwrap(),
            values: ["NEWHOPE", "EMPIRE"]
                .into_iter()
                .map(|value| Name::new(value).unwrap())
                .collect(),
        };
        assert_eq!(coerce(&leaf, json!("EMPIRE")), Ok(json!("EMPIRE")));
        assert_eq!(
            coerce(&leaf, json!("JEDI")),
            Err("Resolver returned \"JEDI\", expected enum Episode".to_string())
        );
    }

    #[test]
    fn custom_scalars_use_their_serializer() {
        let serializer: Arc<ScalarSerializerFn> = Arc::new(|value: &Value| match value.as_i64() {
            Some(seconds) => Ok(json!(format!("{seconds}s"))),
            None => Err(FieldError::new("not a duration").with_extension("code", "BAD_DURATION")),
        });
        let leaf = LeafKind::Custom {
            name: Name::new("Duration").unwrap(),
            serializer: Some(serializer),
        };
        assert_eq!(
            coerce_leaf(&leaf, Completable::Json(&json!(90))),
            Ok(json!("90s"))
        );
        let error = coerce_leaf(&leaf, Completable::Json(&json!("soon"))).unwrap_err();
        assert_eq!(error.extensions.get("code"), Some(&json!("BAD_DURATION")));

        let passthrough = LeafKind::Custom {
            name: Name::new("JSON").unwrap(),
            serializer: None,
        };
        assert_eq!(
            coerce(&passthrough, json!({"any": [1, 2]})),
            Ok(json!({"any": [1, 2]}))
        );
    }
}
