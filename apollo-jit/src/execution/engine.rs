//! Executes the node tree of a [`Plan`].
//!
//! Subtrees without async resolvers run on a plain synchronous code path. Selection sets that
//! contain async fields evaluate their sync fields eagerly, then poll every async field together
//! on the caller's task. Nothing is spawned.

use futures::FutureExt;
use futures::future;
use futures::future::BoxFuture;
use futures::future::join_all;
use serde_json_bytes::Value;

use super::completion::Resolved;
use super::completion::complete_value_async;
use super::completion::complete_value_sync;
use crate::context::Context;
use crate::graphql::Error;
use crate::json_ext::LinkedPath;
use crate::json_ext::LinkedPathElement;
use crate::json_ext::Object;
use crate::json_ext::PathElement;
use crate::json_ext::PathSegment;
use crate::json_ext::to_path;
use crate::plan::ExecutionNode;
use crate::plan::OperationKind;
use crate::plan::Plan;
use crate::plan::Resolution;
use crate::plan::Shape;
use crate::schema::resolver::FieldError;
use crate::schema::resolver::FieldResolver;
use crate::schema::resolver::NULL;
use crate::schema::resolver::ResolveInfo;
use crate::schema::resolver::ResolvedValue;
use crate::schema::resolver::SourceValue;

/// Per-request state shared by every field.
#[derive(Clone, Copy)]
pub(crate) struct ExecutionContext<'a> {
    pub(crate) variables: &'a Object,
    pub(crate) context: &'a Context,
    pub(crate) introspection: Option<&'a Introspected>,
}

/// Outcome of executing the `__schema` and `__type` root fields of a request.
pub(crate) enum Introspected {
    Response { data: Object, errors: Vec<Error> },
    Failed(String),
}

/// A field error was recorded: the nearest nullable slot above becomes `null`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PropagateNull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// Allowed to resolve fields in any order, including in parallel
    Normal,
    /// Top-level fields of a mutation operation must be executed in order
    Sequential,
}

impl From<OperationKind> for ExecutionMode {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Query => ExecutionMode::Normal,
            OperationKind::Mutation => ExecutionMode::Sequential,
        }
    }
}

/// Try to insert a propagated null if possible, or keep propagating it.
pub(crate) fn try_nullify(
    shape: &Shape,
    result: Result<Value, PropagateNull>,
) -> Result<Value, PropagateNull> {
    match result {
        Ok(value) => Ok(value),
        Err(PropagateNull) if shape.nullable => Ok(Value::Null),
        Err(PropagateNull) => Err(PropagateNull),
    }
}

pub(crate) fn field_error(node: &ExecutionNode, path: LinkedPath<'_>, error: FieldError) -> Error {
    Error::builder()
        .message(error.message)
        .locations(node.location.into_iter().collect::<Vec<_>>())
        .path(to_path(path))
        .extensions(error.extensions)
        .build()
}

/// Runs a plan without async resolvers.
pub(crate) fn execute_sync(
    ctx: ExecutionContext<'_>,
    plan: &Plan,
    root: SourceValue<'_>,
) -> (Value, Vec<Error>) {
    let mut errors = Vec::new();
    let data = execute_selection_set_sync(
        ctx,
        &mut errors,
        None,
        plan.kind.into(),
        &plan.selection,
        root,
    );
    (data.map(Value::Object).unwrap_or(Value::Null), errors)
}

pub(crate) async fn execute_async(
    ctx: ExecutionContext<'_>,
    plan: &Plan,
    root: SourceValue<'_>,
) -> (Value, Vec<Error>) {
    let mut errors = Vec::new();
    let data = execute_selection_set_async(
        ctx,
        &mut errors,
        None,
        plan.kind.into(),
        &plan.selection,
        root,
    )
    .await;
    (data.map(Value::Object).unwrap_or(Value::Null), errors)
}

/// <https://spec.graphql.org/October2021/#ExecuteSelectionSet()>
///
/// Every field is evaluated even after a sibling failed, so that all errors are reported,
/// except in sequential mode where execution stops at the first propagated null.
pub(crate) fn execute_selection_set_sync<'a>(
    ctx: ExecutionContext<'a>,
    errors: &mut Vec<Error>,
    path: LinkedPath<'_>,
    mode: ExecutionMode,
    nodes: &'a [ExecutionNode],
    parent: SourceValue<'a>,
) -> Result<Object, PropagateNull> {
    let mut object = Object::with_capacity(nodes.len());
    let mut propagate = false;
    for node in nodes {
        if !node.inclusion.is_included(ctx.variables) {
            continue;
        }
        match execute_field_sync(ctx, errors, path, node, parent) {
            Ok(value) => {
                object.insert(node.response_key.clone(), value);
            }
            Err(PropagateNull) => {
                propagate = true;
                if mode == ExecutionMode::Sequential {
                    break;
                }
            }
        }
    }
    if propagate {
        Err(PropagateNull)
    } else {
        Ok(object)
    }
}

pub(crate) fn execute_selection_set_async<'a>(
    ctx: ExecutionContext<'a>,
    errors: &'a mut Vec<Error>,
    path: LinkedPath<'a>,
    mode: ExecutionMode,
    nodes: &'a [ExecutionNode],
    parent: SourceValue<'a>,
) -> BoxFuture<'a, Result<Object, PropagateNull>> {
    async move {
        let mut object = Object::with_capacity(nodes.len());
        let included = nodes
            .iter()
            .filter(|node| node.inclusion.is_included(ctx.variables));

        if mode == ExecutionMode::Sequential {
            for node in included {
                let result = if node.is_async {
                    execute_field_async(ctx, errors, path, node, parent).await
                } else {
                    execute_field_sync(ctx, errors, path, node, parent)
                };
                object.insert(node.response_key.clone(), result?);
            }
            return Ok(object);
        }

        // Sync fields complete while collecting, async ones start together in join_all.
        // Each field records errors in its own buffer so they can be merged in field order.
        let mut fields: Vec<
            BoxFuture<'a, (&'a ExecutionNode, Result<Value, PropagateNull>, Vec<Error>)>,
        > = Vec::new();
        for node in included {
            if node.is_async {
                fields.push(
                    async move {
                        let mut buffer = Vec::new();
                        let result =
                            execute_field_async(ctx, &mut buffer, path, node, parent).await;
                        (node, result, buffer)
                    }
                    .boxed(),
                );
            } else {
                let mut buffer = Vec::new();
                let result = execute_field_sync(ctx, &mut buffer, path, node, parent);
                fields.push(future::ready((node, result, buffer)).boxed());
            }
        }

        let mut propagate = false;
        for (node, result, buffer) in join_all(fields).await {
            errors.extend(buffer);
            match result {
                Ok(value) => {
                    object.insert(node.response_key.clone(), value);
                }
                Err(PropagateNull) => propagate = true,
            }
        }
        if propagate {
            Err(PropagateNull)
        } else {
            Ok(object)
        }
    }
    .boxed()
}

/// <https://spec.graphql.org/October2021/#ExecuteField()>
fn execute_field_sync<'a>(
    ctx: ExecutionContext<'a>,
    errors: &mut Vec<Error>,
    path: LinkedPath<'_>,
    node: &'a ExecutionNode,
    parent: SourceValue<'a>,
) -> Result<Value, PropagateNull> {
    let field_path = LinkedPathElement {
        element: PathSegment::Key(node.response_key.as_str()),
        next: path,
    };
    let path = Some(&field_path);
    if let Resolution::Introspection = node.resolution {
        return introspected(ctx, errors, path, node);
    }
    let resolved = match resolve_sync(ctx, node, parent, path) {
        Ok(resolved) => resolved,
        Err(error) => {
            errors.push(field_error(node, path, error));
            return try_nullify(&node.shape, Err(PropagateNull));
        }
    };
    complete_value_sync(
        ctx,
        errors,
        path,
        node,
        &node.shape,
        resolved.as_completable(),
    )
}

fn execute_field_async<'a>(
    ctx: ExecutionContext<'a>,
    errors: &'a mut Vec<Error>,
    path: LinkedPath<'a>,
    node: &'a ExecutionNode,
    parent: SourceValue<'a>,
) -> BoxFuture<'a, Result<Value, PropagateNull>> {
    async move {
        let field_path = LinkedPathElement {
            element: PathSegment::Key(node.response_key.as_str()),
            next: path,
        };
        let path = Some(&field_path);
        let resolved = match &node.resolution {
            Resolution::Resolver(FieldResolver::Async(resolver)) => {
                let arguments = node.arguments.resolve(ctx.variables);
                tracing::trace!(
                    parent_type = %node.parent_type,
                    field = %node.field_name,
                    "awaiting resolver"
                );
                resolver(resolve_info(ctx, node, parent, &arguments, path))
                    .await
                    .map(Resolved::Owned)
            }
            _ => resolve_sync(ctx, node, parent, path),
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(error) => {
                errors.push(field_error(node, path, error));
                return try_nullify(&node.shape, Err(PropagateNull));
            }
        };
        let value = resolved.as_completable();
        if node.children_async {
            complete_value_async(ctx, errors, path, node, &node.shape, value).await
        } else {
            complete_value_sync(ctx, errors, path, node, &node.shape, value)
        }
    }
    .boxed()
}

/// Obtains the raw value of a field that does not suspend.
fn resolve_sync<'a>(
    ctx: ExecutionContext<'a>,
    node: &'a ExecutionNode,
    parent: SourceValue<'a>,
    path: LinkedPath<'_>,
) -> Result<Resolved<'a>, FieldError> {
    match &node.resolution {
        Resolution::Property => Ok(match parent {
            SourceValue::Json(json) => Resolved::Borrowed(
                json.as_object()
                    .and_then(|object| object.get(node.field_name.as_str()))
                    .unwrap_or(&NULL),
            ),
            SourceValue::Object(object) => Resolved::Owned(
                object
                    .field(node.field_name.as_str())
                    .unwrap_or_else(ResolvedValue::null),
            ),
        }),
        Resolution::Typename => Ok(Resolved::Owned(ResolvedValue::leaf(
            node.parent_type.as_str(),
        ))),
        Resolution::Resolver(FieldResolver::Sync(resolver)) => {
            let arguments = node.arguments.resolve(ctx.variables);
            tracing::trace!(
                parent_type = %node.parent_type,
                field = %node.field_name,
                "calling resolver"
            );
            resolver(&resolve_info(ctx, node, parent, &arguments, path)).map(Resolved::Owned)
        }
        Resolution::Resolver(FieldResolver::Async(_)) => Err(FieldError::new(format!(
            "async resolver for {}.{} called synchronously",
            node.parent_type, node.field_name
        ))),
        Resolution::Introspection => Err(FieldError::new(format!(
            "introspection field {} resolved as a regular field",
            node.field_name
        ))),
    }
}

/// Takes the already completed value of an introspection root field, along with the errors
/// recorded under it.
fn introspected(
    ctx: ExecutionContext<'_>,
    errors: &mut Vec<Error>,
    path: LinkedPath<'_>,
    node: &ExecutionNode,
) -> Result<Value, PropagateNull> {
    let message = match ctx.introspection {
        Some(Introspected::Response {
            data,
            errors: introspection_errors,
        }) => {
            let key = node.response_key.as_str();
            errors.extend(
                introspection_errors
                    .iter()
                    .filter(|error| {
                        matches!(
                            error.path.as_ref().and_then(|path| path.0.first()),
                            Some(PathElement::Key(first)) if first == key
                        )
                    })
                    .cloned(),
            );
            return match data.get(key) {
                Some(value) if !value.is_null() => Ok(value.clone()),
                _ => try_nullify(&node.shape, Err(PropagateNull)),
            };
        }
        Some(Introspected::Failed(message)) => message.clone(),
        None => "introspection was not executed for this request".to_string(),
    };
    errors.push(field_error(node, path, FieldError::new(message)));
    try_nullify(&node.shape, Err(PropagateNull))
}

fn resolve_info<'a>(
    ctx: ExecutionContext<'a>,
    node: &'a ExecutionNode,
    parent: SourceValue<'a>,
    arguments: &'a Object,
    path: LinkedPath<'a>,
) -> ResolveInfo<'a> {
    ResolveInfo {
        parent,
        arguments,
        field_name: node.field_name.as_str(),
        parent_type: node.parent_type.as_str(),
        variables: ctx.variables,
        context: ctx.context,
        path,
    }
}
