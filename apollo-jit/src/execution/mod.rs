//! Compiled plans and their execution.

mod completion;
mod engine;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::introspection;
use apollo_compiler::validation::Valid;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use self::engine::ExecutionContext;
use self::engine::Introspected;
use crate::context::Context;
use crate::error::ExecutionError;
use crate::graphql::Error;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::plan::OperationKind;
use crate::plan::Plan;
use crate::plan::variables::coerce_variables;
use crate::schema::Schema;
use crate::schema::resolver::ResolvedValue;
use crate::schema::resolver::SourceValue;

/// An operation compiled against one schema instance.
///
/// Holds no per-call state: one plan can be shared through an [`Arc`] and executed
/// concurrently by any number of callers.
pub struct CompiledPlan {
    schema: Arc<Schema>,
    plan: Plan,
    source: String,
}

impl CompiledPlan {
    pub(crate) fn new(schema: Arc<Schema>, plan: Plan) -> Self {
        let source = plan.to_string();
        Self {
            schema,
            plan,
            source,
        }
    }

    /// Whether some field of the operation has an async resolver.
    ///
    /// Such plans can only be run with [`CompiledPlan::execute`].
    pub fn is_async(&self) -> bool {
        self.plan.is_async
    }

    /// Whether this is a query or a mutation.
    pub fn operation_kind(&self) -> OperationKind {
        self.plan.kind
    }

    /// The name of the compiled operation, if it has one.
    pub fn operation_name(&self) -> Option<&str> {
        self.plan.operation_name.as_deref()
    }

    /// Human readable listing of the specialized program, for inspection and debugging.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The schema this plan was compiled against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Execute the plan.
    ///
    /// Field errors end up in the response next to partial data. Only request errors
    /// (invalid variables, operation name mismatch, timeout) are returned as `Err`.
    ///
    /// Without a [`Request::timeout`] the returned future can be driven by any executor.
    #[tracing::instrument(skip_all, level = "trace", fields(operation.name = self.operation_name()))]
    pub async fn execute(&self, request: Request) -> Result<Response, ExecutionError> {
        let variables = self.prepare(&request)?;
        let introspection = self.introspect(&variables);
        let ctx = ExecutionContext {
            variables: &variables,
            context: &request.context,
            introspection: introspection.as_ref(),
        };
        let root = SourceValue::from_resolved(&request.root_value);
        let run = async {
            if self.plan.is_async {
                engine::execute_async(ctx, &self.plan, root).await
            } else {
                engine::execute_sync(ctx, &self.plan, root)
            }
        };
        let (data, errors) = match request.timeout {
            Some(after) => tokio::time::timeout(after, run)
                .await
                .map_err(|_| ExecutionError::Timeout { after })?,
            None => run.await,
        };
        Ok(self.respond(data, errors))
    }

    /// Execute a plan without async resolvers, on the current thread.
    ///
    /// The request timeout is ignored: nothing can suspend.
    pub fn execute_sync(&self, request: Request) -> Result<Response, ExecutionError> {
        if self.plan.is_async {
            return Err(ExecutionError::AsyncPlan);
        }
        let variables = self.prepare(&request)?;
        let introspection = self.introspect(&variables);
        let ctx = ExecutionContext {
            variables: &variables,
            context: &request.context,
            introspection: introspection.as_ref(),
        };
        let root = SourceValue::from_resolved(&request.root_value);
        let (data, errors) = engine::execute_sync(ctx, &self.plan, root);
        Ok(self.respond(data, errors))
    }

    /// Runs the `__schema` and `__type` root fields through apollo-compiler.
    fn introspect(&self, variables: &Object) -> Option<Introspected> {
        let introspection = self.plan.introspection.as_ref()?;
        let result = introspection::partial_execute(
            self.schema.definitions(),
            self.schema.implementers(),
            &introspection.document,
            &introspection.operation,
            // Coerced against the operation's variable definitions in `prepare`
            Valid::assume_valid_ref(variables),
        );
        Some(match result {
            Ok(response) => Introspected::Response {
                data: response.data.unwrap_or_default(),
                errors: response.errors.into_iter().map(Error::from).collect(),
            },
            Err(error) => {
                tracing::debug!(error = %error.message(), "introspection failed");
                Introspected::Failed(error.message().to_string())
            }
        })
    }

    /// Check the requested operation and coerce variables.
    fn prepare(&self, request: &Request) -> Result<Object, ExecutionError> {
        if let Some(requested) = &request.operation_name
            && self.plan.operation_name.as_ref() != Some(requested)
        {
            return Err(ExecutionError::OperationNameMismatch {
                requested: requested.clone(),
                compiled: self
                    .plan
                    .operation_name
                    .clone()
                    .unwrap_or_else(|| "<anonymous>".to_string()),
            });
        }
        coerce_variables(
            &self.plan.variables,
            &self.plan.input_types,
            &request.variables,
        )
        .map_err(|errors| ExecutionError::InvalidVariables(errors.into()))
    }

    fn respond(&self, data: Value, errors: Vec<Error>) -> Response {
        if !errors.is_empty() {
            tracing::debug!(
                operation.name = self.operation_name(),
                errors = errors.len(),
                data_is_null = data.is_null(),
                "execution finished with field errors"
            );
        }
        Response::builder().data(data).errors(errors).build()
    }
}

impl fmt::Debug for CompiledPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPlan")
            .field("schema", self.schema.id())
            .field("kind", &self.plan.kind)
            .field("operation_name", &self.plan.operation_name)
            .field("is_async", &self.plan.is_async)
            .finish_non_exhaustive()
    }
}

/// One invocation of a [`CompiledPlan`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Request {
    /// The value root fields are resolved on.
    pub root_value: ResolvedValue,

    /// Raw variable values, coerced against the operation's declarations on execution.
    pub variables: Object,

    /// When set, must match the name of the compiled operation.
    pub operation_name: Option<String>,

    /// Shared with every resolver.
    pub context: Context,

    /// Execution is abandoned past this duration.
    ///
    /// Enforced with [`tokio::time::timeout`]: when set, [`CompiledPlan::execute`] must be
    /// polled inside a Tokio runtime with the time driver enabled, or it panics. Ignored by
    /// [`CompiledPlan::execute_sync`].
    pub timeout: Option<Duration>,
}

#[buildstructor::buildstructor]
impl Request {
    /// Returns a builder for a [`Request`].
    ///
    /// The root value defaults to an empty JSON object. Setting a `timeout` ties
    /// [`CompiledPlan::execute`] to a Tokio runtime with timers enabled.
    #[builder(visibility = "pub")]
    fn new(
        root_value: Option<ResolvedValue>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        operation_name: Option<String>,
        context: Option<Context>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            root_value: root_value
                .unwrap_or_else(|| ResolvedValue::Leaf(Value::Object(Object::new()))),
            variables,
            operation_name,
            context: context.unwrap_or_default(),
            timeout,
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Request::builder().build()
    }
}
