use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::ast;

use crate::cache::CacheKey;
use crate::cache::QueryCache;
use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::error::CompilationError;
use crate::error::GraphQLErrors;
use crate::execution::CompiledPlan;
use crate::execution::Request;
use crate::graphql::Response;
use crate::plan::builder::PlanBuilder;
use crate::plan::directives::find_incremental_directive;
use crate::schema::Schema;

/// Compile one operation of `query` against `schema`.
///
/// `operation_name` may only be omitted if the document defines a single operation.
/// Operations using `@defer`, `@stream` or subscriptions are declined with an error for which
/// [`CompilationError::is_fallback`] is true. `__schema` and `__type` root fields are executed
/// by apollo-compiler's introspection support.
pub fn compile(
    schema: &Arc<Schema>,
    query: &str,
    operation_name: Option<&str>,
) -> Result<CompiledPlan, CompilationError> {
    tracing::info_span!(
        "jit_compile",
        "otel.kind" = "INTERNAL",
        graphql.operation.name = operation_name.unwrap_or_default()
    )
    .in_scope(|| {
        let document = ast::Document::parse(query, "query.graphql")
            .map_err(|errors| CompilationError::Parse(GraphQLErrors::from(errors)))?;

        if let Some(directive) = find_incremental_directive(&document) {
            tracing::debug!(directive, "declining operation using incremental delivery");
            return Err(CompilationError::IncrementalDelivery {
                directive: directive.to_string(),
            });
        }

        let document = document
            .to_executable_validate(&schema.definitions)
            .map_err(|errors| CompilationError::Validation(GraphQLErrors::from(errors)))?;
        let operation = document
            .operations
            .get(operation_name)
            .map_err(|error| CompilationError::UnknownOperation(error.message().to_string()))?;

        let plan = PlanBuilder::new(schema, &document)
            .build(operation)
            .inspect_err(|error| {
                if error.is_fallback() {
                    tracing::debug!(%error, "declining operation");
                }
            })?;
        tracing::debug!(
            schema.id = %schema.id(),
            is_async = plan.is_async,
            "compiled operation"
        );
        Ok(CompiledPlan::new(schema.clone(), plan))
    })
}

/// Couples a schema with an optional plan cache.
///
/// ```ignore
/// let compiler = Compiler::from_configuration(schema, &Configuration::from_yaml(yaml)?)?;
/// let plan = compiler.compile("{ hello }", None)?;
/// ```
#[derive(Debug)]
pub struct Compiler {
    schema: Arc<Schema>,
    cache: Option<QueryCache>,
    timeout: Option<Duration>,
}

impl Compiler {
    /// A compiler without cache: every call compiles.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            cache: None,
            timeout: None,
        }
    }

    /// A compiler memoizing plans in `cache`.
    pub fn with_cache(schema: Arc<Schema>, cache: QueryCache) -> Self {
        Self {
            schema,
            cache: Some(cache),
            timeout: None,
        }
    }

    /// A compiler set up from configuration.
    pub fn from_configuration(
        schema: Arc<Schema>,
        configuration: &Configuration,
    ) -> Result<Self, ConfigurationError> {
        configuration.validate()?;
        let in_memory = &configuration.cache.in_memory;
        let cache = if in_memory.enabled {
            Some(QueryCache::from_configuration(in_memory).map_err(ConfigurationError::Cache)?)
        } else {
            None
        };
        Ok(Self {
            schema,
            cache,
            timeout: configuration.execution.timeout,
        })
    }

    /// The schema operations are compiled against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The plan cache, if any.
    pub fn cache(&self) -> Option<&QueryCache> {
        self.cache.as_ref()
    }

    /// Compile `query`, or reuse the cached plan. Failures are never cached.
    pub fn compile(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<Arc<CompiledPlan>, CompilationError> {
        let Some(cache) = &self.cache else {
            return compile(&self.schema, query, operation_name).map(Arc::new);
        };
        let key = CacheKey::new(&self.schema, query, operation_name);
        if let Some(plan) = cache.get(&key) {
            tracing::debug!(%key, "plan cache hit");
            return Ok(plan);
        }
        tracing::debug!(%key, "plan cache miss");
        let plan = Arc::new(compile(&self.schema, query, operation_name)?);
        cache.insert(key, plan.clone());
        Ok(plan)
    }

    /// Compile and execute.
    ///
    /// Request errors are turned into a response with `null` data. Compilation errors are
    /// returned so that fallback cases can be told apart; use
    /// [`CompilationError::to_response`] otherwise.
    pub async fn execute(
        &self,
        query: &str,
        mut request: Request,
    ) -> Result<Response, CompilationError> {
        let plan = self.compile(query, request.operation_name.as_deref())?;
        if request.timeout.is_none() {
            request.timeout = self.timeout;
        }
        Ok(plan
            .execute(request)
            .await
            .unwrap_or_else(|error| error.to_response()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::ResolvedValue;

    const SDL: &str = r#"
        type Query {
            hello(name: String = "world"): String!
        }
    "#;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder(SDL)
                .resolver("Query", "hello", |info| {
                    let name = info
                        .argument("name")
                        .and_then(|name| name.as_str())
                        .unwrap_or_default();
                    Ok(ResolvedValue::leaf(format!("hello {name}")))
                })
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn compiles_and_executes() {
        let plan = compile(&schema(), "{ hello }", None).unwrap();
        assert!(!plan.is_async());
        let response = plan.execute_sync(Request::builder().build()).unwrap();
        assert_eq!(response.data, Some(json!({"hello": "hello world"})));
    }

    #[test]
    fn parse_errors_are_reported() {
        let error = compile(&schema(), "{ hello", None).unwrap_err();
        assert!(matches!(error, CompilationError::Parse(_)));
        assert!(!error.is_fallback());
    }

    #[test]
    fn validation_errors_are_reported() {
        let error = compile(&schema(), "{ goodbye }", None).unwrap_err();
        assert!(matches!(error, CompilationError::Validation(_)));
    }

    #[test]
    fn operation_must_be_selected() {
        let query = "query A { hello } query B { hello }";
        let error = compile(&schema(), query, None).unwrap_err();
        assert!(matches!(error, CompilationError::UnknownOperation(_)));
        assert_eq!(
            error.to_string(),
            "Ambiguous request: multiple operations but no specified `operationName`"
        );
        let error = compile(&schema(), query, Some("C")).unwrap_err();
        assert_eq!(error.to_string(), "No operation named 'C'");
        let plan = compile(&schema(), query, Some("B")).unwrap();
        assert_eq!(plan.operation_name(), Some("B"));
    }

    #[test]
    fn introspection_depth_is_limited() {
        let query = "{ __schema { types { fields { type { fields { type { fields { name } } } } } } } }";
        let error = compile(&schema(), query, None).unwrap_err();
        assert!(matches!(error, CompilationError::Introspection(_)));
        assert_eq!(
            error.to_string(),
            "introspection error: Maximum introspection depth exceeded"
        );
        assert!(!error.is_fallback());
    }

    #[test]
    fn failures_are_not_cached() {
        let compiler = Compiler::with_cache(schema(), QueryCache::new(8, None).unwrap());
        assert!(compiler.compile("{ goodbye }", None).is_err());
        assert!(compiler.compile("{ goodbye }", None).is_err());
        let cache = compiler.cache().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn disabled_cache() {
        let configuration =
            Configuration::from_yaml("cache:\n  in_memory:\n    enabled: false\n").unwrap();
        let compiler = Compiler::from_configuration(schema(), &configuration).unwrap();
        assert!(compiler.cache().is_none());
    }

    #[tokio::test]
    async fn execute_turns_request_errors_into_responses() {
        let compiler = Compiler::new(schema());
        let response = compiler
            .execute(
                "query Greet { hello }",
                Request::builder().operation_name("Other").build(),
            )
            .await
            .unwrap_err();
        assert!(matches!(response, CompilationError::UnknownOperation(_)));

        let response = compiler
            .execute(
                "query Greet($name: String!) { hello(name: $name) }",
                Request::builder().build(),
            )
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!(null)));
        assert_eq!(
            response.errors[0].message,
            "Variable \"$name\" of required type \"String!\" was not provided."
        );
    }
}
