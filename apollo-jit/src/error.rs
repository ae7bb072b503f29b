//! Compilation and execution errors.
use std::fmt;
use std::time::Duration;

use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::WithErrors;
use displaydoc::Display;
use serde_json_bytes::Value;
use thiserror::Error;

use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::graphql::Response;
use crate::sanitizer::SanitizeError;

/// A list of GraphQL errors, displayed one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphQLErrors {
    /// The errors, in document order.
    pub errors: Vec<Error>,
}

impl From<DiagnosticList> for GraphQLErrors {
    fn from(errors: DiagnosticList) -> Self {
        Self {
            errors: errors.iter().map(|e| e.to_json().into()).collect(),
        }
    }
}

impl<T> From<WithErrors<T>> for GraphQLErrors {
    fn from(WithErrors { errors, .. }: WithErrors<T>) -> Self {
        errors.into()
    }
}

impl From<Vec<Error>> for GraphQLErrors {
    fn from(errors: Vec<Error>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for GraphQLErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            if let Some(location) = error.locations.first() {
                write!(
                    f,
                    "[{}:{}] {}",
                    location.line, location.column, error.message
                )?;
            } else {
                write!(f, "{}", error.message)?;
            }
        }
        Ok(())
    }
}

/// Error while building a [`Schema`](crate::Schema).
#[derive(Debug, Clone, Error, Display)]
#[non_exhaustive]
pub enum SchemaError {
    /// invalid schema: {0}
    Invalid(GraphQLErrors),

    /// resolver registered for unknown field '{type_name}.{field_name}'
    UnknownField {
        /// The parent type of the resolver.
        type_name: String,
        /// The field the resolver was registered for.
        field_name: String,
    },

    /// type resolver registered for '{0}', which is neither an interface nor a union
    NotAbstract(String),

    /// serializer registered for '{0}', which is not a custom scalar
    NotCustomScalar(String),
}

/// Error raised while compiling an operation. No partial plan is ever produced.
#[derive(Debug, Clone, Error, Display)]
#[non_exhaustive]
pub enum CompilationError {
    /// parsing failed: {0}
    Parse(GraphQLErrors),

    /// validation failed: {0}
    Validation(GraphQLErrors),

    /// {0}
    UnknownOperation(String),

    /// @{directive} requires incremental delivery, which compiled plans do not support
    IncrementalDelivery {
        /// Either `defer` or `stream`.
        directive: String,
    },

    /// {kind} operations cannot be compiled
    UnsupportedOperation {
        /// The operation kind.
        kind: String,
    },

    /// introspection error: {0}
    Introspection(String),

    /// {0}
    Sanitization(#[from] SanitizeError),

    /// selection sets are nested deeper than {limit} levels
    RecursionLimitExceeded {
        /// The maximum supported depth.
        limit: usize,
    },

    /// internal error: {0}
    Internal(String),
}

impl CompilationError {
    /// Whether the operation is valid but uses a feature compiled plans do not cover.
    ///
    /// Callers should execute such operations with a reference interpreter instead.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            CompilationError::IncrementalDelivery { .. }
                | CompilationError::UnsupportedOperation { .. }
        )
    }

    /// Convert to GraphQL errors, one per diagnostic.
    pub fn to_graphql_errors(&self) -> Vec<Error> {
        let code = self.extension_code();
        match self {
            CompilationError::Parse(errors) | CompilationError::Validation(errors) => errors
                .errors
                .iter()
                .cloned()
                .map(|mut error| {
                    error
                        .extensions
                        .entry("code")
                        .or_insert_with(|| Value::from(code.as_str()));
                    error
                })
                .collect(),
            _ => vec![
                Error::builder()
                    .message(self.to_string())
                    .extension_code(code)
                    .build(),
            ],
        }
    }

    /// Convert to a response without data.
    pub fn to_response(&self) -> Response {
        Response::builder()
            .errors(self.to_graphql_errors())
            .build()
    }
}

impl ErrorExtension for CompilationError {
    fn extension_code(&self) -> String {
        match self {
            CompilationError::Parse(_) => "GRAPHQL_PARSE_FAILED",
            CompilationError::Validation(_) => "GRAPHQL_VALIDATION_FAILED",
            CompilationError::UnknownOperation(_) => "GRAPHQL_UNKNOWN_OPERATION_NAME",
            CompilationError::IncrementalDelivery { .. } => "INCREMENTAL_DELIVERY_UNSUPPORTED",
            CompilationError::UnsupportedOperation { .. } => "OPERATION_KIND_UNSUPPORTED",
            CompilationError::Introspection(_) => "INTROSPECTION_ERROR",
            CompilationError::Sanitization(_) => "UNSAFE_IDENTIFIER",
            CompilationError::RecursionLimitExceeded { .. } => "RECURSION_LIMIT_EXCEEDED",
            CompilationError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
        .to_string()
    }
}

/// Request error raised before or instead of producing response data.
#[derive(Debug, Clone, Error, Display)]
#[non_exhaustive]
pub enum ExecutionError {
    /// invalid variables: {0}
    InvalidVariables(GraphQLErrors),

    /// operation '{requested}' was requested but the plan was compiled for '{compiled}'
    OperationNameMismatch {
        /// The operation name carried by the request.
        requested: String,
        /// The operation name the plan was compiled for.
        compiled: String,
    },

    /// execution did not finish within the configured timeout
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// the plan contains async resolvers and cannot be executed synchronously
    AsyncPlan,
}

impl ExecutionError {
    /// Convert to GraphQL errors.
    pub fn to_graphql_errors(&self) -> Vec<Error> {
        let code = self.extension_code();
        match self {
            ExecutionError::InvalidVariables(errors) => errors
                .errors
                .iter()
                .cloned()
                .map(|mut error| {
                    error
                        .extensions
                        .entry("code")
                        .or_insert_with(|| Value::from(code.as_str()));
                    error
                })
                .collect(),
            _ => vec![
                Error::builder()
                    .message(self.to_string())
                    .extension_code(code)
                    .build(),
            ],
        }
    }

    /// Convert to a response whose `data` is `null`.
    pub fn to_response(&self) -> Response {
        Response::builder()
            .data(Value::Null)
            .errors(self.to_graphql_errors())
            .build()
    }
}

impl ErrorExtension for ExecutionError {
    fn extension_code(&self) -> String {
        match self {
            ExecutionError::InvalidVariables(_) => "BAD_USER_INPUT",
            ExecutionError::OperationNameMismatch { .. } => "GRAPHQL_UNKNOWN_OPERATION_NAME",
            ExecutionError::Timeout { .. } => "REQUEST_TIMEOUT",
            ExecutionError::AsyncPlan => "ASYNC_PLAN",
        }
        .to_string()
    }
}

impl From<ExecutionError> for Response {
    fn from(error: ExecutionError) -> Self {
        error.to_response()
    }
}

/// Invalid cache settings.
#[derive(Debug, Clone, Copy, Error, Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheConfigError {
    /// cache capacity must be greater than zero
    ZeroCapacity,

    /// cache ttl must be greater than zero
    ZeroTtl,
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::graphql::Location;

    #[test]
    fn fallback_errors() {
        assert!(
            CompilationError::IncrementalDelivery {
                directive: "defer".to_string()
            }
            .is_fallback()
        );
        assert!(
            !CompilationError::Introspection("Maximum introspection depth exceeded".to_string())
                .is_fallback()
        );
        assert!(!CompilationError::RecursionLimitExceeded { limit: 512 }.is_fallback());
    }

    #[test]
    fn validation_errors_keep_their_locations() {
        let error = CompilationError::Validation(GraphQLErrors::from(vec![
            Error::builder()
                .message("Cannot query field \"nope\" on type \"Query\".")
                .location(Location { line: 1, column: 3 })
                .build(),
        ]));
        assert_eq!(
            error.to_string(),
            "validation failed: [1:3] Cannot query field \"nope\" on type \"Query\"."
        );
        let errors = error.to_graphql_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].extensions.get("code"),
            Some(&json!("GRAPHQL_VALIDATION_FAILED"))
        );
    }

    #[test]
    fn execution_error_response_has_null_data() {
        let response = ExecutionError::Timeout {
            after: Duration::from_secs(1),
        }
        .to_response();
        assert_eq!(response.data, Some(Value::Null));
        assert_eq!(
            response.errors[0].extensions.get("code"),
            Some(&json!("REQUEST_TIMEOUT"))
        );
    }
}
