//! Compiles GraphQL operations into reusable execution plans.
//!
//! A [`Schema`] couples a validated SDL document with the resolvers registered against it.
//! [`compile`] turns one operation of a query document into a [`CompiledPlan`], which can then
//! be executed any number of times against different root values and variables. A
//! [`QueryCache`] memoizes plans so identical queries are only compiled once.
//!
//! ```ignore
//! let schema = Schema::builder(SDL)
//!     .resolver("Query", "hello", |_info| Ok(ResolvedValue::leaf("world")))
//!     .build()?;
//! let plan = apollo_jit::compile(&Arc::new(schema), "{ hello }", None)?;
//! let response = plan.execute(Request::builder().build()).await?;
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod json_ext;

pub mod cache;
mod compiler;
pub mod configuration;
mod context;
pub mod error;
pub mod execution;
pub mod graphql;
mod plan;
pub mod sanitizer;
pub mod schema;

pub use cache::CacheKey;
pub use cache::CacheStats;
pub use cache::QueryCache;
pub use compiler::Compiler;
pub use compiler::compile;
pub use configuration::Configuration;
pub use context::Context;
pub use error::CompilationError;
pub use error::ExecutionError;
pub use execution::CompiledPlan;
pub use execution::Request;
pub use graphql::Response;
pub use plan::OperationKind;
pub use schema::Schema;
pub use schema::resolver::FieldError;
pub use schema::resolver::ObjectValue;
pub use schema::resolver::ResolveInfo;
pub use schema::resolver::ResolvedValue;
pub use schema::resolver::SourceValue;
