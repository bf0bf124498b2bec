//! The seam between the store and the GraphQL engine executing documents.

use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use futures::future::BoxFuture;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;

use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;

/// One GraphQL execution as the engine sees it.
///
/// For a live operation the request is captured at subscription time and
/// replayed on every re-execution.
#[derive(Clone)]
pub struct ExecutionRequest {
    /// The schema the document was validated against.
    pub schema: Arc<Valid<Schema>>,

    /// The executable document.
    pub document: Arc<Valid<ExecutableDocument>>,

    /// The name of the operation to execute, when the document has several.
    pub operation_name: Option<String>,

    /// The variable values for this execution.
    pub variables: Object,

    /// The value passed as the root of resolution.
    pub root_value: Value,

    /// The opaque per-request value handed through to resolvers.
    pub context_value: Value,
}

#[buildstructor::buildstructor]
impl ExecutionRequest {
    /// Returns a builder that builds an [`ExecutionRequest`] from its components.
    ///
    /// `schema` and `document` are required; `variables` defaults to the empty
    /// map and `root_value`/`context_value` default to JSON null.
    #[builder(visibility = "pub")]
    fn new(
        schema: Arc<Valid<Schema>>,
        document: Arc<Valid<ExecutableDocument>>,
        operation_name: Option<String>,
        variables: Map<ByteString, Value>,
        root_value: Option<Value>,
        context_value: Option<Value>,
    ) -> Self {
        Self {
            schema,
            document,
            operation_name,
            variables,
            root_value: root_value.unwrap_or(Value::Null),
            context_value: context_value.unwrap_or(Value::Null),
        }
    }
}

/// What the engine handed back for one execution.
pub enum ExecutorResponse {
    /// The single result of a regular operation.
    Response(Response),

    /// An incremental delivery sequence, produced when the document uses
    /// `@defer` or `@stream`.
    Stream(ResponseStream),
}

impl From<Response> for ExecutorResponse {
    fn from(response: Response) -> Self {
        ExecutorResponse::Response(response)
    }
}

/// A GraphQL execution engine.
///
/// The store is generic over how documents are actually resolved: anything
/// that can execute a validated document against a schema and produce a
/// [`Response`] can back a live query store. Execution must be pure in the
/// sense that it leaves the store alone; it is free to read whatever backing
/// state it wants, which is exactly what makes re-execution after an
/// invalidation observe fresh data.
pub trait Executor: Send + Sync + 'static {
    /// Execute the request once and return the engine's result.
    fn execute_once(&self, request: ExecutionRequest) -> BoxFuture<'static, ExecutorResponse>;
}
