//! A minimal GraphQL engine backing the store in tests.
//!
//! Documents are resolved against a mutable JSON "universe": each selected
//! field reads the value stored under its name, descending through objects
//! and lists. Mutating the universe between invalidations is how tests
//! simulate external state changes.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use futures::future::BoxFuture;
use graphql_live_query::execution::ExecutionRequest;
use graphql_live_query::execution::Executor;
use graphql_live_query::execution::ExecutorResponse;
use graphql_live_query::graphql;
use graphql_live_query::graphql::Response;
use graphql_live_query::live::LIVE_DIRECTIVE_SDL;
use parking_lot::Mutex;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;
use tokio::sync::Semaphore;

const SCHEMA_BODY: &str = r#"
    type Query {
        foo: String
        post(id: ID): Post
        ping(id: ID!): String
    }

    type Post {
        id: ID!
        title: String!
        whateverIWant: ID!
    }
"#;

pub fn test_schema() -> Arc<Valid<Schema>> {
    let sdl = format!("{LIVE_DIRECTIVE_SDL}\n{SCHEMA_BODY}");
    Arc::new(Schema::parse_and_validate(&sdl, "schema.graphql").expect("test schema is valid"))
}

pub fn parse_document(schema: &Valid<Schema>, source: &str) -> Arc<Valid<ExecutableDocument>> {
    Arc::new(
        ExecutableDocument::parse_and_validate(schema, source, "query.graphql")
            .expect("test document is valid"),
    )
}

#[derive(Clone)]
pub struct TestEngine(Arc<EngineInner>);

pub struct EngineInner {
    universe: Mutex<Value>,
    started: AtomicUsize,
    executions: AtomicUsize,
    permits: Option<Arc<Semaphore>>,
}

impl TestEngine {
    pub fn new(universe: Value) -> Self {
        Self(Arc::new(EngineInner {
            universe: Mutex::new(universe),
            started: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            permits: None,
        }))
    }

    /// An engine whose executions each consume one semaphore permit before
    /// resolving, so tests can hold a re-execution in flight.
    pub fn gated(universe: Value, permits: Arc<Semaphore>) -> Self {
        Self(Arc::new(EngineInner {
            universe: Mutex::new(universe),
            started: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            permits: Some(permits),
        }))
    }

    /// Replace one root value of the universe.
    pub fn set(&self, key: &str, value: Value) {
        if let Value::Object(universe) = &mut *self.0.universe.lock() {
            universe.insert(key, value);
        }
    }

    /// Executions the engine has started, including gated ones still waiting.
    pub fn started(&self) -> usize {
        self.0.started.load(Ordering::SeqCst)
    }

    /// Executions that made it past the gate and resolved.
    pub fn executions(&self) -> usize {
        self.0.executions.load(Ordering::SeqCst)
    }
}

impl Executor for TestEngine {
    fn execute_once(&self, request: ExecutionRequest) -> BoxFuture<'static, ExecutorResponse> {
        let engine = self.0.clone();
        Box::pin(async move {
            engine.started.fetch_add(1, Ordering::SeqCst);
            if let Some(permits) = &engine.permits {
                permits
                    .acquire()
                    .await
                    .expect("test semaphore is never closed")
                    .forget();
            }
            engine.executions.fetch_add(1, Ordering::SeqCst);
            ExecutorResponse::Response(engine.resolve(&request))
        })
    }
}

impl EngineInner {
    fn resolve(&self, request: &ExecutionRequest) -> Response {
        let operation = match request
            .document
            .operations
            .get(request.operation_name.as_deref())
        {
            Ok(operation) => operation,
            Err(_) => {
                return Response::builder()
                    .error(
                        graphql::Error::builder()
                            .message("operation not found")
                            .extension_code("GRAPHQL_VALIDATION_FAILED")
                            .build(),
                    )
                    .build();
            }
        };
        let universe = self.universe.lock().clone();
        let data = project_value(&request.document, &operation.selection_set, &universe);
        Response::builder().data(data).build()
    }
}

fn project_value(document: &ExecutableDocument, selection_set: &SelectionSet, source: &Value) -> Value {
    match source {
        Value::Object(_) => {
            let mut out = Map::<ByteString, Value>::new();
            project_fields(document, selection_set, source, &mut out);
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| project_value(document, selection_set, item))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn project_fields(
    document: &ExecutableDocument,
    selection_set: &SelectionSet,
    source: &Value,
    out: &mut Map<ByteString, Value>,
) {
    for selection in &selection_set.selections {
        match selection {
            Selection::Field(field) => {
                let value = source
                    .as_object()
                    .and_then(|object| object.get(field.name.as_str()))
                    .cloned()
                    .unwrap_or(Value::Null);
                let value = if field.selection_set.selections.is_empty() || value.is_null() {
                    value
                } else {
                    project_value(document, &field.selection_set, &value)
                };
                out.insert(field.response_key().as_str(), value);
            }
            Selection::FragmentSpread(fragment_spread) => {
                if let Some(fragment) = document.fragments.get(&fragment_spread.fragment_name) {
                    project_fields(document, &fragment.selection_set, source, out);
                }
            }
            Selection::InlineFragment(inline_fragment) => {
                project_fields(document, &inline_fragment.selection_set, source, out);
            }
        }
    }
}

/// An engine that always answers with an incremental delivery stream, the
/// way a defer/stream capable engine would.
pub struct StreamEngine;

impl Executor for StreamEngine {
    fn execute_once(&self, _request: ExecutionRequest) -> BoxFuture<'static, ExecutorResponse> {
        Box::pin(async {
            ExecutorResponse::Stream(Box::pin(futures::stream::empty::<Response>()))
        })
    }
}
