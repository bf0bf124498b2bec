//! The live query store: dispatcher, index and configuration.

mod index;
mod record;
mod scheduler;
mod stream;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
pub use stream::LiveQueryStream;
use tokio::sync::mpsc;

use self::index::LiveQueryIndex;
use self::record::LiveQueryRecord;
use crate::execution::ExecutionRequest;
use crate::execution::Executor;
use crate::execution::ExecutorResponse;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::live;

/// A resource identifier collector registered for one schema coordinate.
///
/// Invoked with the execution's root value and the field's resolved argument
/// values on every (re-)execution; whatever it returns is merged into the
/// live query's identifier set. Return values are treated as untrusted
/// input: they are plain strings and empty ones are dropped.
pub type CollectResourceIdentifiersFn = dyn Fn(&Value, &Object) -> Vec<String> + Send + Sync;

pub(crate) type CollectorMap = HashMap<String, Arc<CollectResourceIdentifiersFn>>;

const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// An in-process store tracking live queries and the resources they depend
/// on.
///
/// The store wraps a GraphQL engine ([`Executor`]). Operations without the
/// `@live` directive pass through it untouched; live operations get a record,
/// an identifier set extracted from each execution, and a result sequence
/// that re-emits whenever [`invalidate`](LiveQueryStore::invalidate) touches
/// one of their identifiers.
///
/// Stores are plain values: several can coexist, each with an independent
/// index.
#[derive(Clone)]
pub struct LiveQueryStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) index: Mutex<LiveQueryIndex>,
    pub(crate) collectors: CollectorMap,
    pub(crate) include_identifier_extension: bool,
    pub(crate) id_field_name: String,
    queue_capacity: usize,
    next_record_id: AtomicU64,
}

#[buildstructor::buildstructor]
impl LiveQueryStore {
    /// Returns a builder that builds a [`LiveQueryStore`].
    ///
    /// Builder methods:
    ///
    /// * `.executor(Arc<dyn Executor>)`
    ///   Required.
    ///   The engine executing documents.
    ///
    /// * `.include_identifier_extension(bool)`
    ///   Optional, defaults to `false`.
    ///   Attach `extensions.liveResourceIdentifier` (the sorted identifier
    ///   list) to every live result.
    ///
    /// * `.id_field_name(impl Into<String>)`
    ///   Optional, defaults to `"id"`.
    ///   The field object identifiers are derived from.
    ///
    /// * `.queue_capacity(usize)`
    ///   Optional.
    ///   Bound of each live query's result buffer; pushes beyond it wait for
    ///   the consumer.
    ///
    /// * `.collector(impl Into<String>, Arc<CollectResourceIdentifiersFn>)`
    ///   Optional, may be called multiple times.
    ///   Registers a resource identifier collector for a schema coordinate.
    ///
    /// * `.build()`
    #[builder(visibility = "pub")]
    fn new(
        executor: Arc<dyn Executor>,
        include_identifier_extension: Option<bool>,
        id_field_name: Option<String>,
        queue_capacity: Option<usize>,
        collectors: HashMap<String, Arc<CollectResourceIdentifiersFn>>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                executor,
                index: Mutex::new(LiveQueryIndex::default()),
                collectors,
                include_identifier_extension: include_identifier_extension.unwrap_or(false),
                id_field_name: id_field_name.unwrap_or_else(|| "id".to_string()),
                queue_capacity: queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1),
                next_record_id: AtomicU64::new(0),
            }),
        }
    }
}

/// What [`LiveQueryStore::execute`] hands back.
pub enum ExecuteResponse {
    /// The engine's single result, unchanged. Returned for any operation
    /// without an effective `@live` directive, including documents whose
    /// operation could not be selected.
    Response(Response),

    /// The engine's incremental delivery sequence, unchanged.
    Stream(ResponseStream),

    /// The result sequence of a newly registered live query.
    Live(LiveQueryStream),
}

impl ExecuteResponse {
    /// The single response, if this is the pass-through case.
    pub fn into_response(self) -> Option<Response> {
        match self {
            ExecuteResponse::Response(response) => Some(response),
            _ => None,
        }
    }

    /// The live sequence, if a live query was registered.
    pub fn into_live(self) -> Option<LiveQueryStream> {
        match self {
            ExecuteResponse::Live(stream) => Some(stream),
            _ => None,
        }
    }
}

impl LiveQueryStore {
    /// Execute a document.
    ///
    /// Operations without an effective `@live` directive are forwarded to the
    /// engine and returned verbatim. For live operations this registers a
    /// record, schedules the initial execution and returns the consumer side
    /// of its result sequence.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecuteResponse {
        let is_live = match live::operation_for(&request.document, request.operation_name.as_deref())
        {
            Ok(operation) => live::live_directive_enabled(operation, &request.variables),
            Err(err) => {
                // the engine produces the error result for unresolvable
                // operations, and it is returned without live wrapping
                tracing::debug!(%err, "forwarding unresolvable operation to the engine");
                false
            }
        };

        if !is_live {
            return match self.inner.executor.execute_once(request).await {
                ExecutorResponse::Response(response) => ExecuteResponse::Response(response),
                ExecutorResponse::Stream(stream) => ExecuteResponse::Stream(stream),
            };
        }

        let (sender, receiver) = mpsc::channel(self.inner.queue_capacity);
        let id = self.inner.next_record_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(LiveQueryRecord::new(id, request, sender));
        self.inner.index.lock().insert_record(record.clone());
        tracing::debug!(record = id, "live query registered");

        scheduler::schedule(&self.inner, record.clone());
        ExecuteResponse::Live(LiveQueryStream::new(self.inner.clone(), record, receiver))
    }

    /// Invalidate resources by identifier.
    ///
    /// Every live query depending on one of the identifiers is re-executed,
    /// with overlapping invalidations coalesced per query. The future
    /// resolves once all runs triggered by this call have delivered their
    /// result.
    pub async fn invalidate<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        scheduler::invalidate(&self.inner, identifiers.into_iter().map(Into::into).collect()).await
    }

    /// Number of live queries currently registered.
    pub fn live_query_count(&self) -> usize {
        self.inner.index.lock().record_count()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::Schema;
    use tokio::sync::mpsc;

    use super::record::LiveQueryRecord;
    use super::record::RecordId;
    use super::*;

    pub(crate) fn test_record(id: RecordId, sender: mpsc::Sender<Response>) -> LiveQueryRecord {
        let schema =
            Schema::parse_and_validate("type Query { foo: String }", "schema.graphql").unwrap();
        let document =
            ExecutableDocument::parse_and_validate(&schema, "{ foo }", "query.graphql").unwrap();
        let request = ExecutionRequest::builder()
            .schema(Arc::new(schema))
            .document(Arc::new(document))
            .build();
        LiveQueryRecord::new(id, request, sender)
    }
}
