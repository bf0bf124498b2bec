//! Invalidation handling: coalescing, re-execution and result delivery.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json_bytes::Value;

use super::record::LiveQueryRecord;
use super::StoreInner;
use crate::execution::ExecutorResponse;
use crate::graphql;
use crate::graphql::Response;
use crate::identifiers::extract_resource_identifiers;
use crate::live;

/// Re-execute every record depending on one of the identifiers, returning
/// once all runs triggered by this call have delivered.
pub(crate) async fn invalidate(store: &Arc<StoreInner>, identifiers: Vec<String>) {
    let identifiers: HashSet<String> = identifiers
        .into_iter()
        .filter(|identifier| !identifier.is_empty())
        .collect();
    if identifiers.is_empty() {
        return;
    }

    let affected: Vec<Arc<LiveQueryRecord>> = {
        let index = store.index.lock();
        let mut seen = HashSet::new();
        identifiers
            .iter()
            .flat_map(|identifier| index.lookup(identifier))
            .filter(|record| seen.insert(record.id))
            .collect()
    };
    tracing::debug!(
        identifiers = ?identifiers,
        affected = affected.len(),
        "invalidation received"
    );

    let mut completions = Vec::with_capacity(affected.len());
    for record in affected {
        schedule(store, record.clone());
        completions.push(record.idle.subscribe());
    }
    for mut idle in completions {
        // a dropped sender means the record is gone, which also counts as
        // completion
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

/// Queue a run for the record unless one is already queued; a run in flight
/// is asked to go again instead.
pub(crate) fn schedule(store: &Arc<StoreInner>, record: Arc<LiveQueryRecord>) {
    {
        let mut state = record.state.lock();
        if state.terminated || state.queued {
            return;
        }
        if state.executing {
            state.rerun_after = true;
            return;
        }
        state.queued = true;
        record.idle.send_replace(false);
    }
    let store = Arc::clone(store);
    tokio::spawn(async move { run(store, record).await });
}

/// The per-record run loop. At most one of these exists per record; it keeps
/// looping as long as invalidations arrived while it was executing.
async fn run(store: Arc<StoreInner>, record: Arc<LiveQueryRecord>) {
    loop {
        {
            let mut state = record.state.lock();
            if state.terminated {
                state.queued = false;
                state.executing = false;
                record.idle.send_replace(true);
                return;
            }
            state.queued = false;
            state.executing = true;
            state.rerun_after = false;
        }

        let response = store.executor.execute_once(record.request.clone()).await;

        if record.is_terminated() {
            // the consumer went away while the engine was executing; the
            // result is discarded
            settle(&record);
            return;
        }

        let response = match response {
            ExecutorResponse::Response(response) => store.compose_live_response(&record, response),
            ExecutorResponse::Stream(_stream) => {
                tracing::warn!(
                    record = record.id,
                    "engine returned an incremental delivery stream for a live query"
                );
                defer_stream_unsupported()
            }
        };

        if record.sender.send(response).await.is_err() {
            tracing::debug!(record = record.id, "live query consumer is gone");
            store.terminate(&record);
            settle(&record);
            return;
        }

        let rerun = {
            let mut state = record.state.lock();
            if !state.terminated && state.rerun_after {
                // loop without yielding so a burst of invalidations collapses
                // into this single follow-up run
                true
            } else {
                state.executing = false;
                record.idle.send_replace(true);
                false
            }
        };
        if !rerun {
            return;
        }
    }
}

impl StoreInner {
    /// Refresh the record's identifier set from the finished response and
    /// mark the response as a live result.
    fn compose_live_response(&self, record: &LiveQueryRecord, mut response: Response) -> Response {
        let request = &record.request;
        response.is_live = Some(true);

        let Ok(operation) =
            live::operation_for(&request.document, request.operation_name.as_deref())
        else {
            // records are only ever created for resolvable operations
            tracing::error!(record = record.id, "live query record lost its operation");
            return response;
        };

        let identifiers = extract_resource_identifiers(
            &request.schema,
            &request.document,
            operation,
            &request.variables,
            &request.root_value,
            &self.collectors,
            &self.id_field_name,
            response.data.as_ref(),
        );
        tracing::debug!(record = record.id, ?identifiers, "live query dependencies refreshed");

        if self.include_identifier_extension {
            response.extensions.insert(
                "liveResourceIdentifier",
                Value::Array(
                    identifiers
                        .iter()
                        .map(|identifier| Value::String(identifier.as_str().into()))
                        .collect(),
                ),
            );
        }
        self.index.lock().register(record.id, identifiers);

        response
    }

    /// Tear the record down: mark it terminated and make it unreachable from
    /// the index. An in-flight execution is left to finish on its own; its
    /// result is discarded.
    pub(crate) fn terminate(&self, record: &LiveQueryRecord) {
        {
            let mut state = record.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
        }
        self.index.lock().remove_record(record.id);
        tracing::debug!(record = record.id, "live query terminated");
    }
}

fn settle(record: &LiveQueryRecord) {
    let mut state = record.state.lock();
    state.queued = false;
    state.executing = false;
    record.idle.send_replace(true);
}

fn defer_stream_unsupported() -> Response {
    Response::builder()
        .error(
            graphql::Error::builder()
                .message(
                    "cannot execute a live query: the engine returned an incremental delivery \
                     stream, the \"NoLiveMixedWithDeferStreamRule\" validation rule seems to \
                     have been skipped",
                )
                .extension_code("LIVE_QUERY_DEFER_STREAM_NOT_SUPPORTED")
                .build(),
        )
        .is_live(true)
        .build()
}
