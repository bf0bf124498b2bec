//! One live query subscription's in-memory state.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::execution::ExecutionRequest;
use crate::graphql::Response;

pub(crate) type RecordId = u64;

/// A live query record: the captured execution arguments, the producer side
/// of the result channel, and the run bookkeeping the scheduler coalesces
/// through.
pub(crate) struct LiveQueryRecord {
    pub(crate) id: RecordId,
    pub(crate) request: ExecutionRequest,
    pub(crate) sender: mpsc::Sender<Response>,
    pub(crate) state: Mutex<RunState>,

    /// Flips to `true` whenever no run is queued or executing. `invalidate`
    /// waits on it so callers observe the effects of every run their call
    /// triggered.
    pub(crate) idle: watch::Sender<bool>,
}

/// Scheduler bookkeeping. `queued` and `executing` are never both set; the
/// `rerun_after` flag is the handshake that coalesces invalidations arriving
/// while a run is in flight.
#[derive(Default)]
pub(crate) struct RunState {
    pub(crate) queued: bool,
    pub(crate) executing: bool,
    pub(crate) rerun_after: bool,
    pub(crate) terminated: bool,
}

impl LiveQueryRecord {
    pub(crate) fn new(
        id: RecordId,
        request: ExecutionRequest,
        sender: mpsc::Sender<Response>,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            id,
            request,
            sender,
            state: Mutex::new(RunState::default()),
            idle,
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }
}
