use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::DeviceError;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(0);

/// Unique identifier of a dispatched operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution state of a dispatched operation.
#[derive(Clone, Debug, PartialEq)]
pub enum HandleStatus {
    /// Enqueued, waiting for its wait-list.
    Queued,
    /// Every dependency retired, handed to a worker.
    Submitted,
    /// Executing on a worker.
    Running,
    /// Retired successfully.
    Complete,
    /// Retired with an error.
    Failed(DeviceError),
}

impl HandleStatus {
    /// Whether the operation has retired, successfully or not.
    pub fn is_retired(&self) -> bool {
        matches!(self, HandleStatus::Complete | HandleStatus::Failed(_))
    }
}

/// Device timestamps of one operation in nanoseconds since the graph epoch.
///
/// The four values never decrease: `queued <= submitted <= started <= ended`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfilingInfo {
    /// The operation was enqueued by the host.
    pub queued: u64,
    /// The last dependency retired and the operation was handed to a worker.
    pub submitted: u64,
    /// A worker started executing the operation.
    pub started: u64,
    /// The operation retired.
    pub ended: u64,
}

pub(crate) type Continuation = Box<dyn FnOnce(Result<(), DeviceError>) + Send>;

struct HandleState {
    status: HandleStatus,
    profiling: ProfilingInfo,
    continuations: Vec<Continuation>,
}

struct HandleInner {
    id: HandleId,
    label: String,
    wait_list: Vec<HandleId>,
    state: Mutex<HandleState>,
    retired: Condvar,
}

/// Asynchronous completion signal of one dispatched operation.
///
/// Handles are cheap to clone; every clone observes the same operation. A
/// handle can be placed in the wait-list of later dispatches or used by the
/// host as a synchronization point with [`CompletionHandle::wait`].
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("wait_list", &self.inner.wait_list)
            .field("status", &self.status())
            .finish()
    }
}

impl CompletionHandle {
    pub(crate) fn new(label: String, wait_list: Vec<HandleId>, queued: u64) -> Self {
        let id = HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(HandleInner {
                id,
                label,
                wait_list,
                state: Mutex::new(HandleState {
                    status: HandleStatus::Queued,
                    profiling: ProfilingInfo {
                        queued,
                        submitted: queued,
                        started: queued,
                        ended: queued,
                    },
                    continuations: Vec::new(),
                }),
                retired: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The unique id of the operation.
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// The label given at dispatch time.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Ids of the operations this one was enqueued behind.
    pub fn wait_list(&self) -> &[HandleId] {
        &self.inner.wait_list
    }

    /// Whether `other` appears in the wait-list of this operation.
    pub fn depends_on(&self, other: &CompletionHandle) -> bool {
        self.inner.wait_list.contains(&other.id())
    }

    /// Snapshot of the execution state.
    pub fn status(&self) -> HandleStatus {
        self.lock().status.clone()
    }

    /// Whether the operation has retired, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.lock().status.is_retired()
    }

    /// Block the calling thread until the operation retires.
    ///
    /// # Errors
    ///
    /// Returns the error of the operation if it failed.
    ///
    /// NOTE: must not be called from inside a kernel.
    pub fn wait(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        while !state.status.is_retired() {
            state = self
                .inner
                .retired
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match &state.status {
            HandleStatus::Failed(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// The device timestamps of the operation.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ProfilingUnavailable`] if the operation has not retired.
    pub fn profiling_info(&self) -> Result<ProfilingInfo, DeviceError> {
        let state = self.lock();
        if !state.status.is_retired() {
            return Err(DeviceError::ProfilingUnavailable(self.inner.label.clone()));
        }
        Ok(state.profiling)
    }

    /// Register `continuation` to run once the operation retires.
    ///
    /// Runs immediately on the calling thread if it already retired.
    pub(crate) fn on_retire(&self, continuation: Continuation) {
        let mut state = self.lock();
        if !state.status.is_retired() {
            state.continuations.push(continuation);
            return;
        }
        let result = match &state.status {
            HandleStatus::Failed(err) => Err(err.clone()),
            _ => Ok(()),
        };
        drop(state);
        continuation(result);
    }

    pub(crate) fn mark_submitted(&self, timestamp: u64) {
        let mut state = self.lock();
        state.status = HandleStatus::Submitted;
        state.profiling.submitted = timestamp.max(state.profiling.queued);
        state.profiling.started = state.profiling.submitted;
    }

    pub(crate) fn mark_running(&self, timestamp: u64) {
        let mut state = self.lock();
        state.status = HandleStatus::Running;
        state.profiling.started = timestamp.max(state.profiling.submitted);
    }

    /// Retire the operation and fire its continuations.
    pub(crate) fn retire(&self, result: Result<(), DeviceError>, timestamp: u64) {
        let continuations = {
            let mut state = self.lock();
            state.profiling.ended = timestamp.max(state.profiling.started);
            state.status = match &result {
                Ok(()) => HandleStatus::Complete,
                Err(err) => HandleStatus::Failed(err.clone()),
            };
            std::mem::take(&mut state.continuations)
        };
        self.inner.retired.notify_all();
        for continuation in continuations {
            continuation(result.clone());
        }
    }
}
