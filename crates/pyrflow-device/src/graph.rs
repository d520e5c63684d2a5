use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use pyrflow_image::ImageSize;

use crate::device::{DeviceConfig, ExecutionStrategy};
use crate::error::DeviceError;
use crate::event::CompletionHandle;

/// 2D iteration domain of a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NdRange {
    /// Number of work items along x and y.
    pub global: [usize; 2],
    /// Optional fixed local batch shape; `local[1]` rows are processed per task.
    pub local: Option<[usize; 2]>,
}

impl NdRange {
    /// An iteration domain covering every pixel of an image of `size`.
    pub fn new(size: ImageSize) -> Self {
        Self {
            global: [size.width, size.height],
            local: None,
        }
    }

    /// Set a fixed local batch shape.
    pub fn with_local(mut self, local: Option<[usize; 2]>) -> Self {
        self.local = local;
        self
    }

    /// Width of the domain.
    pub fn width(&self) -> usize {
        self.global[0]
    }

    /// Height of the domain.
    pub fn height(&self) -> usize {
        self.global[1]
    }

    /// The domain as an image size.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.global[0],
            height: self.global[1],
        }
    }

    /// Number of rows a single task processes.
    pub fn rows_per_task(&self) -> usize {
        self.local.map_or(1, |local| local[1].max(1))
    }

    /// Check the domain before a kernel is launched over it.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if let Some(local) = self.local {
            if local[0] == 0 || local[1] == 0 {
                return Err(DeviceError::InvalidRange(format!(
                    "local shape {local:?} has a zero dimension"
                )));
            }
        }
        Ok(())
    }
}

/// A device operation with its inputs, outputs and scalar parameters bound.
///
/// This is the unit the [`ExecutionGraph`] schedules. A kernel value owns
/// (shared) references to the images it reads and writes, so dispatching it
/// is the equivalent of binding arguments to a compiled device program.
pub trait Kernel: Send + Sync {
    /// Identifier of the device program entry point.
    fn name(&self) -> &'static str;

    /// Execute the kernel over `range`.
    fn launch(&self, range: &NdRange, strategy: ExecutionStrategy) -> Result<(), DeviceError>;
}

/// Artificial latency applied right before an operation starts, by label.
///
/// Used to check that dependent operations never observe unfinished outputs.
pub type DelayInjector = Arc<dyn Fn(&str) -> Option<Duration> + Send + Sync>;

#[derive(Clone, Copy)]
struct Clock {
    epoch: Instant,
}

impl Clock {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Count of operations that have been enqueued but not retired.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn increment(&self) {
        *self.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// An operation waiting for its wait-list.
struct PendingOp {
    kernel: Box<dyn Kernel>,
    range: NdRange,
    strategy: ExecutionStrategy,
    handle: CompletionHandle,
    remaining: AtomicUsize,
    failed_dependency: Mutex<Option<String>>,
    pool: Arc<rayon::ThreadPool>,
    clock: Clock,
    in_flight: Arc<InFlight>,
    delay: Option<DelayInjector>,
}

impl PendingOp {
    fn record_failed_dependency(&self, label: String) {
        let mut failed = self
            .failed_dependency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failed.get_or_insert(label);
    }

    fn release(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.handle.mark_submitted(self.clock.now());
            let op = self.clone();
            self.pool.spawn(move || op.execute());
        }
    }

    fn execute(&self) {
        let label = self.handle.label().to_string();
        let failed_dependency = self
            .failed_dependency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let result = match failed_dependency {
            Some(dependency) => {
                self.handle.mark_running(self.clock.now());
                Err(DeviceError::DependencyFailed {
                    label: label.clone(),
                    dependency,
                })
            }
            None => {
                if let Some(delay) = self.delay.as_ref().and_then(|delay| delay(&label)) {
                    std::thread::sleep(delay);
                }
                self.handle.mark_running(self.clock.now());
                log::trace!("launching {} ({})", label, self.kernel.name());
                self.range
                    .validate()
                    .and_then(|_| self.kernel.launch(&self.range, self.strategy))
                    .map_err(|err| DeviceError::OperationFailed {
                        label: label.clone(),
                        source: Box::new(err),
                    })
            }
        };

        if let Err(err) = &result {
            log::warn!("{err}");
        }

        self.handle.retire(result, self.clock.now());
        self.in_flight.decrement();
    }
}

/// Accepts asynchronous operation dispatches with explicit wait-lists.
///
/// An operation never starts before every handle in its wait-list has
/// retired. Operations without a declared dependency between them may run
/// concurrently, in any order, on the device thread pool. Failures surface
/// at the next host synchronization point, never at dispatch.
///
/// # Example
///
/// ```
/// use pyrflow_device::{DeviceConfig, DeviceError, ExecutionGraph, ExecutionStrategy, Kernel, NdRange};
///
/// struct Noop;
///
/// impl Kernel for Noop {
///     fn name(&self) -> &'static str {
///         "noop"
///     }
///
///     fn launch(&self, _: &NdRange, _: ExecutionStrategy) -> Result<(), DeviceError> {
///         Ok(())
///     }
/// }
///
/// let graph = ExecutionGraph::new(DeviceConfig::default()).unwrap();
/// let first = graph.enqueue("first", Noop, NdRange::new([4, 4].into()), &[]);
/// let second = graph.enqueue("second", Noop, NdRange::new([4, 4].into()), &[&first]);
/// graph.drain().unwrap();
///
/// assert!(second.depends_on(&first));
/// ```
pub struct ExecutionGraph {
    pool: Arc<rayon::ThreadPool>,
    clock: Clock,
    config: DeviceConfig,
    in_flight: Arc<InFlight>,
    pending: Mutex<Vec<CompletionHandle>>,
    enqueued: AtomicUsize,
    delay: Option<DelayInjector>,
}

impl ExecutionGraph {
    /// Create a graph backed by a fresh worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ThreadPool`] if the worker pool cannot be built.
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("pyrflow-device-{i}"))
            .build()
            .map_err(|e| DeviceError::ThreadPool(e.to_string()))?;

        log::debug!(
            "created execution graph with {} workers ({:?})",
            pool.current_num_threads(),
            config.strategy
        );

        Ok(Self {
            pool: Arc::new(pool),
            clock: Clock {
                epoch: Instant::now(),
            },
            config,
            in_flight: Arc::new(InFlight::default()),
            pending: Mutex::new(Vec::new()),
            enqueued: AtomicUsize::new(0),
            delay: None,
        })
    }

    /// Install an artificial latency per operation label.
    pub fn with_delay_injector(mut self, delay: DelayInjector) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The device configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Current device time in nanoseconds since the graph was created.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<CompletionHandle>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of operations enqueued since the graph was created.
    pub fn num_enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Number of operations enqueued since the last [`ExecutionGraph::drain`].
    pub fn num_pending(&self) -> usize {
        self.lock_pending().len()
    }

    /// Dispatch `kernel` over `range` once every handle in `wait_list` retired.
    ///
    /// Never blocks. The returned handle signals completion of the operation.
    pub fn enqueue<K>(
        &self,
        label: impl Into<String>,
        kernel: K,
        range: NdRange,
        wait_list: &[&CompletionHandle],
    ) -> CompletionHandle
    where
        K: Kernel + 'static,
    {
        let handle = CompletionHandle::new(
            label.into(),
            wait_list.iter().map(|h| h.id()).collect(),
            self.clock.now(),
        );
        log::debug!(
            "enqueue {} {} ({}x{}) after {:?}",
            handle.id(),
            handle.label(),
            range.width(),
            range.height(),
            handle.wait_list()
        );

        self.in_flight.increment();
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        self.lock_pending().push(handle.clone());

        let op = Arc::new(PendingOp {
            kernel: Box::new(kernel),
            range,
            strategy: self.config.strategy,
            handle: handle.clone(),
            remaining: AtomicUsize::new(wait_list.len() + 1),
            failed_dependency: Mutex::new(None),
            pool: self.pool.clone(),
            clock: self.clock,
            in_flight: self.in_flight.clone(),
            delay: self.delay.clone(),
        });

        for dependency in wait_list {
            let op = op.clone();
            let dependency_label = dependency.label().to_string();
            dependency.on_retire(Box::new(move |result| {
                if result.is_err() {
                    op.record_failed_dependency(dependency_label);
                }
                op.release();
            }));
        }
        // the guard count keeps the op from starting while wait-lists are registered
        op.release();

        handle
    }

    /// Block until every operation enqueued since the last drain has retired.
    ///
    /// Failures are reported by the drain that covers them and never again,
    /// so a graph can be reused after a failed run.
    ///
    /// # Errors
    ///
    /// Returns the first failure in dispatch order.
    ///
    /// NOTE: must not be called from inside a kernel.
    pub fn drain(&self) -> Result<(), DeviceError> {
        self.in_flight.wait_idle();
        let handles = std::mem::take(&mut *self.lock_pending());
        handles.iter().try_for_each(CompletionHandle::wait)
    }
}
