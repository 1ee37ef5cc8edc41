// ABOUTME: Concurrency limiter - caps simultaneously running tasks at a fixed capacity.
// ABOUTME: A background collector recycles freed slots and detects full drain.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::GateError;

/// A bounded-concurrency gate.
///
/// Implementors cap the number of logical tasks allowed to run at once.
/// Callers [`acquire`](Gate::acquire) a slot before starting work and report
/// completion with exactly one [`done`](Gate::done) per acquire.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Wait until a slot is available and claim it.
    async fn acquire(&self);

    /// Report completion of a previously acquired slot's work.
    fn done(&self);

    /// Request shutdown without waiting for running tasks.
    fn close(&self);

    /// Request shutdown, then wait until every running task has reported done.
    async fn wait_all_done(&self) -> Result<(), GateError>;

    /// Snapshot of the number of currently running tasks.
    fn running_count(&self) -> i64;
}

/// State shared between the limiter handle and its collector task.
struct Shared {
    /// Free execution slots. Acquire forgets a permit; the collector adds it
    /// back when the matching completion event arrives.
    slots: Semaphore,

    /// Number of currently running tasks. Signed so an unmatched `done`
    /// shows up as a negative count instead of wrapping.
    running: AtomicI64,

    /// Set once by `close`; read by the collector's drain check.
    closed: AtomicBool,

    /// Latched wakeup so the collector re-checks the drain condition when
    /// shutdown is requested with no completion event in flight.
    close_nudge: Notify,
}

/// Caps the number of simultaneously running tasks at a fixed capacity.
///
/// A `Limiter` is created with a positive capacity and shared across tasks,
/// typically behind an [`Arc`]. Each task calls [`acquire`](Limiter::acquire)
/// before starting work (blocking while all slots are taken) and
/// [`done`](Limiter::done) exactly once when its work finishes. Freed slots
/// are recycled by a background collector task owned by the limiter; dropping
/// the limiter aborts the collector.
///
/// # Usage contract
///
/// - Every `acquire` must be matched by exactly one `done`. An unmatched
///   `acquire` permanently removes a slot from the pool; an unmatched `done`
///   corrupts the running count (it may go negative).
/// - No `acquire` may be issued after `close` (or `wait_all_done`) has been
///   called. The drain check reads the running count after the reporter's
///   decrement, so a late `acquire` can race the check and be stranded.
/// - Shutdown has a single initiator. `wait_all_done` may be called at most
///   once; a second call returns [`GateError::DrainAlreadyAwaited`].
pub struct Limiter {
    shared: Arc<Shared>,

    /// Maximum concurrent tasks, fixed at construction.
    capacity: usize,

    /// Producer side of the completion queue. One event per `done` call.
    done_tx: mpsc::UnboundedSender<()>,

    /// Drain signal receiver, taken by the first `wait_all_done` call.
    drain_rx: Mutex<Option<oneshot::Receiver<()>>>,

    /// The collector task, aborted on drop so it cannot outlive the limiter.
    collector: JoinHandle<()>,
}

impl Limiter {
    /// Create a new limiter with `capacity` concurrent slots.
    ///
    /// The completion collector starts immediately and runs until the
    /// limiter drains or is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero: a zero-capacity limiter could never
    /// grant a slot, so every `acquire` would block forever.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");

        let shared = Arc::new(Shared {
            slots: Semaphore::new(capacity),
            running: AtomicI64::new(0),
            closed: AtomicBool::new(false),
            close_nudge: Notify::new(),
        });

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (drain_tx, drain_rx) = oneshot::channel();

        let collector = tokio::spawn(collect(shared.clone(), done_rx, drain_tx));

        Self {
            shared,
            capacity,
            done_tx,
            drain_rx: Mutex::new(Some(drain_rx)),
            collector,
        }
    }

    /// Wait until a slot is available and claim it.
    ///
    /// Blocks while `capacity` tasks are already running; never fails and
    /// never times out. Must not be called after [`close`](Limiter::close).
    pub async fn acquire(&self) {
        // The semaphore is never closed, so acquisition cannot fail.
        let permit = self.shared.slots.acquire().await.expect("semaphore closed");
        permit.forget();
        self.shared.running.fetch_add(1, Ordering::SeqCst);
    }

    /// Report completion of a previously acquired slot's work.
    ///
    /// Call exactly once per successful [`acquire`](Limiter::acquire). The
    /// running count is decremented before the completion event is emitted,
    /// so the collector's drain check observes the post-decrement value for
    /// this event.
    pub fn done(&self) {
        self.shared.running.fetch_sub(1, Ordering::SeqCst);
        // The send only fails once the collector has exited, after drain.
        let _ = self.done_tx.send(());
    }

    /// Request shutdown without waiting for running tasks.
    ///
    /// Non-blocking and idempotent. No further `acquire` may be issued after
    /// this call.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        // notify_one latches: the collector picks this up even if it is
        // mid-iteration when the call lands.
        self.shared.close_nudge.notify_one();
    }

    /// Request shutdown, then wait until every running task has reported done.
    ///
    /// The drain signal is single-fire and the first caller consumes it, so
    /// this may be called at most once; a second call returns
    /// [`GateError::DrainAlreadyAwaited`] immediately.
    pub async fn wait_all_done(&self) -> Result<(), GateError> {
        self.close();

        let drain_rx = self
            .drain_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(GateError::DrainAlreadyAwaited)?;

        drain_rx.await.map_err(|_| GateError::CollectorStopped)
    }

    /// Snapshot of the number of currently running tasks.
    ///
    /// An atomic read with no further synchronization - the value may be
    /// stale by the time the caller acts on it.
    pub fn running_count(&self) -> i64 {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The fixed number of slots this limiter was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Limiter {
    fn drop(&mut self) {
        // The collector must not outlive its owner. Abort is a no-op if the
        // loop already exited through drain.
        self.collector.abort();
    }
}

#[async_trait]
impl Gate for Limiter {
    async fn acquire(&self) {
        Limiter::acquire(self).await;
    }

    fn done(&self) {
        Limiter::done(self);
    }

    fn close(&self) {
        Limiter::close(self);
    }

    async fn wait_all_done(&self) -> Result<(), GateError> {
        Limiter::wait_all_done(self).await
    }

    fn running_count(&self) -> i64 {
        Limiter::running_count(self)
    }
}

/// The completion collector loop.
///
/// Sole consumer of completion events and sole producer of the drain signal,
/// so "last completion processed" and "drain fired" are totally ordered.
async fn collect(
    shared: Arc<Shared>,
    mut done_rx: mpsc::UnboundedReceiver<()>,
    drain_tx: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            event = done_rx.recv() => match event {
                Some(()) => {
                    // Hand the finished task's slot back, waking one blocked
                    // acquire if any.
                    shared.slots.add_permits(1);
                    if shared.closed.load(Ordering::SeqCst)
                        && shared.running.load(Ordering::SeqCst) == 0
                    {
                        break;
                    }
                }
                // Every sender dropped: the limiter itself is gone.
                None => break,
            },
            () = shared.close_nudge.notified() => {
                // Shutdown requested. No slot to recycle - just re-check the
                // drain condition, covering a close that arrives while
                // nothing is running.
                if shared.running.load(Ordering::SeqCst) == 0 {
                    break;
                }
            }
        }
    }

    // The receiver may already be gone if no one waits for the drain.
    let _ = drain_tx.send(());
}
