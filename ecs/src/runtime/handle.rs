//! Thread-safe handle for submitting work to a runtime.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use strand_core::sync::CancellationToken;

use super::frame::{FrameStats, SharedFrameStats};
use super::{RunState, Task};
use crate::context::RuntimeContext;
use crate::error::RuntimeError;

/// Result delivered by [`RuntimeHandle::safe_call`].
pub type SafeRet<T> = Result<T, RuntimeError>;

pub(crate) struct Shared {
    name: String,
    tasks: Sender<Task>,
    timeout: Duration,
    cancel: CancellationToken,
    state: AtomicU8,
    thread: OnceLock<ThreadId>,
    stats: Arc<SharedFrameStats>,
}

/// Cloneable, `Send` handle to a runtime's task queue.
///
/// Calls run on the runtime thread in the order they were queued.
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<Shared>,
}

impl RuntimeHandle {
    pub(crate) fn new(name: String, tasks: Sender<Task>, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                tasks,
                timeout,
                cancel,
                state: AtomicU8::new(RunState::Created as u8),
                thread: OnceLock::new(),
                stats: Arc::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RunState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn bind_thread(&self) {
        let _ = self.shared.thread.set(thread::current().id());
    }

    pub(crate) fn tasks(&self) -> &Sender<Task> {
        &self.shared.tasks
    }

    pub(crate) fn shared_stats(&self) -> Arc<SharedFrameStats> {
        self.shared.stats.clone()
    }

    /// Returns `true` when called from the runtime's own thread.
    pub fn is_runtime_thread(&self) -> bool {
        self.shared.thread.get() == Some(&thread::current().id())
    }

    /// Latest frame counters; all zero for a runtime without frames.
    pub fn stats(&self) -> FrameStats {
        self.shared.stats.snapshot()
    }

    /// Number of queued tasks, frame ticks included.
    pub fn queued(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Asks the runtime to stop. Queued calls still run before it does.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    /// Queues `call`, waiting up to the queue timeout for capacity.
    pub fn try_push_call(&self, call: impl FnOnce(&RuntimeContext) + Send + 'static) -> Result<(), RuntimeError> {
        if self.state() >= RunState::Stopping {
            return Err(RuntimeError::Stopped);
        }
        let timeout = self.shared.timeout;
        match self.shared.tasks.send_timeout(Task::Call(Box::new(call)), timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RuntimeError::QueueTimeout(timeout)),
            Err(SendTimeoutError::Disconnected(_)) => Err(RuntimeError::Stopped),
        }
    }

    /// Queues `call`.
    ///
    /// # Panics
    ///
    /// Panics if the queue stays full for the whole queue timeout, or the
    /// runtime is stopping.
    pub fn push_call(&self, call: impl FnOnce(&RuntimeContext) + Send + 'static) {
        if let Err(err) = self.try_push_call(call) {
            panic!("{}", err);
        }
    }

    /// Runs `f` on the runtime thread and delivers its result on the
    /// returned channel. Panics inside `f` arrive as
    /// [`RuntimeError::Panicked`].
    ///
    /// # Panics
    ///
    /// Panics like [`push_call`](Self::push_call) when the call cannot be
    /// queued.
    pub fn safe_call<T, F>(&self, f: F) -> Receiver<SafeRet<T>>
    where
        T: Send + 'static,
        F: FnOnce(&RuntimeContext) -> T + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.push_call(reply_call(f, tx));
        rx
    }

    /// Like [`safe_call`](Self::safe_call), but returns queueing failures
    /// instead of panicking.
    pub fn try_safe_call<T, F>(&self, f: F) -> Result<Receiver<SafeRet<T>>, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&RuntimeContext) -> T + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.try_push_call(reply_call(f, tx))?;
        Ok(rx)
    }

    /// Fire-and-forget variant of [`safe_call`](Self::safe_call). Panics
    /// inside `f` are logged and sent to the report-error channel.
    ///
    /// # Panics
    ///
    /// Panics like [`push_call`](Self::push_call) when the call cannot be
    /// queued.
    pub fn safe_call_no_ret<F>(&self, f: F)
    where
        F: FnOnce(&RuntimeContext) + Send + 'static,
    {
        self.push_call(reported_call(f));
    }

    /// Like [`safe_call_no_ret`](Self::safe_call_no_ret), but returns
    /// queueing failures instead of panicking.
    pub fn try_safe_call_no_ret<F>(&self, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&RuntimeContext) + Send + 'static,
    {
        self.try_push_call(reported_call(f))
    }

    /// Runs `f` on the runtime thread and blocks for its result.
    ///
    /// # Panics
    ///
    /// Panics when called from the runtime thread itself, which would
    /// deadlock.
    pub fn await_call<T, F>(&self, f: F) -> SafeRet<T>
    where
        T: Send + 'static,
        F: FnOnce(&RuntimeContext) -> T + Send + 'static,
    {
        assert!(
            !self.is_runtime_thread(),
            "await_call from the runtime thread would deadlock"
        );
        self.try_safe_call(f)?.recv().unwrap_or(Err(RuntimeError::Stopped))
    }
}

fn reply_call<T, F>(f: F, reply: Sender<SafeRet<T>>) -> impl FnOnce(&RuntimeContext) + Send + 'static
where
    T: Send + 'static,
    F: FnOnce(&RuntimeContext) -> T + Send + 'static,
{
    move |ctx: &RuntimeContext| {
        let ret = panic::catch_unwind(AssertUnwindSafe(|| f(ctx))).map_err(|payload| {
            let err = RuntimeError::from_panic(payload.as_ref(), ctx.auto_recover());
            log::error!("[{}] safe call panicked: {}", ctx.name(), err);
            err
        });
        let _ = reply.send(ret);
    }
}

fn reported_call<F>(f: F) -> impl FnOnce(&RuntimeContext) + Send + 'static
where
    F: FnOnce(&RuntimeContext) + Send + 'static,
{
    move |ctx: &RuntimeContext| {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
            let err = RuntimeError::from_panic(payload.as_ref(), ctx.auto_recover());
            log::error!("[{}] safe call panicked: {}", ctx.name(), err);
            crate::error::report_error(ctx.report_error(), err);
        }
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}
