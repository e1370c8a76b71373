//! The single-thread runtime.
//!
//! [`Runtime::run`] spawns one thread that builds the [`RuntimeContext`] and
//! then drains a bounded task queue. Other threads talk to it only through a
//! [`RuntimeHandle`]. Three loop shapes exist:
//!
//! - no frame: queued calls and periodic GC;
//! - real-time frames: a ticker thread queues a frame task every
//!   `1 / target_fps`, interleaved with calls in FIFO order;
//! - blink frames: frames run back to back, draining the queue before each.
//!
//! On stop, entities are destroyed in reverse registration order, the queue
//! is drained, background work tracked by the context's wait group is
//! awaited, and a final GC runs before the stopped signal fires.

mod config;
pub(crate) mod driver;
mod frame;
mod handle;
mod options;

pub use config::{FrameSection, RuntimeConfig, RuntimeSection};
pub use driver::{EventLateUpdate, EventUpdate};
pub use frame::{Frame, FrameStats};
pub use handle::{RuntimeHandle, SafeRet};
pub use options::{FrameOptions, RuntimeOptions};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, select};
use strand_core::sync::{CancellationToken, WaitGroup, WaitGroupGuard};

use crate::context::{ContextParts, RuntimeContext};
use crate::error::{ConfigError, RuntimeError};
use crate::lifecycle::EntityState;
use crate::registry::Registry;
use crate::service::EntityDirectory;

/// Observer of [`RunningState`] transitions, called on the runtime thread.
pub type RunningHandler = Box<dyn Fn(&RuntimeContext, RunningState) + Send>;

/// A queued unit of work.
pub(crate) enum Task {
    Call(Box<dyn FnOnce(&RuntimeContext) + Send>),
    Frame,
}

/// Coarse runtime state, readable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RunState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl RunState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunState::Created,
            1 => RunState::Running,
            2 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

/// Fine-grained stages reported to a [`RunningHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunningState {
    Starting,
    Started,
    FrameLoopBegin,
    FrameUpdateBegin,
    FrameUpdateEnd,
    FrameLoopEnd,
    Terminating,
    Terminated,
}

/// A runtime, configured but not yet running.
///
/// ```no_run
/// use strand_ecs::{FrameOptions, Runtime, RuntimeOptions};
///
/// let runtime = Runtime::new(
///     RuntimeOptions::default()
///         .name("world")
///         .frame(FrameOptions::new(60.0).total_frames(600)),
/// )
/// .unwrap();
/// let handle = runtime.handle();
/// let stopped = runtime.run().unwrap();
///
/// let count = handle.await_call(|ctx| ctx.entity_mgr().count()).unwrap();
/// assert_eq!(count, 0);
/// let _ = stopped.recv();
/// ```
pub struct Runtime {
    options: RuntimeOptions,
    tasks: Receiver<Task>,
    handle: RuntimeHandle,
    cancel: CancellationToken,
    parent_wait_group: Option<WaitGroup>,
    registry: Option<Arc<Registry>>,
    directory: Option<Arc<EntityDirectory>>,
    running_handler: Option<RunningHandler>,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let (tx, rx) = crossbeam_channel::bounded(options.process_queue_capacity);
        let cancel = CancellationToken::new();
        let handle = RuntimeHandle::new(
            options.name.clone(),
            tx,
            options.process_queue_timeout,
            cancel.clone(),
        );
        Ok(Self {
            options,
            tasks: rx,
            handle,
            cancel,
            parent_wait_group: None,
            registry: None,
            directory: None,
            running_handler: None,
        })
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_running_handler(
        mut self,
        handler: impl Fn(&RuntimeContext, RunningState) + Send + 'static,
    ) -> Self {
        self.running_handler = Some(Box::new(handler));
        self
    }

    /// Derives the runtime's cancellation from `parent`: cancelling the
    /// parent stops this runtime.
    pub fn with_cancel_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child();
        self.handle = RuntimeHandle::new(
            self.options.name.clone(),
            self.handle.tasks().clone(),
            self.options.process_queue_timeout,
            self.cancel.clone(),
        );
        self
    }

    /// The runtime thread holds a slot in `wait_group` until it has stopped.
    pub fn with_wait_group(mut self, wait_group: WaitGroup) -> Self {
        self.parent_wait_group = Some(wait_group);
        self
    }

    /// Records which entities live in this runtime.
    pub fn with_directory(mut self, directory: Arc<EntityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Spawns the runtime thread. The returned channel receives `()` once
    /// the runtime has stopped; it disconnects instead if the thread dies
    /// from an unrecovered panic.
    pub fn run(self) -> Result<Receiver<()>, RuntimeError> {
        let (stopped_tx, stopped_rx) = crossbeam_channel::bounded(1);
        let guard = self.parent_wait_group.as_ref().map(WaitGroup::enter);
        let name = self.options.name.clone();
        thread::Builder::new()
            .name(format!("strand-{}", name))
            .spawn(move || {
                let _guard: Option<WaitGroupGuard> = guard;
                self.main();
                let _ = stopped_tx.send(());
            })
            .map_err(|err| RuntimeError::Spawn(err.to_string()))?;
        Ok(stopped_rx)
    }

    fn main(self) {
        let Runtime {
            options,
            tasks,
            handle,
            cancel,
            registry,
            directory,
            running_handler,
            ..
        } = self;
        handle.bind_thread();
        let _stopped = StoppedGuard(handle.clone());

        let mut parts = ContextParts::new(options.name.clone());
        parts.auto_recover = options.auto_recover;
        parts.report_error = options.report_error.clone();
        parts.frame = options.frame.map(|frame| Frame::new(frame, handle.shared_stats()));
        parts.cancel = cancel;
        parts.handle = Some(handle.clone());
        parts.registry = registry;
        parts.directory = directory;
        parts.running_handler = running_handler;
        let ctx = RuntimeContext::from_parts(parts);

        ctx.notify_running(RunningState::Starting);
        handle.set_state(RunState::Running);
        log::info!("[{}] runtime started", ctx.name());
        ctx.notify_running(RunningState::Started);

        let ticker = match &options.frame {
            None => {
                event_loop(&ctx, &tasks, options.gc_interval);
                None
            }
            Some(frame) if frame.blink => {
                blink_loop(&ctx, &tasks, gc_every_frames(options.gc_interval, frame.target_fps));
                None
            }
            Some(frame) => {
                let ticker = spawn_ticker(&ctx, &handle, frame.frame_interval());
                event_loop(&ctx, &tasks, options.gc_interval);
                ticker
            }
        };

        handle.set_state(RunState::Stopping);
        ctx.notify_running(RunningState::Terminating);
        log::info!("[{}] runtime stopping", ctx.name());
        ctx.cancel_token().cancel();
        if let Some(ticker) = ticker
            && ticker.join().is_err()
        {
            log::warn!("[{}] frame ticker panicked", ctx.name());
        }
        shutdown(&ctx, &tasks);
        handle.set_state(RunState::Stopped);
        close_queue(&ctx, tasks);
        ctx.notify_running(RunningState::Terminated);
        log::info!("[{}] runtime stopped", ctx.name());
    }
}

/// Marks the runtime stopped even if its thread unwinds.
struct StoppedGuard(RuntimeHandle);

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        self.0.set_state(RunState::Stopped);
    }
}

fn gc_every_frames(gc_interval: Duration, target_fps: f64) -> u64 {
    ((gc_interval.as_secs_f64() * target_fps) as u64).max(1)
}

/// Serves calls, frame ticks and GC until cancelled or the frame budget is
/// used up.
fn event_loop(ctx: &RuntimeContext, tasks: &Receiver<Task>, gc_interval: Duration) {
    let gc_tick = crossbeam_channel::tick(gc_interval);
    let done = ctx.cancel_token().done();
    loop {
        select! {
            recv(tasks) -> task => match task {
                Ok(Task::Call(call)) => ctx.invoke_call(call),
                Ok(Task::Frame) => {
                    run_frame(ctx);
                    if ctx.frame().is_some_and(Frame::reached_total) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(gc_tick) -> _ => {
                ctx.run_gc();
            }
            recv(done) -> _ => break,
        }
    }
}

fn blink_loop(ctx: &RuntimeContext, tasks: &Receiver<Task>, gc_every: u64) {
    let Some(frame) = ctx.frame() else {
        return;
    };
    frame.run_begin();
    while !ctx.cancel_token().is_cancelled() {
        for _ in 0..tasks.len() {
            match tasks.try_recv() {
                Ok(Task::Call(call)) => ctx.invoke_call(call),
                Ok(Task::Frame) => {}
                Err(_) => break,
            }
        }
        if ctx.cancel_token().is_cancelled() {
            break;
        }
        run_frame(ctx);
        if frame.cur_frames() % gc_every == 0 {
            ctx.run_gc();
        }
        if frame.reached_total() {
            break;
        }
    }
}

fn spawn_ticker(ctx: &RuntimeContext, handle: &RuntimeHandle, interval: Duration) -> Option<JoinHandle<()>> {
    if let Some(frame) = ctx.frame() {
        frame.run_begin();
    }
    let tasks = handle.tasks().clone();
    let done = ctx.cancel_token().done();
    let name = ctx.name().to_string();
    let spawned = thread::Builder::new()
        .name(format!("strand-{}-ticker", name))
        .spawn(move || {
            let tick = crossbeam_channel::tick(interval);
            loop {
                select! {
                    recv(tick) -> _ => {
                        match tasks.send_timeout(Task::Frame, interval) {
                            Ok(()) => {}
                            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => {
                                log::trace!("[{}] queue full, frame tick skipped", name);
                            }
                            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => break,
                        }
                    }
                    recv(done) -> _ => break,
                }
            }
        });
    match spawned {
        Ok(ticker) => Some(ticker),
        Err(err) => {
            log::error!("[{}] failed to spawn frame ticker: {}", ctx.name(), err);
            ctx.cancel_token().cancel();
            None
        }
    }
}

fn run_frame(ctx: &RuntimeContext) {
    let Some(frame) = ctx.frame() else {
        return;
    };
    ctx.notify_running(RunningState::FrameLoopBegin);
    frame.frame_begin();
    ctx.notify_running(RunningState::FrameUpdateBegin);
    frame.update_begin();
    ctx.driver().emit_update();
    ctx.driver().emit_late_update();
    frame.update_end();
    ctx.notify_running(RunningState::FrameUpdateEnd);
    frame.frame_end();
    ctx.notify_running(RunningState::FrameLoopEnd);
}

fn destroy_all(ctx: &RuntimeContext) {
    let mgr = ctx.entity_mgr();
    mgr.reverse_range(|entity| {
        entity.destroy_self();
        if entity.state() < EntityState::Leave
            && let Err(err) = mgr.remove_entity(entity.id())
        {
            log::warn!("[{}] failed to remove entity {}: {}", ctx.name(), entity.id(), err);
        }
        true
    });
}

fn drain_calls(ctx: &RuntimeContext, tasks: &Receiver<Task>) -> usize {
    let mut drained = 0usize;
    while let Ok(task) = tasks.try_recv() {
        if let Task::Call(call) = task {
            ctx.invoke_call(call);
            drained += 1;
        }
    }
    drained
}

fn shutdown(ctx: &RuntimeContext, tasks: &Receiver<Task>) {
    destroy_all(ctx);
    let drained = drain_calls(ctx, tasks);
    if drained > 0 {
        log::debug!("[{}] drained {} calls on shutdown", ctx.name(), drained);
    }
    destroy_all(ctx);
    ctx.wait_group().wait();
    ctx.run_gc();
}

/// Runs calls pushed by producers that saw the runtime before it left
/// `Running`, then drops the receiver so every later push fails with
/// [`RuntimeError::Stopped`].
fn close_queue(ctx: &RuntimeContext, tasks: Receiver<Task>) {
    let late = drain_calls(ctx, &tasks);
    drop(tasks);
    if late > 0 {
        log::debug!("[{}] ran {} late calls after stopping", ctx.name(), late);
        destroy_all(ctx);
        ctx.run_gc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_frames_never_zero() {
        assert_eq!(gc_every_frames(Duration::from_secs(10), 30.0), 300);
        assert_eq!(gc_every_frames(Duration::from_millis(1), 10.0), 1);
    }

    #[test]
    fn run_state_round_trips_through_u8() {
        for state in [RunState::Created, RunState::Running, RunState::Stopping, RunState::Stopped] {
            assert_eq!(RunState::from_u8(state as u8), state);
        }
        assert!(RunState::Stopping > RunState::Running);
    }

    #[test]
    fn stopped_runtime_disconnects_its_queue() {
        let runtime = Runtime::new(RuntimeOptions::default().name("closing")).unwrap();
        let handle = runtime.handle();
        let stopped = runtime.run().unwrap();
        handle.stop();
        stopped.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(handle.state(), RunState::Stopped);
        assert!(handle.tasks().send(Task::Frame).is_err());
        assert!(matches!(
            handle.try_safe_call_no_ret(|_| {}),
            Err(RuntimeError::Stopped)
        ));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let err = Runtime::new(RuntimeOptions::default().process_queue_capacity(0)).err();
        assert_eq!(err, Some(ConfigError::ZeroQueueCapacity));
    }
}
