//! Error types shared across the crate.
//!
//! - [`EcError`]: structural failures returned from mutating calls
//! - [`RuntimeError`]: failures crossing the runtime boundary, including
//!   recovered panics
//! - [`ConfigError`]: rejected runtime/frame options

use std::any::Any;
use std::backtrace::Backtrace;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use thiserror::Error;

use crate::id::Id;
use crate::lifecycle::{ComponentState, EntityState};

/// Structural errors from entity, component, tree and registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcError {
    #[error("entity {0} not found")]
    EntityNotFound(Id),

    #[error("entity {0} already exists")]
    EntityExists(Id),

    #[error("persistent id {0:?} already in use")]
    PersistIdExists(String),

    #[error("entity {id} is in state {state:?}, expected {expected}")]
    InvalidEntityState {
        id: Id,
        state: EntityState,
        expected: &'static str,
    },

    #[error("component {0:?} not found")]
    ComponentNotFound(String),

    #[error("component {0} not found")]
    ComponentIdNotFound(Id),

    #[error("component {0} already exists")]
    ComponentExists(Id),

    #[error("component {id} is already attached (state {state:?})")]
    ComponentAttached { id: Id, state: ComponentState },

    #[error("no components given")]
    EmptyComponents,

    #[error("entity {0} cannot be its own parent")]
    SelfParent(Id),

    #[error("entity {child} already has parent {parent}")]
    AlreadyHasParent { child: Id, parent: Id },

    #[error("attaching {child} under {parent} would create a cycle")]
    TreeCycle { parent: Id, child: Id },

    #[error("entity {0} has no parent")]
    NoParent(Id),

    #[error("component {0:?} is not declared")]
    UnknownComponent(String),

    #[error("component {0:?} is already declared")]
    ComponentDeclared(String),

    #[error("prototype {0:?} is not declared")]
    UnknownPrototype(String),

    #[error("prototype {0:?} is already declared")]
    PrototypeDeclared(String),

    #[error("runtime context has been dropped")]
    ContextDropped,
}

/// Errors crossing the boundary between callers and a runtime.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("panic recovered: {message}")]
    Panicked {
        message: String,
        backtrace: Option<String>,
    },

    #[error("process queue push timeout after {0:?}")]
    QueueTimeout(Duration),

    #[error("runtime is stopped")]
    Stopped,

    #[error("failed to spawn runtime thread: {0}")]
    Spawn(String),

    #[error(transparent)]
    Ec(#[from] EcError),
}

impl RuntimeError {
    /// Converts a caught panic payload, optionally capturing a backtrace of
    /// the recovery site.
    pub fn from_panic(payload: &(dyn Any + Send), capture_backtrace: bool) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        let backtrace = capture_backtrace.then(|| Backtrace::force_capture().to_string());
        RuntimeError::Panicked { message, backtrace }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, RuntimeError::Panicked { .. })
    }
}

/// Rejected runtime or frame configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("process queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("process queue timeout must be greater than zero")]
    ZeroQueueTimeout,

    #[error("GC interval must be greater than zero")]
    ZeroGcInterval,

    #[error("target FPS must be positive and finite, got {0}")]
    InvalidTargetFps(f64),

    #[error("target FPS {0} gives a frame interval too long to represent")]
    FrameIntervalOutOfRange(f64),

    #[error("runtime {0:?} is already registered")]
    DuplicateRuntime(String),
}

/// Delivers `err` to the report channel without blocking.
pub(crate) fn report_error(channel: Option<&Sender<RuntimeError>>, err: RuntimeError) {
    let Some(channel) = channel else {
        return;
    };
    match channel.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => {
            log::warn!("report error channel full, dropping: {}", err);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
