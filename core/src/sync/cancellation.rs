use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Error returned by [`CancellationToken::check`] once the token is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("context cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct TokenInner {
    flag: AtomicBool,
    // Dropped on cancel so that `done()` receivers observe a disconnect.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            flag: AtomicBool::new(false),
            done_tx: Mutex::new(Some(tx)),
            done_rx: rx,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        if self.flag.swap(true, Ordering::AcqRel) {
            return;
        }
        self.done_tx.lock().take();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

/// Cancellation signal shared between a context and everything derived from it.
///
/// Cloning a token creates another handle to the same signal. Tokens created
/// with [`child`](CancellationToken::child) are cancelled together with their
/// parent, but cancelling a child leaves the parent untouched.
///
/// The [`done`](CancellationToken::done) receiver disconnects on cancellation,
/// which makes the signal usable inside `crossbeam_channel::select!`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Creates a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new()),
        }
    }

    /// Creates a token that is cancelled whenever `self` is.
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // Parent may have been cancelled before the child was registered.
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Signals cancellation to this token and all of its children.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` once the token is cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Receiver that never yields a value and disconnects on cancellation.
    pub fn done(&self) -> Receiver<()> {
        self.inner.done_rx.clone()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        assert!(!token1.is_cancelled());
        assert!(!token2.is_cancelled());

        token2.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert_eq!(token1.check(), Err(Cancelled));
    }

    #[test]
    fn cancelling_parent_cancels_children() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn cancelling_child_leaves_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn done_disconnects_on_cancel() {
        let token = CancellationToken::new();
        let done = token.done();
        assert!(done.recv_timeout(Duration::from_millis(5)).is_err());
        assert!(!token.is_cancelled());

        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });

        crossbeam_channel::select! {
            recv(done) -> msg => assert!(msg.is_err()),
            default(Duration::from_secs(5)) => panic!("cancellation not observed"),
        }
        handle.join().unwrap();
    }
}
