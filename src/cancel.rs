//! Cooperative cancellation shared by every stage of a run.
//!
//! A [`CancellationToken`] carries a done-signal that can take part in the
//! same `crossbeam::select!` as conduit reads and writes, so every blocking
//! point in the engine waits on "value or cancellation" at once. Cancelling
//! drops the token's internal sender; the receiver returned by
//! [`CancellationToken::cancelled`] then becomes permanently ready.

use crate::error::{PipelineError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Why a token fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel` was called on the token or one of its ancestors
    Cancelled,
    /// The deadline carried by the token passed
    DeadlineExceeded,
}

struct Inner {
    reason: OnceLock<CancelReason>,
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
    deadline: Option<Instant>,
    fail_fast: bool,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(deadline: Option<Instant>, fail_fast: bool) -> Arc<Self> {
        let (trigger, done) = channel::bounded(0);
        Arc::new(Self {
            reason: OnceLock::new(),
            trigger: Mutex::new(Some(trigger)),
            done,
            deadline,
            fail_fast,
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel_with(&self, reason: CancelReason) {
        if self.reason.set(reason).is_err() {
            return;
        }
        // Dropping the only sender disconnects `done` for every waiter.
        self.trigger.lock().take();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel_with(reason);
        }
    }
}

/// A cloneable cancellation signal with an optional deadline
///
/// Clones share the same state. Child tokens fire when their parent fires,
/// but cancelling a child leaves the parent untouched.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a token without a deadline
    pub fn new() -> Self {
        Self {
            inner: Inner::new(None, false),
        }
    }

    /// Create a token that fires on its own at `deadline`
    pub fn with_deadline(deadline: Instant) -> Result<Self> {
        let inner = Inner::new(Some(deadline), false);
        let watched = Arc::downgrade(&inner);
        let done = inner.done.clone();

        thread::Builder::new()
            .name("pipeline-deadline".into())
            .spawn(move || {
                select! {
                    recv(done) -> _ => {}
                    recv(channel::at(deadline)) -> _ => {
                        if let Some(inner) = watched.upgrade() {
                            debug!("deadline reached, cancelling");
                            inner.cancel_with(CancelReason::DeadlineExceeded);
                        }
                    }
                }
            })
            .map_err(PipelineError::Spawn)?;

        Ok(Self { inner })
    }

    /// Create a token that fires on its own after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Derive a token that fires with this one and can also be cancelled alone
    pub fn child_token(&self) -> Self {
        self.derive(false)
    }

    /// Derive a child token that [`fail`](Self::fail) also cancels
    ///
    /// A [`Pipeline`](crate::Pipeline) runs its stages under such a token, so
    /// a failing stage stops its siblings before its own outputs close.
    pub fn failure_scope(&self) -> Self {
        self.derive(true)
    }

    fn derive(&self, fail_fast: bool) -> Self {
        let child = Inner::new(self.inner.deadline, fail_fast);
        let mut children = self.inner.children.lock();
        match self.inner.reason.get() {
            Some(reason) => {
                drop(children);
                child.cancel_with(*reason);
            }
            None => {
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&child));
            }
        }
        Self { inner: child }
    }

    /// Fire the token, waking every blocked waiter
    pub fn cancel(&self) {
        self.inner.cancel_with(CancelReason::Cancelled);
    }

    /// Report that work running under this token failed
    ///
    /// Cancels the token if it came from
    /// [`failure_scope`](Self::failure_scope); otherwise does nothing.
    pub fn fail(&self) {
        if self.inner.fail_fast {
            debug!("failure reported, cancelling scope");
            self.inner.cancel_with(CancelReason::Cancelled);
        }
    }

    /// Whether [`fail`](Self::fail) cancels this token
    pub fn is_failure_scope(&self) -> bool {
        self.inner.fail_fast
    }

    /// Non-blocking check
    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    /// Why the token fired, if it has
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.get().copied()
    }

    /// The deadline this token carries
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Done-signal for use in `select!`; ready once the token has fired
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.inner.done
    }

    /// Block until the token fires
    pub fn wait(&self) {
        let _ = self.inner.done.recv();
    }

    /// The outcome a cancelled operation reports
    pub fn error(&self) -> PipelineError {
        match self.reason() {
            Some(CancelReason::DeadlineExceeded) => PipelineError::DeadlineExceeded,
            _ => PipelineError::Cancelled,
        }
    }

    /// Return the cancellation outcome if the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
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
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
