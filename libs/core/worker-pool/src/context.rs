//! Job context: cooperative cancellation plus an optional deadline.
//!
//! Every suspension point in job code is expected to observe the context,
//! either by polling `is_cancelled()` between steps or by racing against
//! `cancelled()` in a `select!`.

use futures::future::select_all;
use once_cell::sync::Lazy;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Sender side of a context that is never cancelled (see `JobContext::background`).
static NEVER_CANCELLED: Lazy<watch::Sender<bool>> = Lazy::new(|| watch::channel(false).0);

/// Handle used to cancel a `JobContext`.
///
/// Dropping the handle also cancels the context, so holding it for the
/// lifetime of the job is part of the contract (store it in a cancel map,
/// cancel-and-remove on cleanup).
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every clone of the associated context.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

/// Cloneable cancellation token with an optional deadline.
///
/// Contexts form a chain: a `child()` context is cancelled when either its
/// own handle fires or any ancestor is cancelled. The deadline is inherited
/// and can only tighten.
#[derive(Clone)]
pub struct JobContext {
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
    parent: Option<Box<JobContext>>,
}

impl JobContext {
    /// New root context without a deadline.
    pub fn new() -> (CancelHandle, Self) {
        Self::build(None, None)
    }

    /// New root context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> (CancelHandle, Self) {
        Self::build(Some(Instant::now() + timeout), None)
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: NEVER_CANCELLED.subscribe(),
            deadline: None,
            parent: None,
        }
    }

    /// Derive a linked child: cancelled with the parent, cancellable on its own.
    pub fn child(&self) -> (CancelHandle, Self) {
        Self::build(self.deadline, Some(Box::new(self.clone())))
    }

    fn build(deadline: Option<Instant>, parent: Option<Box<JobContext>>) -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Self {
                cancel: rx,
                deadline,
                parent,
            },
        )
    }

    /// Instant after which the context counts as cancelled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Non-blocking check across the whole context chain.
    pub fn is_cancelled(&self) -> bool {
        if self.deadline_exceeded() {
            return true;
        }
        let mut cur = Some(self);
        while let Some(ctx) = cur {
            // A closed channel means the handle was dropped, which cancels.
            if *ctx.cancel.borrow() || ctx.cancel.has_changed().is_err() {
                return true;
            }
            cur = ctx.parent.as_deref();
        }
        false
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        let mut receivers = Vec::new();
        let mut cur = Some(self);
        while let Some(ctx) = cur {
            receivers.push(ctx.cancel.clone());
            cur = ctx.parent.as_deref();
        }

        let waits: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> = receivers
            .into_iter()
            .map(|mut rx| {
                Box::pin(async move {
                    // Err means the sender dropped: treated as cancellation.
                    let _ = rx.wait_for(|cancelled| *cancelled).await;
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            })
            .collect();
        let any_cancelled = select_all(waits);

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = any_cancelled => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => {
                any_cancelled.await;
            }
        }
    }
}
