use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// External handle on a running instance: cancel, suspend, resume.
///
/// The scheduler only looks at it between token advancements, so a handler
/// that is already running always finishes its attempt.
#[derive(Clone)]
pub struct ExecutionControl {
    cancel: CancellationToken,
    suspended: Arc<watch::Sender<bool>>,
}

/// How a suspension ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Resumed,
    Cancelled,
}

impl ExecutionControl {
    pub fn new() -> Self {
        let (suspended, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            suspended: Arc::new(suspended),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn suspend(&self) {
        self.suspended.send_replace(true);
    }

    pub fn resume(&self) {
        self.suspended.send_replace(false);
    }

    pub fn is_suspend_requested(&self) -> bool {
        *self.suspended.borrow()
    }

    /// Wait until resumed or cancelled
    pub async fn wait_for_resume(&self) -> Wake {
        let mut rx = self.suspended.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return Wake::Cancelled;
            }
            if !*rx.borrow_and_update() {
                return Wake::Resumed;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Wake::Cancelled,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Wake::Cancelled;
                    }
                }
            }
        }
    }
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}
