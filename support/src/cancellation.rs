use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct CancellationState {
    signal: Notify,
    handlers: Mutex<Vec<Box<dyn Fn() + Send>>>,
    requested: AtomicBool,
}

/// Ambient cancellation signal threaded through every suspension point in the gateway. Cheap to
/// clone; all clones observe the same underlying state.
#[derive(Default, Clone)]
pub struct CancellationToken {
    state: Arc<CancellationState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
        self.state.handlers.lock().iter().for_each(|handler| handler());
        self.state.signal.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. Safe to poll repeatedly; resolves immediately if
    /// cancellation already happened before this call.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.state.signal.notified().await;
    }

    /// Derives a child token that is cancelled whenever `self` is cancelled, but can also be
    /// cancelled independently without affecting the parent.
    pub fn child_token(&self) -> Self {
        let child = CancellationToken::new();
        let weak = Arc::downgrade(&child.state);
        self.state.handlers.lock().push(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                CancellationToken { state }.cancel();
            }
        }));
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }
}
