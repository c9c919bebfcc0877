//! Bridges [`CancellationToken`] into condvar-based blocking waits

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Wake, Waker};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

struct WakeOnCancel<F>(F);

impl<F: Fn() + Send + Sync + 'static> Wake for WakeOnCancel<F> {
    fn wake(self: Arc<Self>) {
        (self.0)()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        (self.0)()
    }
}

/// Keeps `wake` subscribed to a token; dropping it unsubscribes
pub(crate) struct CancelRegistration {
    _cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

/// Run `wake` once `token` is cancelled, for as long as the returned
/// registration lives.
///
/// Register before checking `is_cancelled` under the waiter's lock, so a
/// cancel racing with the wait is never lost. `wake` may also run
/// spuriously; waiters re-check their condition anyway.
pub(crate) fn on_cancel<F>(token: &CancellationToken, wake: F) -> CancelRegistration
where
    F: Fn() + Send + Sync + 'static,
{
    let waker = Waker::from(Arc::new(WakeOnCancel(wake)));
    let mut cancelled = Box::pin(token.clone().cancelled_owned());

    // Polling once parks our waker in the token; an already cancelled
    // token completes here and the caller sees it on its own check.
    let _ = cancelled.as_mut().poll(&mut Context::from_waker(&waker));

    CancelRegistration {
        _cancelled: cancelled,
    }
}
