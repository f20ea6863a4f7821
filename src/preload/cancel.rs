use futures::future::poll_fn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Waker>>,
}

/// Cancellation flag shared between a caller and a session
///
/// A session stops issuing loads as soon as the token fires and stops
/// waiting on the ones already started; those run to completion in the
/// background.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<TokenState>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token and wake everything waiting on it
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let waiters = std::mem::take(&mut *self.0.waiters.lock());
        for waker in waiters {
            waker.wake();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token has fired
    pub async fn cancelled(&self) {
        poll_fn(|cx| self.poll_cancelled(cx)).await
    }

    /// Register `cx` for wake-up and report whether the token has fired
    pub fn poll_cancelled(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_cancelled() {
            return Poll::Ready(());
        }
        {
            let mut waiters = self.0.waiters.lock();
            if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
                waiters.push(cx.waker().clone());
            }
        }
        // `cancel` may have drained the list before the push
        if self.is_cancelled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Resolves once any of `tokens` has fired; never resolves for an empty slice
pub(crate) async fn any_cancelled(tokens: &[CancellationToken]) {
    poll_fn(|cx| {
        let mut fired = false;
        for token in tokens {
            fired |= token.poll_cancelled(cx).is_ready();
        }
        if fired {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::time::Duration;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancelled_wakes_waiter_on_other_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        block_on(token.cancelled());
        assert!(token.is_cancelled());
        handle.join().unwrap();
    }

    #[test]
    fn test_any_cancelled_fires_on_second_token() {
        let tokens = vec![CancellationToken::new(), CancellationToken::new()];
        let second = tokens[1].clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            second.cancel();
        });
        block_on(any_cancelled(&tokens));
        assert!(!tokens[0].is_cancelled());
        handle.join().unwrap();
    }
}
