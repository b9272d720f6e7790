//! Ambient storage for the active request context manager.
//!
//! The current manager lives in a thread-local slot. Synchronous code sees it
//! for as long as it stays on the thread that entered the request. Async
//! request futures are wrapped in [`RequestScoped`], which carries the
//! request's own slot value and swaps it in around every poll, so tasks that
//! interleave on one worker thread or migrate between threads never observe
//! each other's manager.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::context::RequestContextManager;

thread_local! {
    static CURRENT: RefCell<Option<Arc<RequestContextManager>>> = const { RefCell::new(None) };
}

/// Previous slot value, handed back to [`reset`].
#[must_use = "the token restores the previous ambient manager"]
#[derive(Debug)]
pub struct AmbientToken {
    previous: Option<Arc<RequestContextManager>>,
}

/// Installs `manager` as the current one, returning a token for the old value.
pub fn set(manager: Arc<RequestContextManager>) -> AmbientToken {
    AmbientToken {
        previous: replace(Some(manager)),
    }
}

/// Restores the slot to what it held before the matching [`set`].
pub fn reset(token: AmbientToken) {
    replace(token.previous);
}

/// Swaps the slot's content, returning the old value.
pub fn replace(value: Option<Arc<RequestContextManager>>) -> Option<Arc<RequestContextManager>> {
    CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), value))
}

/// The manager of the request executing on this thread, if any.
pub fn current() -> Option<Arc<RequestContextManager>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Runs `f` with an empty slot, restoring the caller's value afterwards.
pub fn isolated<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Option<Arc<RequestContextManager>>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(outer) = self.0.take() {
                replace(outer);
            }
        }
    }

    let _restore = Restore(Some(replace(None)));
    f()
}

/// Wraps `future` so it runs with its own ambient slot.
pub fn scope<F: Future>(future: F) -> RequestScoped<F> {
    RequestScoped {
        slot: None,
        future: Some(Box::pin(future)),
    }
}

/// A future that owns an ambient slot value.
///
/// Created with [`scope`]. Whatever the inner future installs with [`set`] is
/// saved when it yields and reinstalled when it is polled again; the
/// surrounding thread's value is restored in between. Dropping it before
/// completion drops the inner future with the saved value installed, so drop
/// guards inside it tear down against their own slot.
pub struct RequestScoped<F> {
    slot: Option<Arc<RequestContextManager>>,
    future: Option<Pin<Box<F>>>,
}

impl<F: Future> Future for RequestScoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        struct SwapBack<'a> {
            slot: &'a mut Option<Arc<RequestContextManager>>,
            outer: Option<Option<Arc<RequestContextManager>>>,
        }

        // Also runs when the inner poll panics.
        impl Drop for SwapBack<'_> {
            fn drop(&mut self) {
                if let Some(outer) = self.outer.take() {
                    *self.slot = replace(outer);
                }
            }
        }

        let this = self.get_mut();
        let Some(future) = this.future.as_mut() else {
            return Poll::Pending;
        };
        let outer = replace(this.slot.take());
        let _swap = SwapBack {
            slot: &mut this.slot,
            outer: Some(outer),
        };
        future.as_mut().poll(cx)
    }
}

impl<F> Drop for RequestScoped<F> {
    fn drop(&mut self) {
        let Some(future) = self.future.take() else {
            return;
        };
        let outer = replace(self.slot.take());
        drop(future);
        replace(outer);
    }
}

impl<F> std::fmt::Debug for RequestScoped<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScoped")
            .field("active", &self.slot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<RequestContextManager> {
        Arc::new(RequestContextManager::new())
    }

    #[test]
    fn test_set_and_reset() {
        isolated(|| {
            assert!(current().is_none());

            let outer = manager();
            let outer_token = set(Arc::clone(&outer));
            let inner = manager();
            let inner_token = set(Arc::clone(&inner));

            assert!(Arc::ptr_eq(&current().unwrap(), &inner));
            reset(inner_token);
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
            reset(outer_token);
            assert!(current().is_none());
        });
    }

    #[test]
    fn test_threads_are_isolated() {
        let (tx, rx) = std::sync::mpsc::channel();
        let first = manager();
        let token = set(Arc::clone(&first));

        std::thread::spawn(move || {
            tx.send(current().is_none()).unwrap();
        })
        .join()
        .unwrap();

        assert!(rx.recv().unwrap());
        assert!(Arc::ptr_eq(&current().unwrap(), &first));
        reset(token);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_interleaved_tasks_keep_their_own_manager() {
        let a = manager();
        let b = manager();

        let run = |mine: Arc<RequestContextManager>| {
            scope(async move {
                let token = set(Arc::clone(&mine));
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                    assert!(Arc::ptr_eq(&current().unwrap(), &mine));
                }
                reset(token);
                current().is_none()
            })
        };

        let (left, right) = tokio::join!(run(Arc::clone(&a)), run(Arc::clone(&b)));
        assert!(left && right);
        assert!(current().is_none());
    }

    #[test]
    fn test_dropped_future_restores_outer_slot() {
        struct ResetOnDrop(Option<AmbientToken>, Arc<RequestContextManager>);

        impl Drop for ResetOnDrop {
            fn drop(&mut self) {
                // Runs with the scoped value installed.
                assert!(Arc::ptr_eq(&current().unwrap(), &self.1));
                if let Some(token) = self.0.take() {
                    reset(token);
                }
            }
        }

        isolated(|| {
            let outer = manager();
            let outer_token = set(Arc::clone(&outer));

            let mine = manager();
            let mut scoped = Box::pin(scope({
                let mine = Arc::clone(&mine);
                async move {
                    let _guard = ResetOnDrop(Some(set(Arc::clone(&mine))), mine);
                    std::future::pending::<()>().await;
                }
            }));

            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            assert!(scoped.as_mut().poll(&mut cx).is_pending());
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));

            drop(scoped);
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
            reset(outer_token);
        });
    }

    fn noop_waker() -> std::task::Waker {
        struct Noop;

        impl std::task::Wake for Noop {
            fn wake(self: Arc<Self>) {}
        }

        std::task::Waker::from(Arc::new(Noop))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_tasks_do_not_leak() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                tokio::spawn(scope(async {
                    let mine = manager();
                    let token = set(Arc::clone(&mine));
                    tokio::task::yield_now().await;
                    let same = Arc::ptr_eq(&current().unwrap(), &mine);
                    reset(token);
                    same
                }))
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        // Worker threads hold nothing once the scoped futures yield or finish.
        let leaked = tokio::spawn(async { current().is_some() }).await.unwrap();
        assert!(!leaked);
    }
}
