use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;

type Slot<T> = Option<Result<T, CallError>>;

/// A single-assignment result cell shared between the router and the caller.
///
/// The first `resolve` or `reject` wins; every later attempt is ignored.
/// Clones share the same cell, so the registry and the call handle can both
/// hold one. Waiters observe the cancellation token the cell was created with:
/// if it fires while the cell is still pending, the cell rejects itself with
/// [`CallError::Cancelled`].
pub struct Deferred<T> {
    state: Arc<watch::Sender<Slot<T>>>,
    token: CancellationToken,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            token: self.token.clone(),
        }
    }
}

impl<T: Clone> Deferred<T> {
    pub fn new(token: CancellationToken) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
            token,
        }
    }

    /// Returns `true` if this call settled the cell.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Returns `true` if this call settled the cell.
    pub fn reject(&self, error: CallError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T, CallError>) -> bool {
        self.reject_if_cancelled();
        self.state.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    // A fired token settles a pending cell even when nobody is waiting.
    fn reject_if_cancelled(&self) {
        if !self.token.is_cancelled() {
            return;
        }
        self.state.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(Err(CallError::Cancelled));
            true
        });
    }

    pub fn is_settled(&self) -> bool {
        self.reject_if_cancelled();
        self.state.borrow().is_some()
    }

    /// The outcome, if the cell has settled.
    pub fn try_get(&self) -> Option<Result<T, CallError>> {
        self.reject_if_cancelled();
        self.state.borrow().clone()
    }

    /// Wait until the cell settles and return its outcome.
    pub async fn wait(&self) -> Result<T, CallError> {
        let mut rx = self.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }

            tokio::select! {
                changed = rx.changed() => {
                    // The sender lives in `self`, so this cannot close while we wait.
                    if changed.is_err() {
                        return Err(CallError::Cancelled);
                    }
                }
                _ = self.token.cancelled() => {
                    self.reject(CallError::Cancelled);
                }
            }
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::metadata::Metadata;
    use std::time::Duration;

    fn unavailable() -> CallError {
        TransportError::new("unavailable", 14, Metadata::new()).into()
    }

    #[tokio::test]
    async fn test_resolve_then_wait() {
        let cell = Deferred::new(CancellationToken::new());
        assert!(cell.resolve(7u32));
        assert_eq!(cell.wait().await, Ok(7));
        // every waiter sees the same value
        assert_eq!(cell.wait().await, Ok(7));
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cell = Deferred::new(CancellationToken::new());
        assert!(cell.resolve(1u32));
        assert!(!cell.resolve(2));
        assert!(!cell.reject(unavailable()));
        assert_eq!(cell.wait().await, Ok(1));

        let cell = Deferred::<u32>::new(CancellationToken::new());
        assert!(cell.reject(unavailable()));
        assert!(!cell.resolve(3));
        assert_eq!(cell.wait().await, Err(unavailable()));
    }

    #[tokio::test]
    async fn test_wait_suspends_until_resolved() {
        let cell = Deferred::new(CancellationToken::new());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        cell.resolve("done".to_string());
        assert_eq!(waiter.await.unwrap(), Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_token_rejects_pending_waiter() {
        let token = CancellationToken::new();
        let cell = Deferred::<u32>::new(token.clone());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };

        token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(CallError::Cancelled));
        assert!(cell.is_settled());
        // a late resolution does not overwrite the cancellation
        assert!(!cell.resolve(5));
    }

    #[tokio::test]
    async fn test_token_without_waiter_rejects() {
        let token = CancellationToken::new();
        let cell = Deferred::<u32>::new(token.clone());
        token.cancel();

        assert!(cell.is_settled());
        assert_eq!(cell.try_get(), Some(Err(CallError::Cancelled)));
        assert!(!cell.resolve(5));
        assert_eq!(cell.wait().await, Err(CallError::Cancelled));

        // resolving first, with no observer in between, still loses
        let token = CancellationToken::new();
        let cell = Deferred::<u32>::new(token.clone());
        token.cancel();
        assert!(!cell.resolve(6));
        assert_eq!(cell.try_get(), Some(Err(CallError::Cancelled)));
    }

    #[tokio::test]
    async fn test_token_after_settle_keeps_value() {
        let token = CancellationToken::new();
        let cell = Deferred::new(token.clone());
        cell.resolve(9u32);
        token.cancel();
        assert_eq!(cell.wait().await, Ok(9));
    }

    #[test]
    fn test_try_get() {
        let cell = Deferred::<u32>::new(CancellationToken::new());
        assert_eq!(cell.try_get(), None);
        cell.resolve(4);
        assert_eq!(cell.try_get(), Some(Ok(4)));
    }
}
