use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::ApiError;

/// Cancellation handle for in-flight requests and uploads.
/// Clones share state; cancelling any clone cancels all of them.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Drive `operation` until it finishes or the token is cancelled.
    /// On cancel the operation is dropped at its current suspension point.
    pub async fn run<F, T>(&self, operation: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ApiError::Cancelled),
            result = operation => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let result = token.run(async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_operation() {
        let token = CancelToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ApiError>(())
            })
            .await;

        assert!(matches!(result, Err(ApiError::Cancelled)));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_starts() {
        let token = CancelToken::new();
        token.cancel();
        let result = token.run(async { Ok::<_, ApiError>(1) }).await;
        assert!(matches!(result, Err(ApiError::Cancelled)));
    }
}
