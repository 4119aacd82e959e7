//! Publish result handles

use async_trait::async_trait;
use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{PubSubError, Result};
use crate::traits::PublishResult;

type Outcome = std::result::Result<String, Arc<PubSubError>>;

/// [`PublishResult`] backed by a shared future
///
/// The publish future is spawned on the current Tokio runtime when there is
/// one, so the message goes out even if nobody waits for the result. Outside
/// a runtime it runs on the first call to [`PublishResult::get`].
#[derive(Clone)]
pub struct PublishHandle {
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

impl PublishHandle {
    pub fn spawn<F>(publish: F) -> Self
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        let outcome = publish.map(|r| r.map_err(Arc::new)).boxed().shared();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(outcome.clone());
        }

        Self { outcome }
    }

    /// A handle that has already resolved
    pub fn ready(outcome: Result<String>) -> Self {
        Self {
            outcome: future::ready(outcome.map_err(Arc::new)).boxed().shared(),
        }
    }
}

impl fmt::Debug for PublishHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishHandle")
            .field("resolved", &self.outcome.peek().is_some())
            .finish()
    }
}

#[async_trait]
impl PublishResult for PublishHandle {
    async fn get(&self) -> Result<String> {
        self.outcome
            .clone()
            .await
            .map_err(|e| PubSubError::Publish(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_after_completion_returns_same_id() {
        let handle = PublishHandle::spawn(async { Ok("17".to_string()) });

        assert_eq!(handle.get().await.unwrap(), "17");
        assert_eq!(handle.get().await.unwrap(), "17");
    }

    #[tokio::test]
    async fn test_publish_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = PublishHandle::spawn(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("1".to_string())
        });

        let (a, b) = tokio::join!(handle.get(), handle.get());
        assert_eq!(a.unwrap(), "1");
        assert_eq!(b.unwrap(), "1");
        assert_eq!(handle.get().await.unwrap(), "1");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_publish_completes_without_get() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let _handle = PublishHandle::spawn(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            Ok("9".to_string())
        });

        done_rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_outside_runtime_resolves_on_get() {
        let handle = PublishHandle::spawn(async { Ok("3".to_string()) });

        assert_eq!(tokio_test::block_on(handle.get()).unwrap(), "3");
    }

    #[tokio::test]
    async fn test_failure_is_reported_on_every_get() {
        let handle = PublishHandle::ready(Err(PubSubError::NotFound("orders".to_string())));

        for _ in 0..2 {
            let err = handle.get().await.unwrap_err();
            assert!(matches!(err, PubSubError::Publish(_)));
            assert_eq!(err.to_string(), "Not found: orders");
        }
    }
}
