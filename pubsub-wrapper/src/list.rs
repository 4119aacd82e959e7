//! Draining listing streams into vectors

use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt::Display;
use tracing::warn;

pub use pubsub_config::ListPolicy;

use crate::error::{PubSubError, Result};

/// Collect every item, returning the first error
pub async fn drain<S, T, E>(items: S) -> std::result::Result<Vec<T>, E>
where
    S: Stream<Item = std::result::Result<T, E>>,
{
    items.try_collect().await
}

/// Collect items up to the first error, which is logged and dropped
pub async fn drain_lenient<S, T, E>(items: S) -> Vec<T>
where
    S: Stream<Item = std::result::Result<T, E>>,
    E: Display,
{
    futures::pin_mut!(items);

    let mut collected = Vec::new();
    while let Some(item) = items.next().await {
        match item {
            Ok(item) => collected.push(item),
            Err(e) => {
                warn!(
                    error = %e,
                    collected = collected.len(),
                    "Listing stopped early, returning partial result"
                );
                break;
            }
        }
    }
    collected
}

/// Drain according to `policy`, mapping errors into [`PubSubError`]
pub async fn drain_with<S, T, E>(policy: ListPolicy, items: S) -> Result<Vec<T>>
where
    S: Stream<Item = std::result::Result<T, E>>,
    E: Into<PubSubError> + Display,
{
    match policy {
        ListPolicy::Strict => drain(items).await.map_err(Into::into),
        ListPolicy::Lenient => Ok(drain_lenient(items).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    type Item = std::result::Result<u32, &'static str>;

    fn listing(items: Vec<Item>) -> impl Stream<Item = Item> {
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_complete_listing_returns_every_item() {
        let items = vec![Ok(1), Ok(2), Ok(3)];

        assert_eq!(drain(listing(items.clone())).await, Ok(vec![1, 2, 3]));
        assert_eq!(drain_lenient(listing(items)).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_listing() {
        assert_eq!(drain(listing(vec![])).await, Ok(vec![]));
        assert!(drain_lenient(listing(vec![])).await.is_empty());
    }

    #[tokio::test]
    async fn test_lenient_truncates_at_first_error() {
        let items = vec![Ok(1), Ok(2), Err("connection reset"), Ok(4)];

        assert_eq!(drain_lenient(listing(items)).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_strict_propagates_mid_listing_error() {
        let items = vec![Ok(1), Err("connection reset"), Ok(3)];

        assert_eq!(drain(listing(items)).await, Err("connection reset"));
    }

    #[tokio::test]
    async fn test_drain_with_policy() {
        let failing = || {
            stream::iter(vec![
                Ok("a".to_string()),
                Err(PubSubError::NotFound("stream".to_string())),
            ])
        };

        let lenient = drain_with(ListPolicy::Lenient, failing()).await.unwrap();
        assert_eq!(lenient, vec!["a".to_string()]);

        let strict = drain_with(ListPolicy::Strict, failing()).await;
        assert!(matches!(strict, Err(PubSubError::NotFound(_))));
    }
}
