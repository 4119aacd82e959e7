//! Traits for pub/sub operations
//!
//! Callers depend on these traits instead of the NATS types so that any of
//! them can be replaced by a double in tests. The traits are deliberately
//! open: [`crate::memory`] is one such double shipped with the crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::subscription_config::SubscriptionConfig;

/// Callback invoked once per delivered message
pub type MessageHandler = Arc<dyn Fn(Arc<dyn Message>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`MessageHandler`] from an async closure
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Arc<dyn Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |msg| f(msg).boxed())
}

/// A connection to the pub/sub service
#[async_trait]
pub trait Client: Send + Sync {
    /// Create a topic, failing with the server's error if it cannot be created
    async fn create_topic(&self, topic_id: &str) -> Result<Arc<dyn Topic>>;

    /// Handle to an existing topic; no request is made
    fn topic(&self, topic_id: &str) -> Arc<dyn Topic>;

    /// Create a subscription bound to `config.topic`
    async fn create_subscription(
        &self,
        id: &str,
        config: SubscriptionConfig,
    ) -> Result<Arc<dyn Subscription>>;

    /// Handle to an existing subscription; no request is made
    fn subscription(&self, id: &str) -> Arc<dyn Subscription>;

    /// List every topic
    async fn topics(&self) -> Result<Vec<Arc<dyn Topic>>>;

    /// List every subscription
    async fn subscriptions(&self) -> Result<Vec<Arc<dyn Subscription>>>;
}

/// A named publish target
#[async_trait]
pub trait Topic: fmt::Display + fmt::Debug + Send + Sync {
    /// Topic identifier
    fn id(&self) -> &str;

    /// Start publishing `msg`; the returned handle resolves to the server id
    fn publish(&self, msg: &dyn Message) -> Arc<dyn PublishResult>;

    /// Delete the topic
    async fn delete(&self) -> Result<()>;

    /// Access to the concrete adapter, used when converting a [`SubscriptionConfig`]
    fn as_any(&self) -> &dyn Any;
}

/// A named feed of messages from a topic
#[async_trait]
pub trait Subscription: fmt::Display + fmt::Debug + Send + Sync {
    /// Subscription identifier
    fn id(&self) -> &str;

    async fn exists(&self) -> Result<bool>;

    /// Deliver messages to `handler` until `shutdown` fires or delivery fails
    ///
    /// Blocks the calling task for the lifetime of the delivery loop and
    /// returns its terminal condition. Cancellation yields `Ok(())`.
    async fn receive(&self, shutdown: CancellationToken, handler: MessageHandler) -> Result<()>;

    async fn delete(&self) -> Result<()>;
}

/// A single delivered or outgoing message
pub trait Message: fmt::Debug + Send + Sync {
    /// Server-assigned id; empty for messages not yet published
    fn id(&self) -> &str;

    fn data(&self) -> &[u8];

    fn attributes(&self) -> &HashMap<String, String>;

    /// Time the server accepted the message, if it has been published
    fn publish_time(&self) -> Option<DateTime<Utc>>;
}

/// Handle to an in-flight publish
#[async_trait]
pub trait PublishResult: Send + Sync {
    /// Wait for the server id
    ///
    /// Resolves once; later calls return the same outcome without waiting.
    async fn get(&self) -> Result<String>;
}
