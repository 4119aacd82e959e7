//! In-memory implementation of the pub/sub traits
//!
//! Intended for unit tests of code written against [`Client`]: everything
//! happens in-process and delivery is deterministic. Publishing resolves
//! immediately, each subscription keeps its own queue of undelivered
//! messages, and a handler that returns counts as an acknowledgement.
//! Subscriptions are identified as `<topic>/<name>` and are deleted along
//! with their topic, as on NATS.
//!
//! Not emulated: ack deadlines, redelivery, ordering keys, persistence.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PubSubError, Result};
use crate::list::{drain_with, ListPolicy};
use crate::message::OwnedMessage;
use crate::publish::PublishHandle;
use crate::subscription_config::{check_name, qualify, split_id, SubscriptionConfig};
use crate::traits::{Client, Message, MessageHandler, PublishResult, Subscription, Topic};

#[derive(Default)]
struct State {
    topics: BTreeSet<String>,
    subscriptions: BTreeMap<String, SubscriptionState>,
    next_sequence: u64,
    list_failure: Option<(usize, fn() -> PubSubError)>,
    closed: bool,
}

struct SubscriptionState {
    topic_id: String,
    pending: VecDeque<OwnedMessage>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changed: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against open state, failing once the client is closed
    fn open<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state();
        if state.closed {
            return Err(PubSubError::Closed);
        }
        f(&mut state)
    }

    /// Listing of `names`, cut short by an injected failure if one is set
    fn listing(&self, names: Vec<String>) -> Vec<Result<String>> {
        let failure = self.state().list_failure;

        let mut items: Vec<Result<String>> = names.into_iter().map(Ok).collect();
        if let Some((after, make_error)) = failure {
            if after < items.len() {
                items.truncate(after);
                items.push(Err(make_error()));
            }
        }
        items
    }
}

/// In-process pub/sub client
#[derive(Clone, Default)]
pub struct MemoryClient {
    inner: Arc<Inner>,
    list_policy: ListPolicy,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_policy(mut self, list_policy: ListPolicy) -> Self {
        self.list_policy = list_policy;
        self
    }

    /// Make every later listing fail after yielding `after` items
    pub fn fail_listings_after(&self, after: usize, make_error: fn() -> PubSubError) {
        self.inner.state().list_failure = Some((after, make_error));
    }

    /// Close the client; every later call fails and running receives end
    pub fn close(&self) {
        self.inner.state().closed = true;
        self.inner.changed.notify_waiters();
    }

    /// Messages waiting for delivery on subscription `id` (`<topic>/<name>`)
    pub fn pending(&self, id: &str) -> usize {
        self.inner
            .state()
            .subscriptions
            .get(id)
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }

    fn topic_handle(&self, topic_id: &str) -> MemoryTopic {
        MemoryTopic {
            id: topic_id.to_string(),
            inner: self.inner.clone(),
        }
    }

    fn subscription_handle(&self, id: &str) -> MemorySubscription {
        MemorySubscription {
            id: id.to_string(),
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClient")
            .field("list_policy", &self.list_policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn create_topic(&self, topic_id: &str) -> Result<Arc<dyn Topic>> {
        self.inner.open(|state| {
            if !state.topics.insert(topic_id.to_string()) {
                return Err(PubSubError::AlreadyExists(topic_id.to_string()));
            }
            Ok(())
        })?;

        debug!(topic = topic_id, "Topic created");
        Ok(Arc::new(self.topic_handle(topic_id)))
    }

    fn topic(&self, topic_id: &str) -> Arc<dyn Topic> {
        Arc::new(self.topic_handle(topic_id))
    }

    async fn create_subscription(
        &self,
        id: &str,
        config: SubscriptionConfig,
    ) -> Result<Arc<dyn Subscription>> {
        check_name(id)?;
        let topic = config.topic_as::<MemoryTopic>()?;
        let qualified = qualify(&topic.id, id);

        self.inner.open(|state| {
            if !state.topics.contains(&topic.id) {
                return Err(PubSubError::NotFound(topic.id.clone()));
            }
            if state.subscriptions.contains_key(&qualified) {
                return Err(PubSubError::AlreadyExists(qualified.clone()));
            }
            state.subscriptions.insert(
                qualified.clone(),
                SubscriptionState {
                    topic_id: topic.id.clone(),
                    pending: VecDeque::new(),
                },
            );
            Ok(())
        })?;

        debug!(subscription = %qualified, "Subscription created");
        Ok(Arc::new(self.subscription_handle(&qualified)))
    }

    fn subscription(&self, id: &str) -> Arc<dyn Subscription> {
        Arc::new(self.subscription_handle(id))
    }

    async fn topics(&self) -> Result<Vec<Arc<dyn Topic>>> {
        let names = self
            .inner
            .open(|state| Ok(state.topics.iter().cloned().collect()))?;
        let names = drain_with(self.list_policy, stream::iter(self.inner.listing(names))).await?;

        Ok(names
            .iter()
            .map(|name| Arc::new(self.topic_handle(name)) as Arc<dyn Topic>)
            .collect())
    }

    async fn subscriptions(&self) -> Result<Vec<Arc<dyn Subscription>>> {
        let ids = self
            .inner
            .open(|state| Ok(state.subscriptions.keys().cloned().collect()))?;
        let ids = drain_with(self.list_policy, stream::iter(self.inner.listing(ids))).await?;

        Ok(ids
            .iter()
            .map(|id| Arc::new(self.subscription_handle(id)) as Arc<dyn Subscription>)
            .collect())
    }
}

/// Topic handle of a [`MemoryClient`]
#[derive(Clone)]
pub struct MemoryTopic {
    id: String,
    inner: Arc<Inner>,
}

impl fmt::Display for MemoryTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for MemoryTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTopic").field("id", &self.id).finish()
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn id(&self) -> &str {
        &self.id
    }

    fn publish(&self, msg: &dyn Message) -> Arc<dyn PublishResult> {
        let outcome = self.inner.open(|state| {
            if !state.topics.contains(&self.id) {
                return Err(PubSubError::NotFound(self.id.clone()));
            }

            state.next_sequence += 1;
            let mut stored = OwnedMessage::snapshot(msg);
            stored.id = state.next_sequence.to_string();
            stored.publish_time = Some(Utc::now());

            for subscription in state.subscriptions.values_mut() {
                if subscription.topic_id == self.id {
                    subscription.pending.push_back(stored.clone());
                }
            }
            Ok(stored.id)
        });

        if let Ok(id) = &outcome {
            debug!(topic = %self.id, message_id = %id, "Message published");
            self.inner.changed.notify_waiters();
        }
        Arc::new(PublishHandle::ready(outcome))
    }

    async fn delete(&self) -> Result<()> {
        let dropped = self.inner.open(|state| {
            if !state.topics.remove(&self.id) {
                return Err(PubSubError::NotFound(self.id.clone()));
            }
            let before = state.subscriptions.len();
            state
                .subscriptions
                .retain(|_, subscription| subscription.topic_id != self.id);
            Ok(before - state.subscriptions.len())
        })?;

        debug!(topic = %self.id, subscriptions = dropped, "Topic deleted");
        if dropped > 0 {
            self.inner.changed.notify_waiters();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Subscription handle of a [`MemoryClient`]
#[derive(Clone)]
pub struct MemorySubscription {
    id: String,
    inner: Arc<Inner>,
}

impl MemorySubscription {
    fn next_pending(&self) -> Result<Option<OwnedMessage>> {
        split_id(&self.id)?;
        self.inner.open(|state| match state.subscriptions.get_mut(&self.id) {
            Some(subscription) => Ok(subscription.pending.pop_front()),
            None => Err(PubSubError::NotFound(self.id.clone())),
        })
    }
}

impl fmt::Display for MemorySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for MemorySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubscription")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exists(&self) -> Result<bool> {
        split_id(&self.id)?;
        self.inner
            .open(|state| Ok(state.subscriptions.contains_key(&self.id)))
    }

    async fn receive(&self, shutdown: CancellationToken, handler: MessageHandler) -> Result<()> {
        loop {
            // Register for wakeups before looking at the queue so a publish
            // in between is not missed.
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if shutdown.is_cancelled() {
                return Ok(());
            }

            match self.next_pending()? {
                Some(message) => {
                    debug!(subscription = %self.id, message_id = %message.id, "Delivering message");
                    handler(Arc::new(message)).await;
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = &mut changed => {}
                    }
                }
            }
        }
    }

    async fn delete(&self) -> Result<()> {
        split_id(&self.id)?;
        self.inner.open(|state| match state.subscriptions.remove(&self.id) {
            Some(_) => Ok(()),
            None => Err(PubSubError::NotFound(self.id.clone())),
        })?;

        debug!(subscription = %self.id, "Subscription deleted");
        self.inner.changed.notify_waiters();
        Ok(())
    }
}
