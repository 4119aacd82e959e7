//! NATS JetStream adapters for the pub/sub traits
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A topic is a JetStream stream capturing the single subject
//! `<subject_prefix>.<topic>`. A subscription is a durable pull consumer on
//! that stream, identified as `<topic>/<name>`.

use async_nats::jetstream::{
    self, consumer::PullConsumer, context::GetStreamErrorKind, Context, ErrorCode,
};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use pubsub_config::BusConfig;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{PubSubError, Result};
use crate::list::{drain_with, ListPolicy};
use crate::publish::PublishHandle;
use crate::subscription_config::{check_name, qualify, split_id, SubscriptionConfig};
use crate::traits::{Client, Message, MessageHandler, PublishResult, Subscription, Topic};

/// Behaviour knobs for [`NatsClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub subject_prefix: String,
    pub list_policy: ListPolicy,
    pub max_concurrent_handlers: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&BusConfig::default())
    }
}

impl From<&BusConfig> for ClientOptions {
    fn from(config: &BusConfig) -> Self {
        Self {
            subject_prefix: config.subject_prefix.clone(),
            list_policy: config.list_policy,
            max_concurrent_handlers: config.max_concurrent_handlers.max(1),
        }
    }
}

/// Wrap a JetStream context as a [`Client`] with default options
pub fn adapt_client(jetstream: Context) -> NatsClient {
    NatsClient::new(jetstream, ClientOptions::default())
}

/// Wrap a delivered JetStream message as a [`Message`]
pub fn adapt_message(message: &jetstream::Message) -> Arc<dyn Message> {
    Arc::new(NatsMessage::from_jetstream(message))
}

/// NATS JetStream pub/sub client
#[derive(Clone)]
pub struct NatsClient {
    jetstream: Context,
    options: Arc<ClientOptions>,
}

impl NatsClient {
    pub fn new(jetstream: Context, options: ClientOptions) -> Self {
        Self {
            jetstream,
            options: Arc::new(options),
        }
    }

    /// Connect to the server named in `config`
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS server");

        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(PubSubError::nats)?;

        info!(
            subject_prefix = %config.subject_prefix,
            list_policy = ?config.list_policy,
            "NATS client initialized"
        );

        Ok(Self::new(jetstream::new(client), ClientOptions::from(config)))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn topic_handle(&self, topic_id: &str) -> NatsTopic {
        NatsTopic::new(self.jetstream.clone(), topic_id, &self.options.subject_prefix)
    }

    fn subscription_handle(&self, id: String) -> NatsSubscription {
        NatsSubscription {
            jetstream: self.jetstream.clone(),
            id,
            max_concurrent_handlers: self.options.max_concurrent_handlers,
        }
    }
}

impl fmt::Debug for NatsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsClient")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Client for NatsClient {
    async fn create_topic(&self, topic_id: &str) -> Result<Arc<dyn Topic>> {
        let topic = self.topic_handle(topic_id);

        self.jetstream
            .create_stream(jetstream::stream::Config {
                name: topic.id.clone(),
                subjects: vec![topic.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(PubSubError::nats)?;

        info!(topic = %topic.id, subject = %topic.subject, "Topic created");

        Ok(Arc::new(topic))
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

        let (stream_name, consumer_config) = config.to_consumer_config(id)?;

        let stream = self
            .jetstream
            .get_stream(&stream_name)
            .await
            .map_err(PubSubError::nats)?;
        stream
            .create_consumer(consumer_config)
            .await
            .map_err(PubSubError::nats)?;

        let subscription = self.subscription_handle(qualify(&stream_name, id));
        info!(subscription = %subscription.id, "Subscription created");

        Ok(Arc::new(subscription))
    }

    fn subscription(&self, id: &str) -> Arc<dyn Subscription> {
        Arc::new(self.subscription_handle(id.to_string()))
    }

    async fn topics(&self) -> Result<Vec<Arc<dyn Topic>>> {
        let names = self.jetstream.stream_names().map_err(PubSubError::nats);
        let names = drain_with(self.options.list_policy, names).await?;

        Ok(names
            .iter()
            .map(|name| Arc::new(self.topic_handle(name)) as Arc<dyn Topic>)
            .collect())
    }

    async fn subscriptions(&self) -> Result<Vec<Arc<dyn Subscription>>> {
        let jetstream = self.jetstream.clone();
        let ids = subscription_ids(
            self.jetstream.stream_names().map_err(PubSubError::nats),
            move |topic_id| consumer_ids(jetstream.clone(), topic_id),
        );
        let ids = drain_with(self.options.list_policy, ids).await?;

        Ok(ids
            .into_iter()
            .map(|id| Arc::new(self.subscription_handle(id)) as Arc<dyn Subscription>)
            .collect())
    }
}

/// Flatten a topic listing into subscription ids, one topic at a time
fn subscription_ids<S, F, Fut>(topics: S, expand: F) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<String>>,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<Result<String>>>>,
{
    topics
        .and_then(expand)
        .map_ok(|ids| stream::iter(ids))
        .try_flatten()
}

/// Qualified ids of every consumer on `topic_id`
async fn consumer_ids(jetstream: Context, topic_id: String) -> Result<Vec<Result<String>>> {
    let stream = jetstream
        .get_stream(&topic_id)
        .await
        .map_err(PubSubError::nats)?;
    let names = stream.consumer_names().map_err(PubSubError::nats);
    Ok(qualified(&topic_id, names).await)
}

/// Qualify each name, ending after the first error
async fn qualified<S>(topic_id: &str, names: S) -> Vec<Result<String>>
where
    S: Stream<Item = Result<String>>,
{
    futures::pin_mut!(names);

    let mut ids = Vec::new();
    while let Some(name) = names.next().await {
        match name {
            Ok(name) => ids.push(Ok(qualify(topic_id, &name))),
            Err(e) => {
                ids.push(Err(e));
                break;
            }
        }
    }
    ids
}

/// A JetStream stream used as a topic
#[derive(Clone)]
pub struct NatsTopic {
    jetstream: Context,
    id: String,
    subject: String,
}

impl NatsTopic {
    pub fn new(jetstream: Context, topic_id: &str, subject_prefix: &str) -> Self {
        Self {
            jetstream,
            id: topic_id.to_string(),
            subject: format!("{subject_prefix}.{topic_id}"),
        }
    }

    /// Subject that messages for this topic are published on
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Display for NatsTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for NatsTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsTopic")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Topic for NatsTopic {
    fn id(&self) -> &str {
        &self.id
    }

    fn publish(&self, msg: &dyn Message) -> Arc<dyn PublishResult> {
        let jetstream = self.jetstream.clone();
        let subject = self.subject.clone();
        let headers = headers_from(msg.attributes());
        let payload = Bytes::copy_from_slice(msg.data());

        debug!(topic = %self.id, bytes = payload.len(), "Publishing message");

        Arc::new(PublishHandle::spawn(async move {
            let ack = jetstream
                .publish_with_headers(subject, headers, payload)
                .await
                .map_err(PubSubError::nats)?
                .await
                .map_err(PubSubError::nats)?;
            Ok(ack.sequence.to_string())
        }))
    }

    async fn delete(&self) -> Result<()> {
        self.jetstream
            .delete_stream(&self.id)
            .await
            .map_err(PubSubError::nats)?;

        info!(topic = %self.id, "Topic deleted");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn headers_from(attributes: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in attributes {
        headers.insert(key.as_str(), value.as_str());
    }
    headers
}

/// A durable pull consumer used as a subscription
#[derive(Clone)]
pub struct NatsSubscription {
    jetstream: Context,
    id: String,
    max_concurrent_handlers: usize,
}

impl NatsSubscription {
    /// Split the id into stream name and consumer name
    fn parts(&self) -> Result<(&str, &str)> {
        split_id(&self.id)
    }
}

impl fmt::Display for NatsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for NatsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsSubscription")
            .field("id", &self.id)
            .field("max_concurrent_handlers", &self.max_concurrent_handlers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exists(&self) -> Result<bool> {
        let (topic_id, name) = self.parts()?;

        let stream = match self.jetstream.get_stream(topic_id).await {
            Ok(stream) => stream,
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(api)
                    if api.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    return Ok(false)
                }
                _ => return Err(PubSubError::nats(e)),
            },
        };

        match stream.consumer_info(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.error_code() == ErrorCode::CONSUMER_NOT_FOUND => Ok(false),
            Err(e) => Err(PubSubError::nats(e)),
        }
    }

    async fn receive(&self, shutdown: CancellationToken, handler: MessageHandler) -> Result<()> {
        let (topic_id, name) = self.parts()?;

        let stream = self
            .jetstream
            .get_stream(topic_id)
            .await
            .map_err(PubSubError::nats)?;
        let consumer: PullConsumer = stream
            .get_consumer(name)
            .await
            .map_err(PubSubError::nats)?;
        let messages = consumer.messages().await.map_err(PubSubError::nats)?;

        info!(
            subscription = %self.id,
            max_concurrent_handlers = self.max_concurrent_handlers,
            "Receiving messages"
        );

        let subscription = self.id.as_str();
        let result = deliver(
            messages.map_err(PubSubError::nats),
            &shutdown,
            self.max_concurrent_handlers,
            |message| {
                let handler = handler.clone();
                async move {
                    let adapted = adapt_message(&message);
                    debug!(subscription, message_id = adapted.id(), "Delivering message");

                    handler(adapted).await;

                    if let Err(e) = message.ack().await {
                        // The server redelivers after the ack deadline.
                        error!(subscription, error = %e, "Failed to acknowledge message");
                    }
                    Ok(())
                }
            },
        )
        .await;

        match &result {
            Ok(()) => info!(subscription, "Receive stopped"),
            Err(e) => error!(subscription, error = %e, "Receive failed"),
        }
        result
    }

    async fn delete(&self) -> Result<()> {
        let (topic_id, name) = self.parts()?;

        let stream = self
            .jetstream
            .get_stream(topic_id)
            .await
            .map_err(PubSubError::nats)?;
        stream
            .delete_consumer(name)
            .await
            .map_err(PubSubError::nats)?;

        info!(subscription = %self.id, "Subscription deleted");
        Ok(())
    }
}

/// Run `process` over `messages` until the stream fails or `shutdown` fires
///
/// Cancellation only stops pulling: handlers already running finish before
/// this returns.
async fn deliver<S, T, F, Fut>(
    messages: S,
    shutdown: &CancellationToken,
    limit: usize,
    process: F,
) -> Result<()>
where
    S: Stream<Item = Result<T>>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    messages
        .take_until(shutdown.cancelled())
        .try_for_each_concurrent(limit, process)
        .await
}

/// Snapshot of a delivered JetStream message
#[derive(Debug, Clone)]
pub struct NatsMessage {
    id: String,
    data: Bytes,
    attributes: HashMap<String, String>,
    publish_time: Option<DateTime<Utc>>,
}

impl NatsMessage {
    pub fn from_jetstream(message: &jetstream::Message) -> Self {
        let info = message.info().ok();

        let attributes = message
            .headers
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(name, values)| {
                        values
                            .first()
                            .map(|value| (name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: info
                .as_ref()
                .map(|info| info.stream_sequence.to_string())
                .unwrap_or_default(),
            data: message.payload.clone(),
            attributes,
            publish_time: info.and_then(|info| {
                DateTime::from_timestamp(info.published.unix_timestamp(), info.published.nanosecond())
            }),
        }
    }
}

impl Message for NatsMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn publish_time(&self) -> Option<DateTime<Utc>> {
        self.publish_time
    }
}
