//! Subscription creation settings

use async_nats::jetstream::consumer::{pull, AckPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PubSubError, Result};
use crate::nats::NatsTopic;
use crate::traits::Topic;

/// Default time a delivered message may stay unacknowledged
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(10);

/// Separator between the topic and the subscription name in a subscription id
pub const SUBSCRIPTION_SEPARATOR: char = '/';

/// Reject bare subscription names that cannot be qualified unambiguously
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SUBSCRIPTION_SEPARATOR) || name.contains('.') {
        return Err(PubSubError::InvalidSubscriptionId(name.to_string()));
    }
    Ok(())
}

pub(crate) fn qualify(topic_id: &str, name: &str) -> String {
    format!("{topic_id}{SUBSCRIPTION_SEPARATOR}{name}")
}

/// Split a qualified subscription id into topic and name
pub(crate) fn split_id(id: &str) -> Result<(&str, &str)> {
    match id.split_once(SUBSCRIPTION_SEPARATOR) {
        Some((topic, name)) if !topic.is_empty() && !name.is_empty() => Ok((topic, name)),
        _ => Err(PubSubError::InvalidSubscriptionId(id.to_string())),
    }
}

/// How to create a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Topic to subscribe to; must come from the same client
    pub topic: Arc<dyn Topic>,
    pub ack_deadline: Duration,
    /// Deliveries before a message is given up on; unlimited when `None`
    pub max_delivery_attempts: Option<i64>,
    pub labels: HashMap<String, String>,
}

impl SubscriptionConfig {
    pub fn new(topic: Arc<dyn Topic>) -> Self {
        Self {
            topic,
            ack_deadline: DEFAULT_ACK_DEADLINE,
            max_delivery_attempts: None,
            labels: HashMap::new(),
        }
    }

    pub fn with_ack_deadline(mut self, ack_deadline: Duration) -> Self {
        self.ack_deadline = ack_deadline;
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: i64) -> Self {
        self.max_delivery_attempts = Some(attempts);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Recover the concrete topic adapter, failing for any other `Topic`
    pub fn topic_as<T: Topic + 'static>(&self) -> Result<&T> {
        self.topic
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| PubSubError::ForeignTopic(self.topic.to_string()))
    }

    /// Translate into the stream name and durable pull consumer config for `name`
    pub fn to_consumer_config(&self, name: &str) -> Result<(String, pull::Config)> {
        let topic = self.topic_as::<NatsTopic>()?;

        let config = pull::Config {
            durable_name: Some(name.to_string()),
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.ack_deadline,
            max_deliver: self.max_delivery_attempts.unwrap_or(-1),
            filter_subject: topic.subject().to_string(),
            metadata: self.labels.clone(),
            ..Default::default()
        };

        Ok((topic.id().to_string(), config))
    }
}
