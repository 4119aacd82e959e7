//! Plain message values

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::traits::Message;

/// An owned message: outgoing payloads, and deliveries from the memory backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedMessage {
    pub id: String,
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub publish_time: Option<DateTime<Utc>>,
}

impl OwnedMessage {
    /// Create an unpublished message carrying `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Copy the readable fields of any [`Message`]
    pub fn snapshot(msg: &dyn Message) -> Self {
        Self {
            id: msg.id().to_string(),
            data: Bytes::copy_from_slice(msg.data()),
            attributes: msg.attributes().clone(),
            publish_time: msg.publish_time(),
        }
    }
}

impl Message for OwnedMessage {
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
