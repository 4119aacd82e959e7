//! Error types for pub/sub wrapper operations

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in pub/sub operations
#[derive(Error, Debug)]
pub enum PubSubError {
    /// Failure reported by the NATS client, passed through untouched
    #[error(transparent)]
    Nats(#[from] async_nats::Error),

    /// Outcome of a publish; shared between every waiter of the same result
    #[error("{0}")]
    Publish(Arc<dyn StdError + Send + Sync>),

    /// A `Topic` from another backend was handed to this one
    #[error("Topic {0} does not belong to this client")]
    ForeignTopic(String),

    #[error("Invalid subscription id {0:?}: expected <topic>/<name>")]
    InvalidSubscriptionId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Client closed")]
    Closed,
}

impl PubSubError {
    /// Wrap any NATS-side error without altering it
    pub(crate) fn nats<E>(err: E) -> Self
    where
        E: Into<async_nats::Error>,
    {
        PubSubError::Nats(err.into())
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;
