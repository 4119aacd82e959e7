//! Pub/Sub Wrapper Library
//!
//! Exposes the NATS JetStream client through the small set of traits in
//! [`traits`], so calling code can depend on those traits and swap in the
//! [`memory`] backend (or any other double) under test.

pub mod error;
pub mod list;
pub mod memory;
pub mod message;
pub mod nats;
pub mod publish;
pub mod subscription_config;
pub mod traits;

pub use error::*;
pub use list::ListPolicy;
pub use memory::MemoryClient;
pub use message::OwnedMessage;
pub use nats::{adapt_client, adapt_message, ClientOptions, NatsClient};
pub use publish::PublishHandle;
pub use subscription_config::SubscriptionConfig;
pub use traits::*;
