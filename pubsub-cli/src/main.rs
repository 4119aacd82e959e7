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

// Operator tool for topics and subscriptions on the message bus
use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use pubsub_config::AppConfig;
use pubsub_logging::init_console_logging;
use pubsub_wrapper::{handler, Client, NatsClient, OwnedMessage, SubscriptionConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage topics and subscriptions on the message bus", long_about = None)]
struct Args {
    /// Override PUBSUB_URL
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List topics
    Topics,
    /// List subscriptions as <topic>/<name>
    Subscriptions,
    CreateTopic { topic: String },
    DeleteTopic { topic: String },
    CreateSubscription {
        topic: String,
        name: String,
        /// Seconds a delivery may stay unacknowledged
        #[arg(long, default_value_t = 10)]
        ack_deadline: u64,
    },
    DeleteSubscription { subscription: String },
    /// Publish one message and print the server id
    Publish {
        topic: String,
        data: String,
        /// Attribute as key=value, repeatable
        #[arg(short, long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Print delivered messages until Ctrl+C or --max messages
    Receive {
        subscription: String,
        #[arg(long)]
        max: Option<usize>,
    },
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

/// Execute `command`, returning the lines to print
async fn run(client: &dyn Client, command: Command, shutdown: CancellationToken) -> Result<Vec<String>> {
    let lines = match command {
        Command::Topics => client
            .topics()
            .await?
            .iter()
            .map(|topic| topic.to_string())
            .collect(),
        Command::Subscriptions => client
            .subscriptions()
            .await?
            .iter()
            .map(|subscription| subscription.to_string())
            .collect(),
        Command::CreateTopic { topic } => {
            let topic = client.create_topic(&topic).await?;
            vec![format!("created topic {topic}")]
        }
        Command::DeleteTopic { topic } => {
            client.topic(&topic).delete().await?;
            vec![format!("deleted topic {topic}")]
        }
        Command::CreateSubscription {
            topic,
            name,
            ack_deadline,
        } => {
            let config = SubscriptionConfig::new(client.topic(&topic))
                .with_ack_deadline(std::time::Duration::from_secs(ack_deadline));
            let subscription = client.create_subscription(&name, config).await?;
            vec![format!("created subscription {subscription}")]
        }
        Command::DeleteSubscription { subscription } => {
            client.subscription(&subscription).delete().await?;
            vec![format!("deleted subscription {subscription}")]
        }
        Command::Publish {
            topic,
            data,
            attributes,
        } => {
            let message = OwnedMessage::new(data.into_bytes()).with_attributes(attributes);
            let id = client.topic(&topic).publish(&message).get().await?;
            vec![id]
        }
        Command::Receive { subscription, max } => {
            receive(client, &subscription, max, shutdown).await?
        }
    };
    Ok(lines)
}

async fn receive(
    client: &dyn Client,
    subscription: &str,
    max: Option<usize>,
    shutdown: CancellationToken,
) -> Result<Vec<String>> {
    let subscription = client.subscription(subscription);
    if !subscription.exists().await? {
        return Err(anyhow!("subscription {subscription} does not exist"));
    }

    let lines = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(AtomicUsize::new(0));
    let on_message = {
        let lines = lines.clone();
        let shutdown = shutdown.clone();
        handler(move |msg| {
            let lines = lines.clone();
            let seen = seen.clone();
            let shutdown = shutdown.clone();
            async move {
                let line = format!(
                    "{} {:?} {}",
                    msg.id(),
                    msg.attributes(),
                    String::from_utf8_lossy(msg.data())
                );
                println!("{line}");
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }

                let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if max.is_some_and(|max| count >= max) {
                    shutdown.cancel();
                }
            }
        })
    };

    info!(subscription = %subscription, "Waiting for messages");
    subscription.receive(shutdown, on_message).await?;

    let collected = lines.lock().map(|lines| lines.len()).unwrap_or(0);
    Ok(vec![format!("received {collected} message(s)")])
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = args.url {
        config.bus.url = url;
    }

    init_console_logging("pubsub-cli", config.log_level());

    let client = NatsClient::connect(&config.bus)
        .await
        .context("Failed to connect to message bus")?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
        }
        ctrl_c.cancel();
    });

    for line in run(&client, args.command, shutdown).await? {
        println!("{line}");
    }
    Ok(())
}
