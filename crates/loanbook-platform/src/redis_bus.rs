use anyhow::Result;
use async_trait::async_trait;
use loanbook_core::{Notifier, WaiverEvent};
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::debug;

use crate::contracts::{WAIVER_EVENTS_CHANNEL, WaiverEventMessage};

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}

/// Publishes every waiver event as JSON on `waivers.events`.
#[derive(Clone)]
pub struct RedisNotifier {
    bus: RedisBus,
}

impl RedisNotifier {
    pub fn new(bus: RedisBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, event: &WaiverEvent) -> Result<()> {
        let message = WaiverEventMessage::new(event.clone());
        self.bus
            .publish_json(WAIVER_EVENTS_CHANNEL, &message)
            .await?;
        debug!(message_id = %message.message_id, "waiver event published");
        Ok(())
    }
}
