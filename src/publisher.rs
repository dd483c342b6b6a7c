//! Redis Alert Publisher
//!
//! Publishes dispatched alerts to a Redis pub/sub channel as JSON, one
//! message per alert.

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::debug;

use crate::alert::Alert;

/// Default Redis channel for publishing alerts
pub const DEFAULT_CHANNEL: &str = "txnscope_alerts";

/// Failures while delivering alerts to Redis
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivers dispatched alerts to one pub/sub channel
pub struct AlertPublisher {
    connection: MultiplexedConnection,
    channel: String,
}

impl AlertPublisher {
    /// Publish on `channel` over an already open connection
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Open a connection to `redis_url` and publish on `channel`
    pub async fn connect(redis_url: &str, channel: impl Into<String>) -> Result<Self, PublishError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, channel))
    }

    /// Publish one alert
    ///
    /// # Returns
    /// The number of subscribers that received the message
    pub async fn publish(&mut self, alert: &Alert) -> Result<i64, PublishError> {
        let json = alert.to_json()?;
        let subscribers: i64 = self.connection.publish(&self.channel, &json).await?;
        debug!(alert_id = %alert.alert_id, subscribers, "published alert");
        Ok(subscribers)
    }

    /// Publish alerts in order, stopping at the first failure
    ///
    /// # Returns
    /// How many alerts were published
    pub async fn publish_all(&mut self, alerts: &[Alert]) -> Result<usize, PublishError> {
        for alert in alerts {
            self.publish(alert).await?;
        }
        Ok(alerts.len())
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}
