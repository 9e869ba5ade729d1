use crate::adapters::DeliverySink;
use crate::adapters::webhook::DeliveryNotification;
use crate::common::redis_pool::{self, RedisPool};
use crate::models::delivery::HandoffError;
use crate::models::messages::Message;
use async_trait::async_trait;
use deadpool::managed::PoolError;
use redis::{AsyncCommands, RedisError};
use tracing::debug;

fn make_channel(recipient_id: i64) -> String {
    format!("tone:deliveries:{recipient_id}")
}

/// Publishes a notification on the recipient's channel so online clients
/// pick the message up immediately.
pub struct RedisSink {
    pool: RedisPool,
}

impl RedisSink {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

fn classify_redis_error(e: RedisError) -> HandoffError {
    let transient = e.is_timeout()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
        || e.is_io_error()
        || matches!(
            e.kind(),
            redis::ErrorKind::BusyLoadingError | redis::ErrorKind::TryAgain
        );
    match transient {
        true => HandoffError::Transient(e.to_string()),
        false => HandoffError::Fatal(e.to_string()),
    }
}

fn classify_pool_error(e: redis_pool::Error) -> HandoffError {
    match e {
        PoolError::Backend(e) => classify_redis_error(e),
        PoolError::Timeout(_) => HandoffError::Transient(e.to_string()),
        e => HandoffError::Fatal(e.to_string()),
    }
}

#[async_trait]
impl DeliverySink for RedisSink {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn deliver(&self, message: &Message) -> Result<(), HandoffError> {
        let notification = DeliveryNotification::from_message(message)?;
        let payload = serde_json::to_string(&notification)
            .map_err(|e| HandoffError::Fatal(format!("failed to encode notification: {e}")))?;
        let mut redis = self.pool.get().await.map_err(classify_pool_error)?;
        let receivers: i64 = redis
            .publish(make_channel(notification.recipient_id), payload)
            .await
            .map_err(classify_redis_error)?;
        debug!(
            message_id = message.message_id.to_string(),
            receivers, "Published delivery notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_trouble_is_transient() {
        let refused = RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(classify_redis_error(refused).is_retryable());
    }

    #[test]
    fn protocol_errors_are_fatal() {
        let type_error = RedisError::from((redis::ErrorKind::TypeError, "unexpected reply"));
        assert!(!classify_redis_error(type_error).is_retryable());
    }

    #[test]
    fn channel_is_scoped_to_the_recipient() {
        assert_eq!(make_channel(42), "tone:deliveries:42");
    }
}
