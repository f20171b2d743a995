use std::sync::Arc;

use tracing::{debug, info};

use crate::error::TradingError;
use crate::order::OrderRequest;
use crate::queue::OrderQueue;
use crate::validation::OrderLimits;

/// Validates order requests and puts them on the order queue.
///
/// Invalid requests fail fast here; the processor validates again on its own.
pub struct OrderProducer {
    queue: Arc<dyn OrderQueue>,
    limits: OrderLimits,
}

impl OrderProducer {
    pub fn new(queue: Arc<dyn OrderQueue>, limits: OrderLimits) -> Self {
        Self { queue, limits }
    }

    /// Enqueue `request` in its symbol's group. Returns the message id.
    pub async fn submit(&self, request: &OrderRequest) -> Result<String, TradingError> {
        let validated = self.limits.validate(request)?;
        let body = request.to_json()?;
        debug!(request_id = %request.request_id, bytes = body.len(), "enqueueing order");

        let message_id = self
            .queue
            .send(validated.symbol.as_str(), &body)
            .await
            .map_err(TradingError::Queue)?;

        info!(
            request_id = %request.request_id,
            symbol = %validated.symbol,
            action = %validated.action,
            message_id = %message_id,
            "order enqueued"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderAction;
    use crate::queue::InMemoryOrderQueue;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn valid_order_is_enqueued_under_symbol_group() {
        let queue = Arc::new(InMemoryOrderQueue::new());
        let producer = OrderProducer::new(queue.clone(), OrderLimits::default());

        producer
            .submit(&OrderRequest::new("r-1", "eurusd", OrderAction::Buy, dec!(1)))
            .await
            .expect("submit");

        let messages = queue
            .receive(10, Duration::from_secs(30))
            .await
            .expect("receive");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].group_key, "EURUSD");
        let decoded = OrderRequest::from_json(&messages[0].body).expect("decode");
        assert_eq!(decoded.request_id, "r-1");
    }

    #[tokio::test]
    async fn invalid_order_never_reaches_the_queue() {
        let queue = Arc::new(InMemoryOrderQueue::new());
        let producer = OrderProducer::new(queue.clone(), OrderLimits::default());

        let err = producer
            .submit(&OrderRequest::new("r-2", "EURUSD", OrderAction::Close, dec!(1)))
            .await
            .expect_err("close without ticket");

        assert!(matches!(err, TradingError::ValidationFailed(_)));
        assert_eq!(queue.depth().await.expect("depth"), 0);
    }
}
