//! Order queue between the producer and the processor.
//!
//! Messages are grouped (group = symbol) and delivered FIFO within a group:
//! only a group's oldest message is handed out, and a group with a message in
//! flight stays blocked until that message is deleted or becomes visible
//! again. Delivery is at-least-once.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StoreError;

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub group_key: String,
    pub body: String,
    /// Handle for [`OrderQueue::delete`] / [`OrderQueue::release`].
    pub receipt: String,
    pub receive_count: u32,
}

#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Append `body` to `group_key`; returns the new message id.
    async fn send(&self, group_key: &str, body: &str) -> Result<String, StoreError>;

    /// Up to `max_messages` visible group heads, hidden for `visibility_timeout`.
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError>;

    /// Remove a processed message. `false` for a stale receipt.
    async fn delete(&self, receipt: &str) -> Result<bool, StoreError>;

    /// Make an in-flight message visible again at once.
    async fn release(&self, receipt: &str) -> Result<bool, StoreError>;

    async fn depth(&self) -> Result<u64, StoreError>;
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    message_id: String,
    group_key: String,
    body: String,
    receive_count: u32,
    invisible_until: Option<Instant>,
}

impl Slot {
    fn receipt(&self) -> String {
        format!("{}:{}", self.seq, self.receive_count)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    slots: VecDeque<Slot>,
}

/// Process-local queue with the same delivery rules as the durable one.
#[derive(Debug, Default)]
pub struct InMemoryOrderQueue {
    state: Mutex<QueueState>,
}

impl InMemoryOrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn position(state: &QueueState, receipt: &str) -> Option<usize> {
        state
            .slots
            .iter()
            .position(|slot| slot.invisible_until.is_some() && slot.receipt() == receipt)
    }
}

#[async_trait]
impl OrderQueue for InMemoryOrderQueue {
    async fn send(&self, group_key: &str, body: &str) -> Result<String, StoreError> {
        let mut state = self.lock();
        state.next_seq += 1;
        let message_id = uuid::Uuid::new_v4().to_string();
        let slot = Slot {
            seq: state.next_seq,
            message_id: message_id.clone(),
            group_key: group_key.to_owned(),
            body: body.to_owned(),
            receive_count: 0,
            invisible_until: None,
        };
        state.slots.push_back(slot);
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let now = Instant::now();
        let mut state = self.lock();
        let mut seen_groups: Vec<String> = Vec::new();
        let mut delivered = Vec::new();

        for slot in state.slots.iter_mut() {
            if delivered.len() >= max_messages {
                break;
            }
            if seen_groups.contains(&slot.group_key) {
                continue;
            }
            seen_groups.push(slot.group_key.clone());

            if slot.invisible_until.is_some_and(|until| until > now) {
                continue;
            }
            slot.receive_count += 1;
            slot.invisible_until = Some(now + visibility_timeout);
            delivered.push(QueueMessage {
                message_id: slot.message_id.clone(),
                group_key: slot.group_key.clone(),
                body: slot.body.clone(),
                receipt: slot.receipt(),
                receive_count: slot.receive_count,
            });
        }
        Ok(delivered)
    }

    async fn delete(&self, receipt: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match Self::position(&state, receipt) {
            Some(index) => Ok(state.slots.remove(index).is_some()),
            None => Ok(false),
        }
    }

    async fn release(&self, receipt: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match Self::position(&state, receipt) {
            Some(index) => {
                state.slots[index].invisible_until = Some(Instant::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn depth(&self) -> Result<u64, StoreError> {
        Ok(self.lock().slots.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn delivers_only_group_heads_in_order() {
        let queue = InMemoryOrderQueue::new();
        queue.send("EURUSD", "e1").await.expect("send");
        queue.send("EURUSD", "e2").await.expect("send");
        queue.send("XAUUSD", "x1").await.expect("send");

        let batch = queue.receive(10, VISIBILITY).await.expect("receive");
        let bodies: Vec<_> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["e1", "x1"]);

        assert!(queue.receive(10, VISIBILITY).await.expect("receive").is_empty());

        assert!(queue.delete(&batch[0].receipt).await.expect("delete"));
        let next = queue.receive(10, VISIBILITY).await.expect("receive");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].body, "e2");
    }

    #[tokio::test]
    async fn released_message_is_redelivered_with_new_receipt() {
        let queue = InMemoryOrderQueue::new();
        queue.send("EURUSD", "e1").await.expect("send");

        let first = queue.receive(1, VISIBILITY).await.expect("receive").remove(0);
        assert!(queue.release(&first.receipt).await.expect("release"));

        let second = queue.receive(1, VISIBILITY).await.expect("receive").remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.receive_count, 2);
        assert!(!queue.delete(&first.receipt).await.expect("stale"));
        assert!(queue.delete(&second.receipt).await.expect("delete"));
        assert_eq!(queue.depth().await.expect("depth"), 0);
    }

    #[tokio::test]
    async fn expired_visibility_makes_message_visible() {
        let queue = InMemoryOrderQueue::new();
        queue.send("EURUSD", "e1").await.expect("send");

        let first = queue
            .receive(1, Duration::from_millis(1))
            .await
            .expect("receive");
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let again = queue.receive(1, VISIBILITY).await.expect("receive");
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
    }
}
