//! In-memory queue with real visibility-timeout semantics.
//!
//! Messages carry a `visible_at` for delayed redelivery and a lease
//! (`lock_token` + `locked_until`) while received. An expired lease makes
//! the message receivable again without any background sweeper; eligibility
//! is evaluated at receive time.

use std::time::Duration;
use tokio::sync::Mutex;

use super::{Delivery, JobMessage, QueueError, WorkQueue};
use crate::now_millis;

const RECEIVE_POLL_MS: u64 = 10;

struct Slot {
    message: JobMessage,
    visible_at_ms: u64,
    lock_token: Option<String>,
    locked_until_ms: u64,
}

#[derive(Default)]
struct QueueInner {
    slots: Vec<Slot>,
    dead: Vec<JobMessage>,
    token_seq: u64,
}

#[derive(Default)]
pub struct InMemoryWorkQueue {
    inner: Mutex<QueueInner>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently held (visible or leased), excluding dead letters.
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    /// Snapshot of the dead-letter holding area (test utility).
    pub async fn dead_letters(&self) -> Vec<JobMessage> {
        self.inner.lock().await.dead.clone()
    }

    /// Drop all messages and dead letters (test utility).
    pub async fn reset(&self) {
        let mut g = self.inner.lock().await;
        g.slots.clear();
        g.dead.clear();
    }

    /// Force every lease to lapse immediately, as if the visibility window
    /// expired (test utility for crash/redelivery scenarios).
    pub async fn expire_leases(&self) {
        let mut g = self.inner.lock().await;
        for slot in g.slots.iter_mut() {
            if slot.lock_token.is_some() {
                slot.locked_until_ms = 0;
            }
        }
    }

    fn try_receive(inner: &mut QueueInner, visibility_timeout: Duration, now_ms: u64) -> Option<Delivery> {
        let slot = inner.slots.iter_mut().find(|s| {
            s.visible_at_ms <= now_ms && (s.lock_token.is_none() || s.locked_until_ms <= now_ms)
        })?;
        inner.token_seq += 1;
        let token = format!("lease_{}_{}", now_ms, inner.token_seq);
        slot.lock_token = Some(token.clone());
        slot.locked_until_ms = now_ms + visibility_timeout.as_millis() as u64;
        Some(Delivery {
            message: slot.message.clone(),
            token,
        })
    }
}

#[async_trait::async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, message: JobMessage, delay: Option<Duration>) -> Result<(), QueueError> {
        let visible_at_ms = now_millis() + delay.map(|d| d.as_millis() as u64).unwrap_or(0);
        let mut g = self.inner.lock().await;
        g.slots.push(Slot {
            message,
            visible_at_ms,
            lock_token: None,
            locked_until_ms: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = now_millis() + wait.as_millis() as u64;
        loop {
            let now_ms = now_millis();
            {
                let mut g = self.inner.lock().await;
                if let Some(delivery) = Self::try_receive(&mut g, visibility_timeout, now_ms) {
                    return Ok(Some(delivery));
                }
            }
            if now_ms >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(RECEIVE_POLL_MS)).await;
        }
    }

    async fn ack(&self, token: &str) -> Result<(), QueueError> {
        let mut g = self.inner.lock().await;
        let idx = g
            .slots
            .iter()
            .position(|s| s.lock_token.as_deref() == Some(token));
        match idx {
            Some(idx) => {
                g.slots.remove(idx);
                Ok(())
            }
            // Lease lapsed and the message was re-received under a new token.
            None => Err(QueueError::permanent("ack", format!("unknown or expired lease: {token}"))),
        }
    }

    async fn send_to_dead_letter(&self, message: JobMessage) -> Result<(), QueueError> {
        self.inner.lock().await.dead.push(message);
        Ok(())
    }
}
