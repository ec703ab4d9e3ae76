use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info};

use super::keyed::KeyedTimers;
use crate::relay::transport::Transport;
use crate::store::IdentityStore;

#[derive(Debug, Clone)]
pub struct AutoReplySettings {
    pub message: String,
    /// Quiet period between the first unanswered message and the acknowledgement
    pub delay: Duration,
    /// At most one acknowledgement per user within this window
    pub cooldown: chrono::Duration,
}

/// Sends one automated acknowledgement per user per cooldown window,
/// collapsing bursts of messages into a single delayed send.
#[derive(Clone)]
pub struct AutoReplyThrottle {
    store: IdentityStore,
    transport: Arc<dyn Transport>,
    timers: KeyedTimers<u64>,
    settings: Arc<AutoReplySettings>,
}

impl AutoReplyThrottle {
    pub fn new(
        store: IdentityStore,
        transport: Arc<dyn Transport>,
        settings: AutoReplySettings,
    ) -> Self {
        Self {
            store,
            transport,
            timers: KeyedTimers::new(),
            settings: Arc::new(settings),
        }
    }

    /// Called for every relayed user message. Returns whether a timer was armed.
    pub async fn on_user_message(&self, user_id: u64) -> Result<bool> {
        let Some(reservation) = self.timers.reserve(user_id) else {
            debug!(user_id, "auto-reply already pending");
            return Ok(false);
        };

        // Dropping the reservation on any early return frees the key
        let eligible = self
            .store
            .should_send_auto_reply(user_id, Utc::now(), self.settings.cooldown)
            .await?;
        if !eligible {
            return Ok(false);
        }

        let throttle = self.clone();
        reservation.arm(self.settings.delay, async move {
            throttle.fire(user_id).await;
        });
        debug!(user_id, delay = ?self.settings.delay, "auto-reply armed");
        Ok(true)
    }

    async fn fire(&self, user_id: u64) {
        if let Err(e) = self
            .transport
            .send_text(user_id as i64, None, &self.settings.message)
            .await
        {
            // Timestamp stays untouched so the next message is eligible again
            error!(user_id, error = %e, "Failed to send auto-reply");
            return;
        }

        match self.store.record_auto_reply(user_id, Utc::now()).await {
            Ok(()) => info!(user_id, "Auto-reply sent"),
            Err(e) => error!(user_id, "Failed to record auto-reply: {:#}", e),
        }
    }

    /// Drop pending acknowledgements on shutdown
    pub fn shutdown(&self) {
        let dropped = self.timers.abort_all();
        if dropped > 0 {
            info!("Dropped {} pending auto-replies", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{Call, MockTransport, Op};
    use crate::store::users::NewUser;

    async fn setup() -> (AutoReplyThrottle, Arc<MockTransport>, IdentityStore) {
        let store = IdentityStore::open_in_memory().unwrap();
        store
            .insert_user_if_absent(&NewUser {
                user_id: 1001,
                first_name: "Alice",
                username: None,
                topic_id: 55,
            })
            .await
            .unwrap();
        let transport = Arc::new(MockTransport::new());
        let throttle = AutoReplyThrottle::new(
            store.clone(),
            transport.clone(),
            AutoReplySettings {
                message: "We got your message".to_string(),
                delay: Duration::from_secs(5),
                cooldown: chrono::Duration::hours(24),
            },
        );
        (throttle, transport, store)
    }

    fn sends(transport: &MockTransport) -> usize {
        transport.count(|c| matches!(c, Call::SendText { chat: 1001, .. }))
    }

    async fn settle(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_send() {
        let (throttle, transport, store) = setup().await;

        let mut armed = 0;
        for _ in 0..5 {
            if throttle.on_user_message(1001).await.unwrap() {
                armed += 1;
            }
        }
        assert_eq!(armed, 1);
        assert_eq!(sends(&transport), 0);

        settle(6).await;
        assert_eq!(sends(&transport), 1);
        assert!(store
            .get_user(1001)
            .await
            .unwrap()
            .unwrap()
            .last_auto_reply_at
            .is_some());
        assert_eq!(throttle.timers.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_second_window() {
        let (throttle, transport, _store) = setup().await;

        assert!(throttle.on_user_message(1001).await.unwrap());
        settle(6).await;
        assert_eq!(sends(&transport), 1);

        // Timer is gone but the 24h cooldown still applies
        assert!(!throttle.on_user_message(1001).await.unwrap());
        settle(6).await;
        assert_eq!(sends(&transport), 1);
        assert_eq!(throttle.timers.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_reply_is_outside_window() {
        let (throttle, transport, store) = setup().await;
        store
            .record_auto_reply(1001, Utc::now() - chrono::Duration::hours(25))
            .await
            .unwrap();

        assert!(throttle.on_user_message(1001).await.unwrap());
        settle(6).await;
        assert_eq!(sends(&transport), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_keeps_user_eligible() {
        let (throttle, transport, store) = setup().await;
        transport.fail(Op::SendText);

        assert!(throttle.on_user_message(1001).await.unwrap());
        settle(6).await;
        assert_eq!(sends(&transport), 1);
        assert!(store
            .get_user(1001)
            .await
            .unwrap()
            .unwrap()
            .last_auto_reply_at
            .is_none());

        // No automatic retry, but the next message arms again
        assert!(throttle.on_user_message(1001).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let (throttle, transport, _store) = setup().await;
        assert!(throttle.on_user_message(1001).await.unwrap());
        throttle.shutdown();

        settle(6).await;
        assert_eq!(sends(&transport), 0);
    }
}
