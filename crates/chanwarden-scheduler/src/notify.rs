//! Rate-limited owner notifications.
//!
//! Protects the outbound transport from being used to flood one owner:
//! - at most `max_per_window` sends per owner in any sliding `window`
//!   (further events are skipped, never queued)
//! - consecutive sends to one owner are at least `min_spacing` apart
//!   (the caller is suspended until its slot comes up)
//!
//! Throttle state lives in memory only; a restart resets it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chanwarden_core::config::NotifierConfig;
use chanwarden_core::error::Result;
use chanwarden_core::traits::TransportGateway;
use chanwarden_core::types::{OwnerMessage, UserId};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Throttle limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub max_per_window: usize,
    pub window: Duration,
    pub min_spacing: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::from(&NotifierConfig::default())
    }
}

impl From<&NotifierConfig> for ThrottlePolicy {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            max_per_window: config.max_per_window,
            window: Duration::from_secs(config.window_secs),
            min_spacing: Duration::from_millis(config.min_spacing_ms),
        }
    }
}

/// Result of a notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Owner already at the ceiling for the current window.
    Skipped,
}

#[derive(Default)]
struct OwnerThrottle {
    last_sent: Option<Instant>,
    sent: VecDeque<Instant>,
}

/// Per-owner throttled front of `TransportGateway::notify_owner`.
pub struct RateLimitedNotifier {
    transport: Arc<dyn TransportGateway>,
    policy: ThrottlePolicy,
    owners: Mutex<HashMap<UserId, OwnerThrottle>>,
}

impl RateLimitedNotifier {
    pub fn new(transport: Arc<dyn TransportGateway>, policy: ThrottlePolicy) -> Self {
        Self {
            transport,
            policy,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    /// Send `message` to `owner_id` unless the owner is at the ceiling.
    ///
    /// Waits out the minimum spacing before sending. Transport errors are
    /// returned to the caller; the slot stays consumed.
    pub async fn notify(&self, owner_id: UserId, message: &OwnerMessage) -> Result<NotifyOutcome> {
        let Some(send_at) = self.reserve(owner_id).await else {
            tracing::warn!(
                owner_id,
                "🔕 Notification skipped (rate limit: max {}/{}s)",
                self.policy.max_per_window,
                self.policy.window.as_secs()
            );
            return Ok(NotifyOutcome::Skipped);
        };

        tokio::time::sleep_until(send_at).await;
        self.transport.notify_owner(owner_id, message).await?;
        Ok(NotifyOutcome::Sent)
    }

    /// Claim the next send slot for an owner. The lock covers bookkeeping only.
    async fn reserve(&self, owner_id: UserId) -> Option<Instant> {
        let now = Instant::now();
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner_id).or_default();

        while let Some(oldest) = state.sent.front() {
            if now.saturating_duration_since(*oldest) >= self.policy.window {
                state.sent.pop_front();
            } else {
                break;
            }
        }
        if state.sent.len() >= self.policy.max_per_window {
            return None;
        }

        let send_at = match state.last_sent {
            Some(last) => now.max(last + self.policy.min_spacing),
            None => now,
        };
        state.last_sent = Some(send_at);
        state.sent.push_back(send_at);
        Some(send_at)
    }

    /// Sends recorded for an owner inside the current window.
    pub async fn recent_count(&self, owner_id: UserId) -> usize {
        let now = Instant::now();
        let owners = self.owners.lock().await;
        owners.get(&owner_id).map_or(0, |state| {
            state
                .sent
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < self.policy.window)
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Call, FakeGateway};

    fn notifier(fake: &Arc<FakeGateway>, policy: ThrottlePolicy) -> RateLimitedNotifier {
        RateLimitedNotifier::new(fake.clone(), policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_spacing_per_owner() {
        let fake = Arc::new(FakeGateway::new());
        let n = notifier(&fake, ThrottlePolicy::default());

        let msg = OwnerMessage::new("hello");
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Sent);
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Sent);
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Sent);

        let times = fake.notify_times(7);
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_elapsed_sends_immediately() {
        let fake = Arc::new(FakeGateway::new());
        let n = notifier(&fake, ThrottlePolicy::default());
        let msg = OwnerMessage::new("hello");

        n.notify(7, &msg).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let before = Instant::now();
        n.notify(7, &msg).await.unwrap();

        let times = fake.notify_times(7);
        assert_eq!(times[1], before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owners_do_not_delay_each_other() {
        let fake = Arc::new(FakeGateway::new());
        let n = notifier(&fake, ThrottlePolicy::default());
        let msg = OwnerMessage::new("hello");

        let start = Instant::now();
        n.notify(1, &msg).await.unwrap();
        n.notify(2, &msg).await.unwrap();

        assert_eq!(fake.notify_times(1)[0], start);
        assert_eq!(fake.notify_times(2)[0], start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_skips_26th() {
        let fake = Arc::new(FakeGateway::new());
        let n = notifier(&fake, ThrottlePolicy::default());
        let msg = OwnerMessage::new("lead");

        for _ in 0..25 {
            assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Sent);
        }
        // 25 sends at 2s spacing span 48s, still inside one 60s window.
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Skipped);
        assert_eq!(fake.notify_times(7).len(), 25);
        assert_eq!(n.recent_count(7).await, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let fake = Arc::new(FakeGateway::new());
        let policy = ThrottlePolicy {
            max_per_window: 3,
            window: Duration::from_secs(60),
            min_spacing: Duration::ZERO,
        };
        let n = notifier(&fake, policy);
        let msg = OwnerMessage::new("lead");

        for _ in 0..3 {
            assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Sent);
        }
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Skipped);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Skipped);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(n.notify(7, &msg).await.unwrap(), NotifyOutcome::Sent);
        assert_eq!(fake.notify_times(7).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_bound_over_any_window() {
        let fake = Arc::new(FakeGateway::new());
        let n = Arc::new(notifier(&fake, ThrottlePolicy::default()));
        let msg = OwnerMessage::new("lead");

        // 100 concurrent events for one owner over a few minutes.
        let mut handles = Vec::new();
        for i in 0..100u64 {
            let n = n.clone();
            let msg = msg.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 1500)).await;
                n.notify(7, &msg).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let times = fake.notify_times(7);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .filter(|t| t.duration_since(*start) < Duration::from_secs(60))
                .count();
            assert!(in_window <= 25);
        }
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_propagates() {
        let fake = Arc::new(FakeGateway::new());
        fake.fail_notifications(true);
        let n = notifier(&fake, ThrottlePolicy::default());
        assert!(n.notify(7, &OwnerMessage::new("x")).await.is_err());
        assert!(fake.calls().iter().any(|c| matches!(c, Call::NotifyOwner { .. })));
    }
}
