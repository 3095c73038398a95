//! Subscription Lifecycle Manager: expiry sweep and membership transitions.
//!
//! ```text
//! pending_lifetime ── never transitions automatically
//! active ──[expired, enforced]──> banned
//! active ──[user leaves]────────> left
//! banned ──[undo / manual unban]─> left
//! ```
//!
//! The sweep only selects active, expired records, so running it twice (or
//! overlapping two ticks) re-processes nothing the first run already banned.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chanwarden_core::error::{ChanwardenError, Result};
use chanwarden_core::traits::{PersistenceGateway, TransportGateway};
use chanwarden_core::types::{
    ChannelId, ChannelKind, MemberJoin, OwnerMessage, Subscription, SubscriptionStatus, UserId,
    lifetime_end,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::enforcer::{Enforcer, Verdict};
use crate::messages;
use crate::notify::RateLimitedNotifier;

/// Reversible action reference carried by a removal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoBan {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub owner_id: UserId,
}

impl UndoBan {
    const PREFIX: &'static str = "undo_ban";

    pub fn callback_data(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UndoBan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            Self::PREFIX,
            self.user_id,
            self.channel_id,
            self.owner_id
        )
    }
}

impl FromStr for UndoBan {
    type Err = ChanwardenError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ChanwardenError::Config(format!("invalid undo reference '{s}'"));
        let mut parts = s.split(':');
        if parts.next() != Some(Self::PREFIX) {
            return Err(invalid());
        }
        let mut next_id = || -> Result<i64> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(invalid)
        };
        let user_id = next_id()?;
        let channel_id = next_id()?;
        let owner_id = next_id()?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            user_id,
            channel_id,
            owner_id,
        })
    }
}

/// What happened to one expired subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Removed,
    MissingRight,
    Untouchable,
    Unconfigured,
    Transient,
}

/// Counters for one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub removed: usize,
    pub missing_rights: usize,
    pub untouchable: usize,
    pub unconfigured: usize,
    pub transient_failures: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Removed => self.removed += 1,
            SweepOutcome::MissingRight => self.missing_rights += 1,
            SweepOutcome::Untouchable => self.untouchable += 1,
            SweepOutcome::Unconfigured => self.unconfigured += 1,
            SweepOutcome::Transient => self.transient_failures += 1,
        }
    }
}

/// State scoped to a single sweep pass.
struct SweepPass {
    enforcer: Enforcer,
    /// Channels whose owner was already told about the missing ban right.
    notified_channels: HashSet<ChannelId>,
}

pub struct LifecycleManager {
    store: Arc<dyn PersistenceGateway>,
    transport: Arc<dyn TransportGateway>,
    notifier: Arc<RateLimitedNotifier>,
    /// Pause after each removal; paces destructive calls.
    pacing: Duration,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn PersistenceGateway>,
        transport: Arc<dyn TransportGateway>,
        notifier: Arc<RateLimitedNotifier>,
        pacing: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            notifier,
            pacing,
        }
    }

    /// One full pass over all expired active subscriptions. Never fails the batch.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let expired = match self.store.list_expired_active_subscriptions(now).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!("❌ Expired subscription query failed: {e}");
                return report;
            }
        };
        if expired.is_empty() {
            return report;
        }

        report.expired = expired.len();
        tracing::info!("🔎 Found {} expired subscriptions", expired.len());

        let mut pass = SweepPass {
            enforcer: Enforcer::new(self.transport.clone()),
            notified_channels: HashSet::new(),
        };
        for sub in group_by_channel(expired) {
            let outcome = self.enforce(&sub, &mut pass).await;
            report.record(outcome);
        }

        if report.removed > 0 {
            tracing::info!("🚫 Removed {} users with expired subscriptions", report.removed);
        }
        report
    }

    async fn enforce(&self, sub: &Subscription, pass: &mut SweepPass) -> SweepOutcome {
        let target = match self.store.get_owner_default_channel(sub.owner_id).await {
            Ok(Some(channel_id)) => channel_id,
            Ok(None) => {
                tracing::warn!(
                    owner_id = sub.owner_id,
                    user_id = sub.user_id,
                    "⚠️ No enforcement channel configured, skipping"
                );
                return SweepOutcome::Unconfigured;
            }
            Err(e) => {
                tracing::warn!(owner_id = sub.owner_id, "⚠️ Channel lookup failed: {e}");
                return SweepOutcome::Transient;
            }
        };

        match pass.enforcer.check(target, sub.user_id).await {
            Verdict::MissingRestrictRight => {
                return self.handle_missing_right(sub, target, pass).await;
            }
            Verdict::Untouchable => {
                tracing::warn!(
                    channel_id = target,
                    user_id = sub.user_id,
                    "🛡️ Expired user is a channel administrator, manual removal required"
                );
                self.mark_banned(sub).await;
                self.notify_owner(sub.owner_id, messages::untouchable_member(sub))
                    .await;
                return SweepOutcome::Untouchable;
            }
            Verdict::Allowed => {}
        }

        match self.transport.remove_member(target, sub.user_id).await {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .update_subscription_status(sub.user_id, sub.channel_id, SubscriptionStatus::Banned)
                    .await
                {
                    // Removal is repeatable; the next tick retries and notifies.
                    tracing::error!(user_id = sub.user_id, "❌ Failed to store ban: {e}");
                    return SweepOutcome::Transient;
                }
                tracing::info!(channel_id = target, user_id = sub.user_id, "🚫 Removed expired member");
                self.notify_owner(sub.owner_id, messages::member_removed(sub))
                    .await;
                tokio::time::sleep(self.pacing).await;
                SweepOutcome::Removed
            }
            Err(e) if e.is_insufficient_rights() => {
                tracing::error!(channel_id = target, user_id = sub.user_id, "🔒 Removal rejected: {e}");
                pass.enforcer.mark_missing_right(target);
                self.handle_missing_right(sub, target, pass).await
            }
            Err(e) => {
                tracing::warn!(
                    channel_id = target,
                    user_id = sub.user_id,
                    "⚠️ Removal failed, retrying next tick: {e}"
                );
                SweepOutcome::Transient
            }
        }
    }

    async fn handle_missing_right(
        &self,
        sub: &Subscription,
        channel_id: ChannelId,
        pass: &mut SweepPass,
    ) -> SweepOutcome {
        self.mark_banned(sub).await;
        if pass.notified_channels.insert(channel_id) {
            self.notify_owner(sub.owner_id, messages::missing_ban_right(channel_id))
                .await;
        }
        SweepOutcome::MissingRight
    }

    async fn mark_banned(&self, sub: &Subscription) {
        if let Err(e) = self
            .store
            .update_subscription_status(sub.user_id, sub.channel_id, SubscriptionStatus::Banned)
            .await
        {
            tracing::error!(user_id = sub.user_id, channel_id = sub.channel_id, "❌ Failed to store ban: {e}");
        }
    }

    async fn notify_owner(&self, owner_id: UserId, message: OwnerMessage) {
        if let Err(e) = self.notifier.notify(owner_id, &message).await {
            tracing::warn!(owner_id, "⚠️ Owner notification failed: {e}");
        }
    }

    /// Reverse an automatic ban: unban on the channel, banned → left.
    ///
    /// Returns `false` when there is no banned subscription to restore.
    pub async fn undo_ban(&self, undo: &UndoBan) -> Result<bool> {
        let Some(sub) = self
            .store
            .get_subscription(undo.user_id, undo.channel_id)
            .await?
        else {
            return Ok(false);
        };
        if sub.status != SubscriptionStatus::Banned {
            return Ok(false);
        }

        let target = self
            .store
            .get_owner_default_channel(undo.owner_id)
            .await?
            .unwrap_or(undo.channel_id);
        self.transport.unban_member(target, undo.user_id).await?;
        self.store
            .update_subscription_status(undo.user_id, undo.channel_id, SubscriptionStatus::Left)
            .await?;
        tracing::info!(user_id = undo.user_id, channel_id = target, "↩️ Ban undone");
        self.notify_owner(undo.owner_id, messages::ban_undone(undo)).await;
        Ok(true)
    }

    /// A user left voluntarily: active → left.
    pub async fn record_leave(&self, user_id: UserId, channel_id: ChannelId) -> Result<bool> {
        let Some(sub) = self.store.get_subscription(user_id, channel_id).await? else {
            return Ok(false);
        };
        if sub.status != SubscriptionStatus::Active {
            return Ok(false);
        }
        self.store
            .update_subscription_status(user_id, channel_id, SubscriptionStatus::Left)
            .await?;
        tracing::info!(user_id, channel_id, "👋 Member left");
        self.notify_owner(sub.owner_id, messages::member_left(&sub)).await;
        Ok(true)
    }

    /// A user joined a tracked channel.
    ///
    /// Premium: the owner is asked to pick a tier. Free: a never-expiring lead
    /// record is stored and the owner gets a throttled lead notification.
    pub async fn on_member_joined(&self, join: &MemberJoin) -> Result<()> {
        let Some(channel) = self.store.get_channel(join.channel_id).await? else {
            tracing::debug!(channel_id = join.channel_id, "Join on untracked channel");
            return Ok(());
        };

        match channel.kind {
            ChannelKind::Premium => {
                self.notify_owner(channel.owner_id, messages::premium_join(join))
                    .await;
            }
            ChannelKind::Free => {
                let lead = Subscription {
                    user_id: join.user_id,
                    channel_id: join.channel_id,
                    owner_id: channel.owner_id,
                    username: join.username.clone(),
                    full_name: join.full_name.clone(),
                    tier: "free".into(),
                    start_at: Utc::now(),
                    end_at: lifetime_end(),
                    status: SubscriptionStatus::PendingLifetime,
                };
                self.store.upsert_subscription(&lead).await?;
                self.notify_owner(channel.owner_id, messages::new_lead(join))
                    .await;
            }
        }
        Ok(())
    }
}

/// Stable grouping by channel: channels in first-seen order, records in storage order.
fn group_by_channel(subs: Vec<Subscription>) -> Vec<Subscription> {
    let mut order = Vec::new();
    let mut groups: HashMap<ChannelId, Vec<Subscription>> = HashMap::new();
    for sub in subs {
        let group = groups.entry(sub.channel_id).or_insert_with(|| {
            order.push(sub.channel_id);
            Vec::new()
        });
        group.push(sub);
    }
    order
        .into_iter()
        .flat_map(|channel_id| groups.remove(&channel_id).unwrap_or_default())
        .collect()
}
