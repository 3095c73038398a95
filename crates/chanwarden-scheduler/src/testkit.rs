//! In-memory recording fake for both gateways, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chanwarden_core::error::{ChanwardenError, Result};
use chanwarden_core::traits::{PersistenceGateway, TransportGateway};
use chanwarden_core::types::*;
use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub const AGENT_ID: UserId = 999;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetMemberRole { channel_id: ChannelId, user_id: UserId },
    RemoveMember { channel_id: ChannelId, user_id: UserId },
    UnbanMember { channel_id: ChannelId, user_id: UserId },
    GetMemberCount { channel_id: ChannelId },
    Send { kind: ContentType, channel_id: ChannelId, buttons: usize },
    NotifyOwner { owner_id: UserId, message: OwnerMessage },
    UpdateSubscription { user_id: UserId, channel_id: ChannelId, status: SubscriptionStatus },
    UpdatePost { post_id: PostId, status: PostStatus },
    UpdateListing { owner_id: UserId, members_count: i64 },
}

#[derive(Default)]
struct State {
    subscriptions: Vec<Subscription>,
    posts: Vec<ScheduledPost>,
    channels: Vec<Channel>,
    owner_defaults: HashMap<UserId, ChannelId>,
    listings: Vec<Listing>,
    roles: HashMap<(ChannelId, UserId), MemberRole>,
    member_counts: HashMap<ChannelId, i64>,
    no_ban_right: HashSet<ChannelId>,
    remove_rejects_rights: HashSet<ChannelId>,
    remove_transient: HashSet<UserId>,
    role_query_fails: bool,
    failing_sends: HashSet<ChannelId>,
    fail_notifications: bool,
    fail_storage: bool,
    calls: Vec<(Instant, Call)>,
}

pub struct FakeGateway {
    state: Mutex<State>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push((Instant::now(), call));
    }

    // ─── Fixtures ──────────────────────────────────────

    pub fn add_channel(&self, channel_id: ChannelId, owner_id: UserId, kind: ChannelKind) {
        self.state.lock().unwrap().channels.push(Channel {
            channel_id,
            owner_id,
            title: Some(format!("Channel {channel_id}")),
            kind,
        });
    }

    pub fn set_owner_default(&self, owner_id: UserId, channel_id: ChannelId) {
        self.state.lock().unwrap().owner_defaults.insert(owner_id, channel_id);
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.state.lock().unwrap().subscriptions.push(subscription);
    }

    pub fn add_post(&self, post: ScheduledPost) {
        self.state.lock().unwrap().posts.push(post);
    }

    pub fn add_listing(&self, owner_id: UserId, channel_id: ChannelId, members: i64) {
        let mut state = self.state.lock().unwrap();
        state.listings.push(Listing {
            owner_id,
            channel_id,
            members_count: 0,
        });
        state.member_counts.insert(channel_id, members);
    }

    /// Listing whose channel the transport cannot count.
    pub fn add_unreachable_listing(&self, owner_id: UserId, channel_id: ChannelId) {
        self.state.lock().unwrap().listings.push(Listing {
            owner_id,
            channel_id,
            members_count: 0,
        });
    }

    pub fn set_role(&self, channel_id: ChannelId, user_id: UserId, role: MemberRole) {
        self.state.lock().unwrap().roles.insert((channel_id, user_id), role);
    }

    /// Agent is an administrator without the restrict right.
    pub fn deny_ban_right(&self, channel_id: ChannelId) {
        self.state.lock().unwrap().no_ban_right.insert(channel_id);
    }

    /// Pre-check passes but the removal itself is rejected for rights.
    pub fn reject_removals_for_rights(&self, channel_id: ChannelId) {
        self.state.lock().unwrap().remove_rejects_rights.insert(channel_id);
    }

    pub fn fail_removal_transiently(&self, user_id: UserId) {
        self.state.lock().unwrap().remove_transient.insert(user_id);
    }

    pub fn fail_role_queries(&self) {
        self.state.lock().unwrap().role_query_fails = true;
    }

    pub fn fail_sends_to(&self, channel_id: ChannelId) {
        self.state.lock().unwrap().failing_sends.insert(channel_id);
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.state.lock().unwrap().fail_notifications = fail;
    }

    pub fn fail_storage(&self, fail: bool) {
        self.state.lock().unwrap().fail_storage = fail;
    }

    // ─── Inspection ──────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn notify_times(&self, owner: UserId) -> Vec<Instant> {
        self.timed_calls()
            .into_iter()
            .filter_map(|(t, c)| match c {
                Call::NotifyOwner { owner_id, .. } if owner_id == owner => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self, owner: UserId) -> Vec<OwnerMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::NotifyOwner { owner_id, message } if owner_id == owner => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn removals(&self) -> Vec<(ChannelId, UserId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RemoveMember { channel_id, user_id } => Some((channel_id, user_id)),
                _ => None,
            })
            .collect()
    }

    pub fn subscription(&self, user_id: UserId, channel_id: ChannelId) -> Option<Subscription> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.channel_id == channel_id)
            .cloned()
    }

    pub fn post(&self, post_id: PostId) -> Option<ScheduledPost> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .find(|p| p.post_id == post_id)
            .cloned()
    }

    pub fn listing(&self, owner_id: UserId) -> Option<Listing> {
        self.state
            .lock()
            .unwrap()
            .listings
            .iter()
            .find(|l| l.owner_id == owner_id)
            .cloned()
    }

    fn storage_check(&self) -> Result<()> {
        if self.state.lock().unwrap().fail_storage {
            Err(ChanwardenError::Storage("database is locked".into()))
        } else {
            Ok(())
        }
    }

    fn send(&self, kind: ContentType, channel_id: ChannelId, buttons: &[PostButton]) -> Result<()> {
        self.record(Call::Send {
            kind,
            channel_id,
            buttons: buttons.len(),
        });
        if self.state.lock().unwrap().failing_sends.contains(&channel_id) {
            return Err(ChanwardenError::Transport("chat not found".into()));
        }
        Ok(())
    }
}

// ─── Log capture ──────────────────────────────────────

/// Records every event emitted on the current thread while the guard lives.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageField(String::new());
        event.record(&mut message);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message.0));
    }
}

struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

// ─── Builders ──────────────────────────────────────

pub fn expired_subscription(user_id: UserId, channel_id: ChannelId, owner_id: UserId) -> Subscription {
    let end_at = Utc::now() - Duration::days(1);
    Subscription {
        user_id,
        channel_id,
        owner_id,
        username: Some(format!("user{user_id}")),
        full_name: format!("User {user_id}"),
        tier: "gold".into(),
        start_at: end_at - Duration::days(30),
        end_at,
        status: SubscriptionStatus::Active,
    }
}

pub fn due_post(post_id: PostId, owner_id: UserId, channel_id: Option<ChannelId>, kind: &str) -> ScheduledPost {
    ScheduledPost {
        post_id,
        owner_id,
        channel_id,
        content_type: kind.to_string(),
        content: format!("content of post {post_id}"),
        caption: None,
        buttons: Vec::new(),
        publish_at: Utc::now() - Duration::minutes(1),
        status: PostStatus::Pending,
    }
}

#[async_trait]
impl PersistenceGateway for FakeGateway {
    async fn list_expired_active_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        self.storage_check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect())
    }

    async fn update_subscription_status(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        status: SubscriptionStatus,
    ) -> Result<()> {
        self.storage_check()?;
        self.record(Call::UpdateSubscription {
            user_id,
            channel_id,
            status,
        });
        let mut state = self.state.lock().unwrap();
        for s in state.subscriptions.iter_mut() {
            if s.user_id == user_id && s.channel_id == channel_id {
                s.status = status;
            }
        }
        Ok(())
    }

    async fn list_due_pending_posts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        self.storage_check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|p| p.is_due(now))
            .cloned()
            .collect())
    }

    async fn update_post_status(&self, post_id: PostId, status: PostStatus) -> Result<()> {
        self.storage_check()?;
        self.record(Call::UpdatePost { post_id, status });
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.posts.iter_mut().find(|p| p.post_id == post_id) {
            p.status = status;
        }
        Ok(())
    }

    async fn get_owner_default_channel(&self, owner_id: UserId) -> Result<Option<ChannelId>> {
        self.storage_check()?;
        Ok(self.state.lock().unwrap().owner_defaults.get(&owner_id).copied())
    }

    async fn get_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>> {
        self.storage_check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .channels
            .iter()
            .find(|c| c.channel_id == channel_id)
            .cloned())
    }

    async fn get_subscription(&self, user_id: UserId, channel_id: ChannelId) -> Result<Option<Subscription>> {
        self.storage_check()?;
        Ok(self.subscription(user_id, channel_id))
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.storage_check()?;
        let mut state = self.state.lock().unwrap();
        state
            .subscriptions
            .retain(|s| !(s.user_id == subscription.user_id && s.channel_id == subscription.channel_id));
        state.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn list_tracked_listings(&self) -> Result<Vec<Listing>> {
        self.storage_check()?;
        Ok(self.state.lock().unwrap().listings.clone())
    }

    async fn update_listing_members(&self, owner_id: UserId, members_count: i64) -> Result<()> {
        self.storage_check()?;
        self.record(Call::UpdateListing {
            owner_id,
            members_count,
        });
        let mut state = self.state.lock().unwrap();
        if let Some(l) = state.listings.iter_mut().find(|l| l.owner_id == owner_id) {
            l.members_count = members_count;
        }
        Ok(())
    }
}

#[async_trait]
impl TransportGateway for FakeGateway {
    async fn agent_id(&self) -> Result<UserId> {
        Ok(AGENT_ID)
    }

    async fn remove_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<()> {
        self.record(Call::RemoveMember { channel_id, user_id });
        let state = self.state.lock().unwrap();
        if state.remove_rejects_rights.contains(&channel_id) || state.no_ban_right.contains(&channel_id) {
            return Err(ChanwardenError::InsufficientRights(
                "not enough rights to restrict/unrestrict chat member".into(),
            ));
        }
        if state.remove_transient.contains(&user_id) {
            return Err(ChanwardenError::Transport("Too Many Requests: retry after 5".into()));
        }
        Ok(())
    }

    async fn unban_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<()> {
        self.record(Call::UnbanMember { channel_id, user_id });
        Ok(())
    }

    async fn get_member_role(&self, channel_id: ChannelId, user_id: UserId) -> Result<MemberRole> {
        self.record(Call::GetMemberRole { channel_id, user_id });
        let state = self.state.lock().unwrap();
        if state.role_query_fails {
            return Err(ChanwardenError::Transport("Bad Gateway".into()));
        }
        if let Some(role) = state.roles.get(&(channel_id, user_id)) {
            return Ok(*role);
        }
        if user_id == AGENT_ID {
            return Ok(MemberRole::Administrator {
                can_restrict_members: !state.no_ban_right.contains(&channel_id),
            });
        }
        Ok(MemberRole::Member)
    }

    async fn get_member_count(&self, channel_id: ChannelId) -> Result<i64> {
        self.record(Call::GetMemberCount { channel_id });
        self.state
            .lock()
            .unwrap()
            .member_counts
            .get(&channel_id)
            .copied()
            .ok_or_else(|| ChanwardenError::Transport("chat not found".into()))
    }

    async fn send_message(&self, channel_id: ChannelId, _text: &str, buttons: &[PostButton]) -> Result<()> {
        self.send(ContentType::Text, channel_id, buttons)
    }

    async fn send_photo(
        &self,
        channel_id: ChannelId,
        _photo: &str,
        _caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        self.send(ContentType::Photo, channel_id, buttons)
    }

    async fn send_video(
        &self,
        channel_id: ChannelId,
        _video: &str,
        _caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        self.send(ContentType::Video, channel_id, buttons)
    }

    async fn send_document(
        &self,
        channel_id: ChannelId,
        _document: &str,
        _caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        self.send(ContentType::Document, channel_id, buttons)
    }

    async fn send_sticker(&self, channel_id: ChannelId, _sticker: &str, buttons: &[PostButton]) -> Result<()> {
        self.send(ContentType::Sticker, channel_id, buttons)
    }

    async fn notify_owner(&self, owner_id: UserId, message: &OwnerMessage) -> Result<()> {
        self.record(Call::NotifyOwner {
            owner_id,
            message: message.clone(),
        });
        if self.state.lock().unwrap().fail_notifications {
            return Err(ChanwardenError::Transport("Forbidden: bot was blocked by the user".into()));
        }
        Ok(())
    }
}
