//! Seams between the engine and its two external collaborators.
//!
//! The engine depends only on these traits. Storage and messaging backends
//! implement them; every call must be safe to retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Channel, ChannelId, Listing, MemberRole, OwnerMessage, PostButton, PostId, PostStatus,
    ScheduledPost, Subscription, SubscriptionStatus, UserId,
};

/// Storage collaborator.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Subscriptions with status active and `end_at <= now`.
    async fn list_expired_active_subscriptions(&self, now: DateTime<Utc>)
    -> Result<Vec<Subscription>>;

    async fn update_subscription_status(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        status: SubscriptionStatus,
    ) -> Result<()>;

    /// Posts with status pending and `publish_at <= now`.
    async fn list_due_pending_posts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>>;

    async fn update_post_status(&self, post_id: PostId, status: PostStatus) -> Result<()>;

    /// Channel the owner designates as enforcement/publication target.
    async fn get_owner_default_channel(&self, owner_id: UserId) -> Result<Option<ChannelId>>;

    async fn get_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>>;

    async fn get_subscription(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<Subscription>>;

    /// Insert or replace a subscription keyed by (user_id, channel_id).
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Channels whose external member count is tracked.
    async fn list_tracked_listings(&self) -> Result<Vec<Listing>>;

    async fn update_listing_members(&self, owner_id: UserId, members_count: i64) -> Result<()>;
}

/// Messaging collaborator.
#[async_trait]
pub trait TransportGateway: Send + Sync {
    /// User id of the acting agent itself.
    async fn agent_id(&self) -> Result<UserId>;

    /// Remove a member. Fails with `InsufficientRights` when the agent cannot restrict.
    async fn remove_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<()>;

    /// Lift a previous removal so the user may rejoin.
    async fn unban_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<()>;

    async fn get_member_role(&self, channel_id: ChannelId, user_id: UserId) -> Result<MemberRole>;

    async fn get_member_count(&self, channel_id: ChannelId) -> Result<i64>;

    async fn send_message(
        &self,
        channel_id: ChannelId,
        text: &str,
        buttons: &[PostButton],
    ) -> Result<()>;

    async fn send_photo(
        &self,
        channel_id: ChannelId,
        photo: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()>;

    async fn send_video(
        &self,
        channel_id: ChannelId,
        video: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()>;

    async fn send_document(
        &self,
        channel_id: ChannelId,
        document: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()>;

    async fn send_sticker(
        &self,
        channel_id: ChannelId,
        sticker: &str,
        buttons: &[PostButton],
    ) -> Result<()>;

    /// Deliver an owner-facing notification.
    async fn notify_owner(&self, owner_id: UserId, message: &OwnerMessage) -> Result<()>;
}
