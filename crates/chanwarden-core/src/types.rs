//! Domain records the engine reads from storage and acts upon.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChanwardenError;

pub type UserId = i64;
pub type ChannelId = i64;
pub type PostId = i64;

/// End date given to lead records so they never expire (9999-12-31).
pub fn lifetime_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── Subscriptions ──────────────────────────────────────

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Banned,
    Left,
    /// Lead-tracking record that never expires.
    PendingLifetime,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Banned => "banned",
            SubscriptionStatus::Left => "left",
            SubscriptionStatus::PendingLifetime => "pending_lifetime",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ChanwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "banned" => Ok(SubscriptionStatus::Banned),
            "left" => Ok(SubscriptionStatus::Left),
            "pending_lifetime" => Ok(SubscriptionStatus::PendingLifetime),
            other => Err(ChanwardenError::Storage(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// One user's time-bounded grant on one channel. Identity is (user_id, channel_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    /// Administrator of the channel; audience for notifications.
    pub owner_id: UserId,
    pub username: Option<String>,
    pub full_name: String,
    /// Opaque rank label.
    pub tier: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// Expiry is evaluated, never stored.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_at <= now
    }
}

// ─── Scheduled posts ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Sent,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Sent => "sent",
            PostStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = ChanwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "sent" => Ok(PostStatus::Sent),
            "failed" => Ok(PostStatus::Failed),
            other => Err(ChanwardenError::Storage(format!(
                "unknown post status '{other}'"
            ))),
        }
    }
}

/// Closed set of publishable content kinds. Each maps to one transport send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Photo,
    Video,
    Document,
    Sticker,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Photo => "photo",
            ContentType::Video => "video",
            ContentType::Document => "document",
            ContentType::Sticker => "sticker",
        }
    }

    /// Human label used in previews of media posts without a caption.
    pub fn label(&self) -> &'static str {
        match self {
            ContentType::Text => "Text",
            ContentType::Photo => "Photo",
            ContentType::Video => "Video",
            ContentType::Document => "Document",
            ContentType::Sticker => "Sticker",
        }
    }
}

impl FromStr for ContentType {
    type Err = ChanwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "photo" => Ok(ContentType::Photo),
            "video" => Ok(ContentType::Video),
            "document" => Ok(ContentType::Document),
            "sticker" => Ok(ContentType::Sticker),
            other => Err(ChanwardenError::UnsupportedContent(other.to_string())),
        }
    }
}

/// Inline URL button attached to a published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostButton {
    pub text: String,
    pub url: String,
}

/// Content queued for future delivery to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub post_id: PostId,
    pub owner_id: UserId,
    /// Explicit target; `None` falls back to the owner's default channel.
    pub channel_id: Option<ChannelId>,
    /// Raw content type as stored. Parsed at dispatch time.
    pub content_type: String,
    /// Text body or file reference, depending on the content type.
    pub content: String,
    pub caption: Option<String>,
    pub buttons: Vec<PostButton>,
    pub publish_at: DateTime<Utc>,
    pub status: PostStatus,
}

impl ScheduledPost {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Pending && self.publish_at <= now
    }
}

// ─── Channels ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Premium,
    Free,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Premium => "premium",
            ChannelKind::Free => "free",
        }
    }
}

impl FromStr for ChannelKind {
    type Err = ChanwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "premium" => Ok(ChannelKind::Premium),
            "free" => Ok(ChannelKind::Free),
            other => Err(ChanwardenError::Storage(format!(
                "unknown channel type '{other}'"
            ))),
        }
    }
}

/// Channel record, read-only for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub owner_id: UserId,
    pub title: Option<String>,
    pub kind: ChannelKind,
}

/// A channel whose member count is refreshed periodically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub owner_id: UserId,
    pub channel_id: ChannelId,
    pub members_count: i64,
}

// ─── Membership ──────────────────────────────────────

/// Role of a user on a channel, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Creator,
    Administrator { can_restrict_members: bool },
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberRole {
    /// Administrators and creators cannot be removed by an automated agent.
    pub fn is_untouchable(&self) -> bool {
        matches!(self, MemberRole::Creator | MemberRole::Administrator { .. })
    }
}

/// A user joining a tracked channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberJoin {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub username: Option<String>,
    pub full_name: String,
}

// ─── Owner notifications ──────────────────────────────────────

/// Callback button attached to an owner notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerAction {
    pub label: String,
    pub callback_data: String,
}

/// A message addressed to a channel owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerMessage {
    /// HTML-formatted body.
    pub text: String,
    pub actions: Vec<OwnerAction>,
    /// Deliver without sound.
    pub silent: bool,
}

impl OwnerMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
            silent: false,
        }
    }

    pub fn with_action(mut self, label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        self.actions.push(OwnerAction {
            label: label.into(),
            callback_data: callback_data.into(),
        });
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}
