//! Post Publication Pipeline: delivers due scheduled posts.
//!
//! Delivery is at-most-once: a failed send is marked `failed` and never
//! retried, since revoked permissions or a deleted channel fail identically
//! on every later tick.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chanwarden_core::error::Result;
use chanwarden_core::traits::{PersistenceGateway, TransportGateway};
use chanwarden_core::types::{ChannelId, ContentType, PostStatus, ScheduledPost};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::messages;
use crate::notify::RateLimitedNotifier;

/// Fallback label when the channel record carries no title.
const UNTITLED_CHANNEL: &str = "channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Sent,
    Failed,
    /// Storage hiccup; the post stays pending for the next tick.
    Deferred,
}

/// Counters for one publication run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub deferred: usize,
}

pub struct PublicationPipeline {
    store: Arc<dyn PersistenceGateway>,
    transport: Arc<dyn TransportGateway>,
    notifier: Arc<RateLimitedNotifier>,
    pacing: Duration,
}

impl PublicationPipeline {
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

    /// Publish every post that is pending and due at `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> PublishReport {
        let mut report = PublishReport::default();
        let posts = match self.store.list_due_pending_posts(now).await {
            Ok(posts) => posts,
            Err(e) => {
                tracing::error!("❌ Due post query failed: {e}");
                return report;
            }
        };
        if posts.is_empty() {
            return report;
        }

        report.due = posts.len();
        tracing::info!("📬 Publishing {} scheduled posts", posts.len());

        let mut dispatched = false;
        for post in &posts {
            match self.publish(post, &mut dispatched).await {
                PostOutcome::Sent => report.sent += 1,
                PostOutcome::Failed => report.failed += 1,
                PostOutcome::Deferred => report.deferred += 1,
            }
        }
        report
    }

    async fn publish(&self, post: &ScheduledPost, dispatched: &mut bool) -> PostOutcome {
        let kind = match ContentType::from_str(&post.content_type) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::error!(post_id = post.post_id, "❌ Post cannot be published: {e}");
                self.set_status(post, PostStatus::Failed).await;
                return PostOutcome::Failed;
            }
        };

        let channel_id = match self.resolve_channel(post).await {
            Ok(Some(channel_id)) => channel_id,
            Ok(None) => {
                tracing::warn!(
                    post_id = post.post_id,
                    owner_id = post.owner_id,
                    "⚠️ No target channel for post, marking failed"
                );
                self.set_status(post, PostStatus::Failed).await;
                return PostOutcome::Failed;
            }
            Err(e) => {
                tracing::warn!(post_id = post.post_id, "⚠️ Channel lookup failed: {e}");
                return PostOutcome::Deferred;
            }
        };

        if *dispatched {
            tokio::time::sleep(self.pacing).await;
        }
        *dispatched = true;

        match self.dispatch(kind, channel_id, post).await {
            Ok(()) => {
                tracing::info!(post_id = post.post_id, channel_id, "✅ Post published");
                self.set_status(post, PostStatus::Sent).await;
                self.confirm(post, channel_id).await;
                PostOutcome::Sent
            }
            Err(e) => {
                tracing::error!(post_id = post.post_id, channel_id, "❌ Post delivery failed: {e}");
                self.set_status(post, PostStatus::Failed).await;
                PostOutcome::Failed
            }
        }
    }

    /// The post's own channel, else the owner's default.
    async fn resolve_channel(&self, post: &ScheduledPost) -> Result<Option<ChannelId>> {
        match post.channel_id {
            Some(channel_id) => Ok(Some(channel_id)),
            None => self.store.get_owner_default_channel(post.owner_id).await,
        }
    }

    async fn dispatch(&self, kind: ContentType, channel_id: ChannelId, post: &ScheduledPost) -> Result<()> {
        let caption = post.caption.as_deref();
        let buttons = &post.buttons;
        match kind {
            ContentType::Text => {
                self.transport
                    .send_message(channel_id, &post.content, buttons)
                    .await
            }
            ContentType::Photo => {
                self.transport
                    .send_photo(channel_id, &post.content, caption, buttons)
                    .await
            }
            ContentType::Video => {
                self.transport
                    .send_video(channel_id, &post.content, caption, buttons)
                    .await
            }
            ContentType::Document => {
                self.transport
                    .send_document(channel_id, &post.content, caption, buttons)
                    .await
            }
            ContentType::Sticker => {
                self.transport
                    .send_sticker(channel_id, &post.content, buttons)
                    .await
            }
        }
    }

    async fn set_status(&self, post: &ScheduledPost, status: PostStatus) {
        if let Err(e) = self.store.update_post_status(post.post_id, status).await {
            tracing::error!(post_id = post.post_id, "❌ Failed to store post status {status}: {e}");
        }
    }

    async fn confirm(&self, post: &ScheduledPost, channel_id: ChannelId) {
        let title = match self.store.get_channel(channel_id).await {
            Ok(Some(channel)) => channel.title,
            _ => None,
        }
        .unwrap_or_else(|| UNTITLED_CHANNEL.to_string());

        let message = messages::post_published(post, &title);
        if let Err(e) = self.notifier.notify(post.owner_id, &message).await {
            tracing::warn!(owner_id = post.owner_id, "⚠️ Publication confirmation failed: {e}");
        }
    }
}
