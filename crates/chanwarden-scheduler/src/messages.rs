//! Owner-facing notification texts (Telegram HTML).

use chanwarden_core::types::{
    ChannelId, ContentType, MemberJoin, OwnerMessage, ScheduledPost, Subscription, UserId,
};
use std::str::FromStr;

use crate::lifecycle::UndoBan;

/// Characters kept in a post preview.
const PREVIEW_CHARS: usize = 100;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn user_link(user_id: UserId, label: &str) -> String {
    format!("<a href='tg://user?id={user_id}'>{}</a>", escape_html(label))
}

fn username_or_placeholder(username: Option<&str>) -> String {
    match username {
        Some(u) if !u.is_empty() => format!("@{}", escape_html(u)),
        _ => "none".into(),
    }
}

/// First 100 chars of the text or caption, else a content-type label.
pub fn content_preview(post: &ScheduledPost) -> String {
    let source = match post.content_type.as_str() {
        "text" if !post.content.is_empty() => Some(post.content.as_str()),
        _ => post.caption.as_deref().filter(|c| !c.is_empty()),
    };
    match source {
        Some(text) => {
            let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
            if text.chars().count() > PREVIEW_CHARS {
                preview.push('…');
            }
            preview
        }
        None => ContentType::from_str(&post.content_type)
            .map(|t| t.label().to_string())
            .unwrap_or_else(|_| post.content_type.clone()),
    }
}

pub fn missing_ban_right(channel_id: ChannelId) -> OwnerMessage {
    OwnerMessage::new(format!(
        "⚠️ <b>Auto-kick cannot run</b>\n\n\
         The bot is an administrator of channel <code>{channel_id}</code> but lacks the \
         <b>\"Ban users\"</b> right.\n\n\
         📌 <b>How to fix:</b> Channel → Settings → <b>Administrators</b> → select the bot → \
         enable <b>\"Ban users\"</b>.\n\n\
         Expired subscriptions on this channel were marked as banned and must be removed manually."
    ))
}

pub fn untouchable_member(sub: &Subscription) -> OwnerMessage {
    OwnerMessage::new(format!(
        "⚠️ <b>Auto-kick skipped</b>\n\n\
         {} (<code>{}</code>) has an expired subscription but is an \
         <b>administrator or owner</b> of the channel.\n\n\
         The bot cannot remove administrators. <b>Remove them manually</b> \
         (Administrators → select user → Remove).\n\n\
         The subscription was marked as banned.",
        user_link(sub.user_id, &sub.full_name),
        sub.user_id
    ))
}

pub fn member_removed(sub: &Subscription) -> OwnerMessage {
    let undo = UndoBan {
        user_id: sub.user_id,
        channel_id: sub.channel_id,
        owner_id: sub.owner_id,
    };
    OwnerMessage::new(format!(
        "🚫 <b>Auto-ban: user removed from channel</b>\n\n\
         👤 {}\n\
         🏷️ Username: {}\n\
         💎 Tier: {}\n\
         📅 Expired: {}\n\n\
         📝 <b>Reason:</b> subscription expired",
        user_link(sub.user_id, &sub.full_name),
        username_or_placeholder(sub.username.as_deref()),
        escape_html(&sub.tier),
        sub.end_at.format("%Y-%m-%d %H:%M"),
    ))
    .with_action("↩️ Undo ban", undo.callback_data())
}

pub fn ban_undone(undo: &UndoBan) -> OwnerMessage {
    OwnerMessage::new(format!(
        "↩️ <b>Ban undone</b>\n\nUser <code>{}</code> can rejoin channel <code>{}</code>.",
        undo.user_id, undo.channel_id
    ))
}

pub fn member_left(sub: &Subscription) -> OwnerMessage {
    OwnerMessage::new(format!(
        "👋 <b>User left your premium channel</b>\n\n\
         👤 {}\n\
         🏷️ Username: {}\n\
         💎 Tier: {}",
        user_link(sub.user_id, &sub.full_name),
        username_or_placeholder(sub.username.as_deref()),
        escape_html(&sub.tier),
    ))
}

pub fn premium_join(join: &MemberJoin) -> OwnerMessage {
    OwnerMessage::new(format!(
        "👋 <b>New user on premium!</b>\n\n\
         👤 {}\n\
         🏷️ Username: {}\n\
         🆔 ID: <code>{}</code>\n\n\
         ⚙️ <b>Choose a subscription tier:</b>",
        user_link(join.user_id, &join.full_name),
        username_or_placeholder(join.username.as_deref()),
        join.user_id,
    ))
    .with_action(
        "⚙️ Set tier",
        format!("set_tier:{}:{}", join.user_id, join.channel_id),
    )
}

pub fn new_lead(join: &MemberJoin) -> OwnerMessage {
    let contact = match join.username.as_deref() {
        Some(u) if !u.is_empty() => user_link(join.user_id, &format!("@{u}")),
        _ => user_link(join.user_id, "Message the lead"),
    };
    OwnerMessage::new(format!(
        "🔔 <b>New lead</b> (free channel)\n\n\
         👤 {}\n\
         🏷️ {}\n\n\
         💬 <i>Reach out while they are warm.</i>",
        user_link(join.user_id, &join.full_name),
        contact,
    ))
    .silent()
}

pub fn post_published(post: &ScheduledPost, channel_title: &str) -> OwnerMessage {
    OwnerMessage::new(format!(
        "✅ <b>Post published</b>\n\n\
         📢 <b>Channel:</b> {}\n\
         📝 <b>Content:</b> {}\n\n\
         🕐 Scheduled for: {}",
        escape_html(channel_title),
        escape_html(&content_preview(post)),
        post.publish_at.format("%d.%m.%Y %H:%M"),
    ))
    .silent()
}
