//! Permission-aware pre-check before removing a member.
//!
//! The check is an optimisation, not a safety gate: when the transport cannot
//! answer, removal is assumed possible and the removal call itself reports the
//! definitive error.

use std::collections::HashMap;
use std::sync::Arc;

use chanwarden_core::traits::TransportGateway;
use chanwarden_core::types::{ChannelId, MemberRole, UserId};

/// Whether the agent can remove members from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Allowed,
    MissingRestrictRight,
}

/// Combined verdict for one (channel, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    MissingRestrictRight,
    Untouchable,
}

/// Lives for a single sweep pass; caches the agent's capability per channel.
pub struct Enforcer {
    transport: Arc<dyn TransportGateway>,
    agent_id: Option<UserId>,
    capabilities: HashMap<ChannelId, Capability>,
}

impl Enforcer {
    pub fn new(transport: Arc<dyn TransportGateway>) -> Self {
        Self {
            transport,
            agent_id: None,
            capabilities: HashMap::new(),
        }
    }

    /// Can the agent restrict members on this channel? Cached per channel.
    pub async fn can_enforce(&mut self, channel_id: ChannelId) -> Capability {
        if let Some(cap) = self.capabilities.get(&channel_id) {
            return *cap;
        }
        let cap = match self.agent_role(channel_id).await {
            Some(MemberRole::Administrator {
                can_restrict_members: false,
            }) => {
                tracing::warn!(channel_id, "🔒 Bot lacks the ban right on channel");
                Capability::MissingRestrictRight
            }
            _ => Capability::Allowed,
        };
        self.capabilities.insert(channel_id, cap);
        cap
    }

    /// True when the target is an administrator or creator of the channel.
    pub async fn is_untouchable(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        match self.transport.get_member_role(channel_id, user_id).await {
            Ok(role) => role.is_untouchable(),
            Err(e) => {
                tracing::debug!(channel_id, user_id, "Member role lookup failed: {e}");
                false
            }
        }
    }

    /// Remember a rights rejection surfaced by the removal call itself.
    pub fn mark_missing_right(&mut self, channel_id: ChannelId) {
        self.capabilities
            .insert(channel_id, Capability::MissingRestrictRight);
    }

    /// Capability first, then the target's role.
    pub async fn check(&mut self, channel_id: ChannelId, user_id: UserId) -> Verdict {
        if self.can_enforce(channel_id).await == Capability::MissingRestrictRight {
            return Verdict::MissingRestrictRight;
        }
        if self.is_untouchable(channel_id, user_id).await {
            return Verdict::Untouchable;
        }
        Verdict::Allowed
    }

    async fn agent_role(&mut self, channel_id: ChannelId) -> Option<MemberRole> {
        let agent_id = match self.agent_id {
            Some(id) => id,
            None => match self.transport.agent_id().await {
                Ok(id) => {
                    self.agent_id = Some(id);
                    id
                }
                Err(e) => {
                    tracing::debug!("Agent identity lookup failed: {e}");
                    return None;
                }
            },
        };
        match self.transport.get_member_role(channel_id, agent_id).await {
            Ok(role) => Some(role),
            Err(e) => {
                tracing::debug!(channel_id, "Bot permission check failed: {e}");
                None
            }
        }
    }
}
