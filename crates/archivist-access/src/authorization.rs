//! Stateless authorization predicates over an explicit context value.
//!
//! Absence of privilege is an ordinary `false`, never an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::channel_registration::{ChannelRegistration, ChannelRegistrationFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Role an actor holds for one invocation.
pub enum ActorRole {
    Unauthorized,
    LocalAdmin,
    BotAdmin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::LocalAdmin => "local_admin",
            Self::BotAdmin => "bot_admin",
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Bot admins plus an immutable registration snapshot, passed into every call.
pub struct AuthorizationContext {
    bot_admins: BTreeSet<String>,
    registrations: Arc<ChannelRegistrationFile>,
}

impl AuthorizationContext {
    pub fn new<I, S>(bot_admins: I, registrations: ChannelRegistrationFile) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bot_admins = bot_admins
            .into_iter()
            .map(Into::into)
            .map(|actor: String| actor.trim().to_string())
            .filter(|actor| !actor.is_empty())
            .collect();
        Self {
            bot_admins,
            registrations: Arc::new(registrations),
        }
    }

    pub fn registrations(&self) -> &ChannelRegistrationFile {
        self.registrations.as_ref()
    }

    fn registration(&self, channel_id: &str) -> Option<&ChannelRegistration> {
        self.registrations.registration(channel_id)
    }

    pub fn is_bot_admin(&self, actor_id: &str) -> bool {
        let actor_id = actor_id.trim();
        !actor_id.is_empty() && self.bot_admins.contains(actor_id)
    }

    /// Bot admins satisfy the local check for every channel.
    pub fn is_local_admin(&self, actor_id: &str, channel_id: &str) -> bool {
        let actor_id = actor_id.trim();
        if actor_id.is_empty() {
            return false;
        }
        if self.is_bot_admin(actor_id) {
            return true;
        }
        self.registration(channel_id)
            .map(|registration| registration.has_local_admin(actor_id))
            .unwrap_or(false)
    }

    pub fn is_channel_registered(&self, channel_id: &str) -> bool {
        self.registration(channel_id).is_some()
    }

    pub fn is_designated_admin_channel(&self, channel_id: &str) -> bool {
        self.registrations.is_admin_channel(channel_id)
    }

    /// False for unregistered channels.
    pub fn commands_allowed(&self, channel_id: &str) -> bool {
        self.registration(channel_id)
            .map(|registration| registration.allow_commands)
            .unwrap_or(false)
    }

    pub fn is_commandable_channel(&self, channel_id: &str) -> bool {
        self.commands_allowed(channel_id) || self.is_designated_admin_channel(channel_id)
    }

    pub fn registered_channel_ids(&self) -> Vec<String> {
        self.registrations.channel_ids()
    }

    pub fn resolve_actor_role(&self, actor_id: &str, channel_id: &str) -> ActorRole {
        if self.is_bot_admin(actor_id) {
            ActorRole::BotAdmin
        } else if self.is_local_admin(actor_id, channel_id) {
            ActorRole::LocalAdmin
        } else {
            ActorRole::Unauthorized
        }
    }
}
