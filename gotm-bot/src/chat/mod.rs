//! Chat-server collaborator boundary
//!
//! Everything the bot needs from the chat server goes through [`ChatServer`].
//! The production implementation is [`DiscordClient`]; tests substitute an
//! in-memory double.

mod discord;

pub use discord::DiscordClient;
pub use gotm_common::{ChannelId, GuildId, RoleId, UserId};

use async_trait::async_trait;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;
use thiserror::Error;

/// Failure of one chat-server call
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Permission bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u64);

impl Permissions {
    pub const CREATE_INSTANT_INVITE: Permissions = Permissions(1 << 0);
    pub const KICK_MEMBERS: Permissions = Permissions(1 << 1);
    pub const BAN_MEMBERS: Permissions = Permissions(1 << 2);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const MANAGE_CHANNELS: Permissions = Permissions(1 << 4);
    pub const MANAGE_GUILD: Permissions = Permissions(1 << 5);
    pub const VIEW_AUDIT_LOG: Permissions = Permissions(1 << 7);
    pub const MANAGE_MESSAGES: Permissions = Permissions(1 << 13);
    pub const MANAGE_NICKNAMES: Permissions = Permissions(1 << 27);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);
    pub const MODERATE_MEMBERS: Permissions = Permissions(1 << 40);

    pub const fn empty() -> Self {
        Permissions(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Permissions(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Permissions) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Permissions) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub color: u32,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Category,
    /// Voice, forum, thread, ... (never provisioned by the bot)
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteTarget {
    Role(RoleId),
    Member(UserId),
}

/// Channel-level permission override for one role or member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub name: String,
    pub parent_id: Option<ChannelId>,
    pub position: i32,
    pub overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub is_bot: bool,
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    pub color: u32,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEdit {
    pub name: String,
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
    pub position: Option<i32>,
    pub overwrites: Vec<PermissionOverwrite>,
}

/// Channel modification; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelEdit {
    pub name: Option<String>,
    pub parent_id: Option<ChannelId>,
    pub position: Option<i32>,
}

/// Operations consumed from the chat server.
///
/// The boundary is assumed reliable but rate-limited; implementations do not
/// retry.
#[async_trait]
pub trait ChatServer: Send + Sync {
    /// The bot's own account
    async fn current_user(&self) -> Result<UserId, ChatError>;

    /// Every guild the bot belongs to
    async fn guilds(&self) -> Result<Vec<GuildId>, ChatError>;

    async fn roles(&self, guild: GuildId) -> Result<Vec<Role>, ChatError>;

    /// Categories and channels of every kind
    async fn channels(&self, guild: GuildId) -> Result<Vec<Channel>, ChatError>;

    async fn create_role(&self, guild: GuildId, role: &NewRole) -> Result<Role, ChatError>;

    async fn modify_role(&self, guild: GuildId, role: RoleId, edit: &RoleEdit) -> Result<Role, ChatError>;

    async fn create_channel(&self, guild: GuildId, channel: &NewChannel) -> Result<Channel, ChatError>;

    async fn modify_channel(&self, channel: ChannelId, edit: &ChannelEdit) -> Result<Channel, ChatError>;

    /// Full member list; implementations download every page before returning
    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, ChatError>;

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ChatError>;

    async fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ChatError>;

    async fn remove_member(&self, guild: GuildId, user: UserId, reason: &str) -> Result<(), ChatError>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), ChatError>;
}
