//! Shared test fixtures
//!
//! `MockChatServer` keeps every guild in memory and counts each mutating call
//! (including calls that were made to fail), so tests can assert on remote
//! side effects.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use gotm_bot::chat::{
    Channel, ChannelEdit, ChannelId, ChannelKind, ChatError, ChatServer, GuildId, Member,
    NewChannel, NewRole, Role, RoleEdit, RoleId, UserId,
};
use gotm_common::store::open_store;
use gotm_common::ResourceStore;

pub const BOT_ID: UserId = UserId(1);

/// Fresh in-memory resource store
pub async fn memory_store() -> ResourceStore {
    open_store(None, "beyond").await.unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct GuildState {
    pub roles: Vec<Role>,
    pub channels: Vec<Channel>,
    pub members: Vec<Member>,
}

/// Calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Guilds,
    Roles,
    Channels,
    CreateRole,
    ModifyRole,
    CreateChannel,
    ModifyChannel,
    Members,
    AddMemberRole,
    RemoveMemberRole,
    RemoveMember,
    SendMessage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Guild enumerations (not a mutation)
    pub guild_lists: usize,
    pub role_creates: usize,
    pub role_modifies: usize,
    pub channel_creates: usize,
    pub channel_modifies: usize,
    pub grants: usize,
    pub revokes: usize,
    pub removals: usize,
    pub messages: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.role_creates
            + self.role_modifies
            + self.channel_creates
            + self.channel_modifies
            + self.grants
            + self.revokes
            + self.removals
            + self.messages
    }
}

#[derive(Default)]
struct MockState {
    guilds: BTreeMap<GuildId, GuildState>,
    next_id: u64,
    counts: CallCounts,
    /// (operation, guild); `None` fails the operation everywhere
    failures: HashSet<(Op, Option<GuildId>)>,
    messages: Vec<(ChannelId, String)>,
}

impl MockState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self, op: Op, guild: Option<GuildId>) -> Result<(), ChatError> {
        let failing = self.failures.contains(&(op, None))
            || guild.map_or(false, |g| self.failures.contains(&(op, Some(g))));
        if failing {
            Err(ChatError::Api {
                status: 500,
                message: format!("injected {:?} failure", op),
            })
        } else {
            Ok(())
        }
    }

    fn guild_mut(&mut self, guild: GuildId) -> Result<&mut GuildState, ChatError> {
        self.guilds.get_mut(&guild).ok_or_else(|| ChatError::Api {
            status: 404,
            message: format!("Unknown Guild {}", guild),
        })
    }

    fn guild_of_channel(&self, channel: ChannelId) -> Option<GuildId> {
        self.guilds
            .iter()
            .find(|(_, g)| g.channels.iter().any(|c| c.id == channel))
            .map(|(id, _)| *id)
    }
}

pub struct MockChatServer {
    self_id: UserId,
    state: Mutex<MockState>,
}

impl MockChatServer {
    pub fn new() -> Self {
        Self {
            self_id: BOT_ID,
            state: Mutex::new(MockState {
                next_id: 10_000,
                ..MockState::default()
            }),
        }
    }

    pub fn add_guild(&self, guild: GuildId) {
        let mut state = self.state.lock().unwrap();
        state.guilds.entry(guild).or_default().members.push(Member {
            user_id: self.self_id,
            display_name: "gotm-bot".to_string(),
            is_bot: true,
            roles: Vec::new(),
        });
    }

    pub fn add_member(&self, guild: GuildId, user: u64, is_bot: bool) {
        self.add_member_with_roles(guild, user, is_bot, &[]);
    }

    pub fn add_member_with_roles(&self, guild: GuildId, user: u64, is_bot: bool, roles: &[RoleId]) {
        let mut state = self.state.lock().unwrap();
        state.guilds.entry(guild).or_default().members.push(Member {
            user_id: UserId(user),
            display_name: format!("user-{}", user),
            is_bot,
            roles: roles.to_vec(),
        });
    }

    /// Mutate a guild directly, bypassing call counters
    pub fn edit_guild<F: FnOnce(&mut GuildState)>(&self, guild: GuildId, f: F) {
        let mut state = self.state.lock().unwrap();
        f(state.guilds.entry(guild).or_default());
    }

    pub fn guild(&self, guild: GuildId) -> GuildState {
        self.state.lock().unwrap().guilds.get(&guild).cloned().unwrap_or_default()
    }

    pub fn role_holders(&self, guild: GuildId, role: RoleId) -> Vec<UserId> {
        self.guild(guild)
            .members
            .iter()
            .filter(|m| m.has_role(role))
            .map(|m| m.user_id)
            .collect()
    }

    pub fn counts(&self) -> CallCounts {
        self.state.lock().unwrap().counts
    }

    pub fn reset_counts(&self) {
        self.state.lock().unwrap().counts = CallCounts::default();
    }

    pub fn messages(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failures.insert((op, None));
    }

    pub fn fail_in(&self, op: Op, guild: GuildId) {
        self.state.lock().unwrap().failures.insert((op, Some(guild)));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }
}

#[async_trait]
impl ChatServer for MockChatServer {
    async fn current_user(&self) -> Result<UserId, ChatError> {
        Ok(self.self_id)
    }

    async fn guilds(&self) -> Result<Vec<GuildId>, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.guild_lists += 1;
        state.check(Op::Guilds, None)?;
        Ok(state.guilds.keys().copied().collect())
    }

    async fn roles(&self, guild: GuildId) -> Result<Vec<Role>, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::Roles, Some(guild))?;
        Ok(state.guild_mut(guild)?.roles.clone())
    }

    async fn channels(&self, guild: GuildId) -> Result<Vec<Channel>, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::Channels, Some(guild))?;
        Ok(state.guild_mut(guild)?.channels.clone())
    }

    async fn create_role(&self, guild: GuildId, role: &NewRole) -> Result<Role, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.role_creates += 1;
        state.check(Op::CreateRole, Some(guild))?;
        let created = Role {
            id: RoleId(state.allocate()),
            name: role.name.clone(),
            color: role.color,
            permissions: role.permissions,
        };
        state.guild_mut(guild)?.roles.push(created.clone());
        Ok(created)
    }

    async fn modify_role(&self, guild: GuildId, role: RoleId, edit: &RoleEdit) -> Result<Role, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.role_modifies += 1;
        state.check(Op::ModifyRole, Some(guild))?;
        let existing = state
            .guild_mut(guild)?
            .roles
            .iter_mut()
            .find(|r| r.id == role)
            .ok_or_else(|| ChatError::Api {
                status: 404,
                message: "Unknown Role".to_string(),
            })?;
        existing.name = edit.name.clone();
        existing.color = edit.color;
        Ok(existing.clone())
    }

    async fn create_channel(&self, guild: GuildId, channel: &NewChannel) -> Result<Channel, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.channel_creates += 1;
        state.check(Op::CreateChannel, Some(guild))?;
        let id = ChannelId(state.allocate());
        let channels = &mut state.guild_mut(guild)?.channels;
        let created = Channel {
            id,
            kind: channel.kind,
            name: channel.name.clone(),
            parent_id: channel.parent_id,
            position: channel.position.unwrap_or(channels.len() as i32),
            overwrites: channel.overwrites.clone(),
        };
        channels.push(created.clone());
        Ok(created)
    }

    async fn modify_channel(&self, channel: ChannelId, edit: &ChannelEdit) -> Result<Channel, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.channel_modifies += 1;
        let guild = state.guild_of_channel(channel);
        state.check(Op::ModifyChannel, guild)?;
        let unknown = || ChatError::Api {
            status: 404,
            message: "Unknown Channel".to_string(),
        };
        let guild = guild.ok_or_else(unknown)?;
        let existing = state
            .guild_mut(guild)?
            .channels
            .iter_mut()
            .find(|c| c.id == channel)
            .ok_or_else(unknown)?;
        if let Some(name) = &edit.name {
            existing.name = name.clone();
        }
        if let Some(parent) = edit.parent_id {
            existing.parent_id = Some(parent);
        }
        if let Some(position) = edit.position {
            existing.position = position;
        }
        Ok(existing.clone())
    }

    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.check(Op::Members, Some(guild))?;
        Ok(state.guild_mut(guild)?.members.clone())
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.grants += 1;
        state.check(Op::AddMemberRole, Some(guild))?;
        if let Some(member) = state.guild_mut(guild)?.members.iter_mut().find(|m| m.user_id == user) {
            if !member.roles.contains(&role) {
                member.roles.push(role);
            }
        }
        Ok(())
    }

    async fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.revokes += 1;
        state.check(Op::RemoveMemberRole, Some(guild))?;
        if let Some(member) = state.guild_mut(guild)?.members.iter_mut().find(|m| m.user_id == user) {
            member.roles.retain(|r| *r != role);
        }
        Ok(())
    }

    async fn remove_member(&self, guild: GuildId, user: UserId, _reason: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.removals += 1;
        state.check(Op::RemoveMember, Some(guild))?;
        state.guild_mut(guild)?.members.retain(|m| m.user_id != user);
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.counts.messages += 1;
        let guild = state.guild_of_channel(channel);
        state.check(Op::SendMessage, guild)?;
        state.messages.push((channel, content.to_string()));
        Ok(())
    }
}

/// Channel with the given kind and display name, if present
pub fn find_channel(state: &GuildState, kind: ChannelKind, name: &str) -> Option<Channel> {
    state
        .channels
        .iter()
        .find(|c| c.kind == kind && c.name == name)
        .cloned()
}
