//! Guild reconciliation
//!
//! Brings a guild's live resources in line with the desired topology:
//! one honoree role, one category, and an ordered set of text channels
//! under it. Every resource resolves the same way: cached id, then name,
//! then creation. A cached id is never trusted without seeing the resource
//! in the live snapshot.
//!
//! Remote failures are isolated per resource. A resource that exists but
//! cannot be repaired stays bound; only a resource that cannot be found or
//! created is unresolved. The cached record is updated with one partial
//! write containing only the attributes that changed.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use gotm_common::records::{load_guild_record, save_guild_changes, GuildResourceRecord, RecordChanges};
use gotm_common::ResourceStore;

use crate::chat::{
    Channel, ChannelEdit, ChannelId, ChannelKind, ChatError, ChatServer, GuildId, NewChannel,
    NewRole, OverwriteTarget, PermissionOverwrite, Permissions, Role, RoleEdit, RoleId,
};
use crate::error::BotError;

pub const HONOREE_ROLE_NAME: &str = "gumby";
pub const HONOREE_ROLE_COLOR: u32 = 0x2E_CC_71;
pub const CATEGORY_NAME: &str = "beyond";
pub const CATEGORY_POSITION: i32 = 0;

/// Logical name of the channel election results are posted to
pub const NOTIFICATION_CHANNEL: &str = "general";

/// One provisioned text channel: stable logical name and display name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSlot {
    pub logical: &'static str,
    pub display: &'static str,
}

/// Provisioned channels, in display order (index = position)
pub const GUILD_CHANNELS: [ChannelSlot; 4] = [
    ChannelSlot { logical: "general", display: "general" },
    ChannelSlot { logical: "development", display: "development" },
    ChannelSlot { logical: "bot", display: "bot-commands" },
    ChannelSlot { logical: "rules", display: "rules" },
];

/// Permissions granted to the honoree role. Never administrator or
/// manage-guild.
pub fn honoree_permissions() -> Permissions {
    Permissions::MANAGE_MESSAGES
        | Permissions::MANAGE_CHANNELS
        | Permissions::MANAGE_ROLES
        | Permissions::MANAGE_NICKNAMES
        | Permissions::KICK_MEMBERS
        | Permissions::MODERATE_MEMBERS
        | Permissions::VIEW_AUDIT_LOG
        | Permissions::CREATE_INSTANT_INVITE
}

/// Whether a resource was confirmed to exist during this reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding<Id> {
    Resolved(Id),
    Unresolved,
}

impl<Id: Copy> Binding<Id> {
    pub fn id(&self) -> Option<Id> {
        match self {
            Binding::Resolved(id) => Some(*id),
            Binding::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Binding::Resolved(_))
    }
}

/// A resource whose resolution or repair was abandoned this cycle
#[derive(Debug)]
pub struct ResourceFailure {
    pub resource: String,
    pub error: ChatError,
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub guild_id: GuildId,
    pub role: Binding<RoleId>,
    pub category: Binding<ChannelId>,
    pub channels: BTreeMap<&'static str, Binding<ChannelId>>,
    /// Best-known merged record. Failed resources keep their cached id.
    pub record: GuildResourceRecord,
    pub changes: RecordChanges,
    pub persisted: bool,
    /// Remote create/modify calls issued
    pub mutations: usize,
    pub failures: Vec<ResourceFailure>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn honoree_role(&self) -> Option<RoleId> {
        self.role.id()
    }

    pub fn channel(&self, logical: &str) -> Option<ChannelId> {
        self.channels.get(logical).and_then(Binding::id)
    }
}

/// A live resource id, with the error from a failed drift repair if any
struct Ensured<Id> {
    id: Id,
    repair_error: Option<ChatError>,
}

impl<Id> Ensured<Id> {
    fn in_line(id: Id) -> Self {
        Self { id, repair_error: None }
    }
}

fn note_repair_failure(
    failures: &mut Vec<ResourceFailure>,
    guild: GuildId,
    resource: String,
    repair_error: Option<ChatError>,
) {
    if let Some(error) = repair_error {
        warn!(guild_id = %guild, resource = %resource, "Resource kept but not repaired: {}", error);
        failures.push(ResourceFailure { resource, error });
    }
}

/// Live resource addressable by id and by name
trait Named {
    type Id: PartialEq + Copy;

    fn id(&self) -> Self::Id;
    fn name(&self) -> &str;
}

impl Named for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Channel {
    type Id = ChannelId;

    fn id(&self) -> ChannelId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// How a live resource was found
enum Lookup<'a, T> {
    ById(&'a T),
    ByName(&'a T),
    Missing,
}

/// Cached id first, then name. A stale cached id falls through to the name.
fn lookup<'a, T: Named>(live: &'a [T], cached: Option<T::Id>, name: &str) -> Lookup<'a, T> {
    if let Some(cached) = cached {
        if let Some(found) = live.iter().find(|r| r.id() == cached) {
            return Lookup::ById(found);
        }
    }
    match live.iter().find(|r| r.name() == name) {
        Some(found) => Lookup::ByName(found),
        None => Lookup::Missing,
    }
}

pub struct GuildReconciler {
    chat: Arc<dyn ChatServer>,
    store: ResourceStore,
}

impl GuildReconciler {
    pub fn new(chat: Arc<dyn ChatServer>, store: ResourceStore) -> Self {
        Self { chat, store }
    }

    /// Reconcile one guild and persist any rebinding.
    ///
    /// Only store failures are returned as errors; remote failures are
    /// collected in the report.
    pub async fn reconcile(&self, guild: GuildId) -> Result<ReconcileReport, BotError> {
        let cached = load_guild_record(&self.store, guild).await?;
        let mut record = cached.clone();
        let mut failures = Vec::new();
        let mut mutations = 0;

        let role = match self.ensure_role(guild, cached.honoree_role_id, &mut mutations).await {
            Ok(ensured) => {
                record.honoree_role_id = Some(ensured.id);
                note_repair_failure(&mut failures, guild, "role".to_string(), ensured.repair_error);
                Binding::Resolved(ensured.id)
            }
            Err(error) => {
                warn!(guild_id = %guild, "Could not reconcile honoree role: {}", error);
                failures.push(ResourceFailure {
                    resource: "role".to_string(),
                    error,
                });
                Binding::Unresolved
            }
        };

        let mut category = Binding::Unresolved;
        let mut channels = BTreeMap::new();

        match self.chat.channels(guild).await {
            Ok(live) => {
                match self
                    .ensure_category(guild, &live, cached.category_id, &mut mutations)
                    .await
                {
                    Ok(ensured) => {
                        record.category_id = Some(ensured.id);
                        category = Binding::Resolved(ensured.id);
                        note_repair_failure(
                            &mut failures,
                            guild,
                            "category".to_string(),
                            ensured.repair_error,
                        );
                    }
                    Err(error) => {
                        warn!(guild_id = %guild, "Could not reconcile category: {}", error);
                        failures.push(ResourceFailure {
                            resource: "category".to_string(),
                            error,
                        });
                    }
                }

                for (ordinal, slot) in GUILD_CHANNELS.iter().enumerate() {
                    let result = self
                        .ensure_channel(
                            guild,
                            &live,
                            slot,
                            ordinal as i32,
                            category.id(),
                            role.id(),
                            cached.channel(slot.logical),
                            &mut mutations,
                        )
                        .await;
                    match result {
                        Ok(ensured) => {
                            record.channels.insert(slot.logical.to_string(), ensured.id);
                            channels.insert(slot.logical, Binding::Resolved(ensured.id));
                            note_repair_failure(
                                &mut failures,
                                guild,
                                format!("channel:{}", slot.logical),
                                ensured.repair_error,
                            );
                        }
                        Err(error) => {
                            warn!(
                                guild_id = %guild,
                                channel = slot.logical,
                                "Could not reconcile channel: {}", error
                            );
                            failures.push(ResourceFailure {
                                resource: format!("channel:{}", slot.logical),
                                error,
                            });
                            channels.insert(slot.logical, Binding::Unresolved);
                        }
                    }
                }
            }
            Err(error) => {
                warn!(guild_id = %guild, "Could not list channels: {}", error);
                failures.push(ResourceFailure {
                    resource: "channels".to_string(),
                    error,
                });
                for slot in &GUILD_CHANNELS {
                    channels.insert(slot.logical, Binding::Unresolved);
                }
            }
        }

        let changes = cached.changes_to(&record);
        let persisted = save_guild_changes(&self.store, guild, &changes).await?;

        if persisted {
            info!(
                guild_id = %guild,
                changed = ?changes.changed_names(),
                "Guild resource record updated"
            );
        }
        debug!(
            guild_id = %guild,
            mutations,
            failures = failures.len(),
            "Guild reconciled"
        );

        Ok(ReconcileReport {
            guild_id: guild,
            role,
            category,
            channels,
            record,
            changes,
            persisted,
            mutations,
            failures,
        })
    }

    async fn ensure_role(
        &self,
        guild: GuildId,
        cached: Option<RoleId>,
        mutations: &mut usize,
    ) -> Result<Ensured<RoleId>, ChatError> {
        let roles = self.chat.roles(guild).await?;
        let found = lookup(&roles, cached, HONOREE_ROLE_NAME);

        match found {
            Lookup::ById(role) | Lookup::ByName(role) => {
                if role.name != HONOREE_ROLE_NAME || role.color != HONOREE_ROLE_COLOR {
                    info!(guild_id = %guild, role_id = %role.id, "Repairing honoree role name/color");
                    let edit = RoleEdit {
                        name: HONOREE_ROLE_NAME.to_string(),
                        color: HONOREE_ROLE_COLOR,
                    };
                    *mutations += 1;
                    let repair_error = self.chat.modify_role(guild, role.id, &edit).await.err();
                    return Ok(Ensured { id: role.id, repair_error });
                }
                Ok(Ensured::in_line(role.id))
            }
            Lookup::Missing => {
                info!(guild_id = %guild, "Creating honoree role");
                let new_role = NewRole {
                    name: HONOREE_ROLE_NAME.to_string(),
                    color: HONOREE_ROLE_COLOR,
                    permissions: honoree_permissions(),
                };
                *mutations += 1;
                let created = self.chat.create_role(guild, &new_role).await?;
                Ok(Ensured::in_line(created.id))
            }
        }
    }

    async fn ensure_category(
        &self,
        guild: GuildId,
        live: &[Channel],
        cached: Option<ChannelId>,
        mutations: &mut usize,
    ) -> Result<Ensured<ChannelId>, ChatError> {
        let categories: Vec<Channel> = live
            .iter()
            .filter(|c| c.kind == ChannelKind::Category)
            .cloned()
            .collect();
        let found = lookup(&categories, cached, CATEGORY_NAME);

        match found {
            Lookup::ById(category) | Lookup::ByName(category) => {
                if category.name != CATEGORY_NAME || category.position != CATEGORY_POSITION {
                    info!(guild_id = %guild, channel_id = %category.id, "Repairing category name/position");
                    let edit = ChannelEdit {
                        name: Some(CATEGORY_NAME.to_string()),
                        parent_id: None,
                        position: Some(CATEGORY_POSITION),
                    };
                    *mutations += 1;
                    let repair_error = self.chat.modify_channel(category.id, &edit).await.err();
                    return Ok(Ensured { id: category.id, repair_error });
                }
                Ok(Ensured::in_line(category.id))
            }
            Lookup::Missing => {
                info!(guild_id = %guild, "Creating category");
                let new_category = NewChannel {
                    name: CATEGORY_NAME.to_string(),
                    kind: ChannelKind::Category,
                    parent_id: None,
                    position: Some(CATEGORY_POSITION),
                    overwrites: Vec::new(),
                };
                *mutations += 1;
                let created = self.chat.create_channel(guild, &new_category).await?;
                Ok(Ensured::in_line(created.id))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn ensure_channel(
        &self,
        guild: GuildId,
        live: &[Channel],
        slot: &ChannelSlot,
        ordinal: i32,
        category: Option<ChannelId>,
        role: Option<RoleId>,
        cached: Option<ChannelId>,
        mutations: &mut usize,
    ) -> Result<Ensured<ChannelId>, ChatError> {
        let text_channels: Vec<Channel> = live
            .iter()
            .filter(|c| c.kind == ChannelKind::Text)
            .cloned()
            .collect();
        let found = lookup(&text_channels, cached, slot.display);

        match found {
            Lookup::ById(channel) | Lookup::ByName(channel) => {
                // Without a resolved category the parent is left as-is
                let wrong_parent = category.is_some() && channel.parent_id != category;
                let drifted =
                    wrong_parent || channel.name != slot.display || channel.position != ordinal;
                if drifted {
                    info!(
                        guild_id = %guild,
                        channel_id = %channel.id,
                        channel = slot.logical,
                        "Repairing channel category/name/position"
                    );
                    let edit = ChannelEdit {
                        name: Some(slot.display.to_string()),
                        parent_id: category,
                        position: Some(ordinal),
                    };
                    *mutations += 1;
                    let repair_error = self.chat.modify_channel(channel.id, &edit).await.err();
                    return Ok(Ensured { id: channel.id, repair_error });
                }
                Ok(Ensured::in_line(channel.id))
            }
            Lookup::Missing => {
                info!(guild_id = %guild, channel = slot.logical, "Creating channel");
                let overwrites = role
                    .map(|role| PermissionOverwrite {
                        target: OverwriteTarget::Role(role),
                        allow: Permissions::empty(),
                        deny: Permissions::MANAGE_CHANNELS,
                    })
                    .into_iter()
                    .collect();
                let new_channel = NewChannel {
                    name: slot.display.to_string(),
                    kind: ChannelKind::Text,
                    parent_id: category,
                    position: Some(ordinal),
                    overwrites,
                };
                *mutations += 1;
                let created = self.chat.create_channel(guild, &new_channel).await?;
                Ok(Ensured::in_line(created.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_honoree_permissions_exclude_guild_administration() {
        let perms = honoree_permissions();
        assert!(!perms.intersects(Permissions::ADMINISTRATOR | Permissions::MANAGE_GUILD));
        assert!(perms.contains(Permissions::MANAGE_ROLES | Permissions::VIEW_AUDIT_LOG));
    }

    #[test]
    fn test_channel_slots_are_unique_and_include_notification_channel() {
        let mut logical: Vec<_> = GUILD_CHANNELS.iter().map(|s| s.logical).collect();
        logical.sort_unstable();
        logical.dedup();
        assert_eq!(logical.len(), GUILD_CHANNELS.len());
        assert!(logical.contains(&NOTIFICATION_CHANNEL));
    }

    #[test]
    fn test_lookup_prefers_id_over_name() {
        let roles = vec![
            Role { id: RoleId(1), name: "gumby".into(), color: 0, permissions: Permissions::empty() },
            Role { id: RoleId(2), name: "renamed".into(), color: 0, permissions: Permissions::empty() },
        ];
        let by_id = lookup(&roles, Some(RoleId(2)), "gumby");
        assert!(matches!(by_id, Lookup::ById(r) if r.id == RoleId(2)));

        let stale = lookup(&roles, Some(RoleId(99)), "gumby");
        assert!(matches!(stale, Lookup::ByName(r) if r.id == RoleId(1)));

        let missing = lookup(&roles, None, "absent");
        assert!(matches!(missing, Lookup::Missing));
    }
}
