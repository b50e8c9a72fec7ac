//! Typed records over the Resource Store
//!
//! | Record | partition | sort key | payload |
//! |---|---|---|---|
//! | Guild resources | guildId | `information` | role/category/channel ids |
//! | Ballot | guildId | `election/<period>/<voterId>` | `candidateId` |
//! | Election result | guildId | `election/<period>` | `honoreeId` |

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use crate::store::{Attributes, Item, ItemKey, ResourceStore};
use crate::{Error, Period, Result};

pub const INFORMATION_TAG: &str = "information";
pub const HONOREE_ROLE_ATTR: &str = "honoreeRoleId";
pub const CATEGORY_ATTR: &str = "categoryId";
pub const CANDIDATE_ATTR: &str = "candidateId";
pub const HONOREE_ATTR: &str = "honoreeId";

// ============================================================================
// Guild resource record
// ============================================================================

/// Last-known identifiers of the resources provisioned in one guild.
///
/// Identifiers here are a cache: the resource they name may have been deleted
/// remotely since they were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildResourceRecord {
    pub guild_id: GuildId,
    pub honoree_role_id: Option<RoleId>,
    pub category_id: Option<ChannelId>,
    /// Logical channel name (`general`, `rules`, ...) -> channel id
    pub channels: BTreeMap<String, ChannelId>,
}

impl GuildResourceRecord {
    pub fn empty(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            honoree_role_id: None,
            category_id: None,
            channels: BTreeMap::new(),
        }
    }

    pub fn key(guild_id: GuildId) -> ItemKey {
        ItemKey::new(guild_id.to_string(), INFORMATION_TAG)
    }

    pub fn channel(&self, logical: &str) -> Option<ChannelId> {
        self.channels.get(logical).copied()
    }

    /// Decode from a stored item. Unparseable identifiers are dropped with a
    /// warning; reconciliation will rediscover the resource by name.
    pub fn from_item(guild_id: GuildId, item: &Item) -> Self {
        let mut record = Self::empty(guild_id);
        for (name, value) in &item.attributes {
            let Some(raw) = id_text(value) else {
                warn!(guild_id = %guild_id, attribute = %name, "Ignoring non-identifier attribute");
                continue;
            };
            let parsed: std::result::Result<u64, _> = raw.parse();
            let Ok(id) = parsed else {
                warn!(guild_id = %guild_id, attribute = %name, value = %raw, "Ignoring malformed identifier");
                continue;
            };
            match name.as_str() {
                HONOREE_ROLE_ATTR => record.honoree_role_id = Some(RoleId(id)),
                CATEGORY_ATTR => record.category_id = Some(ChannelId(id)),
                logical => {
                    record.channels.insert(logical.to_string(), ChannelId(id));
                }
            }
        }
        record
    }

    pub fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(role) = self.honoree_role_id {
            attributes.insert(HONOREE_ROLE_ATTR.to_string(), Value::String(role.to_string()));
        }
        if let Some(category) = self.category_id {
            attributes.insert(CATEGORY_ATTR.to_string(), Value::String(category.to_string()));
        }
        for (logical, channel) in &self.channels {
            attributes.insert(logical.clone(), Value::String(channel.to_string()));
        }
        attributes
    }

    /// Attributes that are set in `updated` and differ from `self`.
    ///
    /// Fields that became unset are not part of the changeset: the record is
    /// only ever rebound to a live resource, never cleared.
    pub fn changes_to(&self, updated: &GuildResourceRecord) -> RecordChanges {
        let before = self.to_attributes();
        let attributes = updated
            .to_attributes()
            .into_iter()
            .filter(|(name, value)| before.get(name) != Some(value))
            .collect();
        RecordChanges { attributes }
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        _ => None,
    }
}

/// Explicit changeset for a guild resource record, applied as one partial update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordChanges {
    attributes: Attributes,
}

impl RecordChanges {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn changed_names(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }
}

/// Load the cached record, or an empty one when the guild was never reconciled
pub async fn load_guild_record(store: &ResourceStore, guild_id: GuildId) -> Result<GuildResourceRecord> {
    let item = store.get(&GuildResourceRecord::key(guild_id)).await?;
    Ok(item
        .map(|item| GuildResourceRecord::from_item(guild_id, &item))
        .unwrap_or_else(|| GuildResourceRecord::empty(guild_id)))
}

/// Persist a changeset; returns whether a write happened
pub async fn save_guild_changes(
    store: &ResourceStore,
    guild_id: GuildId,
    changes: &RecordChanges,
) -> Result<bool> {
    if changes.is_empty() {
        return Ok(false);
    }
    store
        .update(&GuildResourceRecord::key(guild_id), changes.attributes())
        .await?;
    Ok(true)
}

// ============================================================================
// Ballots
// ============================================================================

/// One voter's current choice for a period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotRecord {
    pub guild_id: GuildId,
    pub period: Period,
    pub voter_id: UserId,
    pub candidate_id: UserId,
}

impl BallotRecord {
    pub fn tag(period: Period, voter_id: UserId) -> String {
        format!("{}{}", Self::prefix(period), voter_id)
    }

    /// Sort-key prefix shared by every ballot of `period`
    pub fn prefix(period: Period) -> String {
        format!("election/{}/", period)
    }

    pub fn key(guild_id: GuildId, period: Period, voter_id: UserId) -> ItemKey {
        ItemKey::new(guild_id.to_string(), Self::tag(period, voter_id))
    }

    fn to_item(&self) -> Item {
        let mut attributes = Attributes::new();
        attributes.insert(
            CANDIDATE_ATTR.to_string(),
            Value::String(self.candidate_id.to_string()),
        );
        Item::new(Self::key(self.guild_id, self.period, self.voter_id), attributes)
    }

    fn from_item(guild_id: GuildId, period: Period, item: &Item) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRecord {
            endpoint: item.key.endpoint.clone(),
            tag: item.key.tag.clone(),
            reason: reason.to_string(),
        };
        let voter_id = item
            .key
            .tag
            .strip_prefix(&Self::prefix(period))
            .and_then(|voter| voter.parse().ok())
            .ok_or_else(|| invalid("tag does not name a voter"))?;
        let candidate_id = item
            .attributes
            .get(CANDIDATE_ATTR)
            .and_then(id_text)
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| invalid("missing or malformed candidateId"))?;
        Ok(Self {
            guild_id,
            period,
            voter_id,
            candidate_id,
        })
    }
}

pub async fn get_ballot(
    store: &ResourceStore,
    guild_id: GuildId,
    period: Period,
    voter_id: UserId,
) -> Result<Option<BallotRecord>> {
    let item = store.get(&BallotRecord::key(guild_id, period, voter_id)).await?;
    item.map(|item| BallotRecord::from_item(guild_id, period, &item))
        .transpose()
}

/// Write a fresh ballot (whole item)
pub async fn put_ballot(store: &ResourceStore, ballot: &BallotRecord) -> Result<()> {
    store.put(&ballot.to_item()).await
}

/// Rebind an existing ballot to a new candidate (partial update)
pub async fn update_ballot_candidate(store: &ResourceStore, ballot: &BallotRecord) -> Result<()> {
    let item = ballot.to_item();
    store.update(&item.key, &item.attributes).await
}

/// Every well-formed ballot cast in `period`, in sort-key order.
/// Malformed ballots are skipped with a warning.
pub async fn list_ballots(
    store: &ResourceStore,
    guild_id: GuildId,
    period: Period,
) -> Result<Vec<BallotRecord>> {
    let items = store
        .query(&guild_id.to_string(), &BallotRecord::prefix(period))
        .await?;

    Ok(items
        .iter()
        .filter_map(|item| match BallotRecord::from_item(guild_id, period, item) {
            Ok(ballot) => Some(ballot),
            Err(e) => {
                warn!(guild_id = %guild_id, period = %period, "Skipping ballot: {}", e);
                None
            }
        })
        .collect())
}

// ============================================================================
// Election results
// ============================================================================

/// Finalized outcome of one (guild, period) election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionResultRecord {
    pub guild_id: GuildId,
    pub period: Period,
    pub honoree_id: UserId,
}

impl ElectionResultRecord {
    pub fn tag(period: Period) -> String {
        format!("election/{}", period)
    }

    pub fn key(guild_id: GuildId, period: Period) -> ItemKey {
        ItemKey::new(guild_id.to_string(), Self::tag(period))
    }
}

pub async fn get_election_result(
    store: &ResourceStore,
    guild_id: GuildId,
    period: Period,
) -> Result<Option<ElectionResultRecord>> {
    let key = ElectionResultRecord::key(guild_id, period);
    let Some(item) = store.get(&key).await? else {
        return Ok(None);
    };
    let honoree_id = item
        .attributes
        .get(HONOREE_ATTR)
        .and_then(id_text)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Error::InvalidRecord {
            endpoint: key.endpoint.clone(),
            tag: key.tag.clone(),
            reason: "missing or malformed honoreeId".to_string(),
        })?;
    Ok(Some(ElectionResultRecord {
        guild_id,
        period,
        honoree_id,
    }))
}

/// Finalization commit for a period
pub async fn put_election_result(store: &ResourceStore, result: &ElectionResultRecord) -> Result<()> {
    let mut attributes = Attributes::new();
    attributes.insert(
        HONOREE_ATTR.to_string(),
        Value::String(result.honoree_id.to_string()),
    );
    store
        .put(&Item::new(
            ElectionResultRecord::key(result.guild_id, result.period),
            attributes,
        ))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_store;
    use serde_json::json;

    fn march() -> Period {
        Period::new(2024, 3).unwrap()
    }

    #[test]
    fn test_ballot_and_result_tags() {
        assert_eq!(BallotRecord::tag(march(), UserId(42)), "election/2024-03/42");
        assert_eq!(BallotRecord::prefix(march()), "election/2024-03/");
        assert_eq!(ElectionResultRecord::tag(march()), "election/2024-03");
    }

    #[test]
    fn test_guild_record_attribute_mapping() {
        let mut record = GuildResourceRecord::empty(GuildId(1));
        record.honoree_role_id = Some(RoleId(10));
        record.category_id = Some(ChannelId(20));
        record.channels.insert("general".to_string(), ChannelId(30));

        let attributes = record.to_attributes();
        assert_eq!(attributes.get("honoreeRoleId"), Some(&json!("10")));
        assert_eq!(attributes.get("categoryId"), Some(&json!("20")));
        assert_eq!(attributes.get("general"), Some(&json!("30")));

        let item = Item::new(GuildResourceRecord::key(GuildId(1)), attributes);
        assert_eq!(GuildResourceRecord::from_item(GuildId(1), &item), record);
    }

    #[test]
    fn test_guild_record_tolerates_numeric_and_malformed_ids() {
        let mut attributes = Attributes::new();
        attributes.insert("general".to_string(), json!(30));
        attributes.insert("rules".to_string(), json!("not-a-number"));
        attributes.insert("bot".to_string(), json!(true));
        let item = Item::new(GuildResourceRecord::key(GuildId(1)), attributes);

        let record = GuildResourceRecord::from_item(GuildId(1), &item);
        assert_eq!(record.channel("general"), Some(ChannelId(30)));
        assert_eq!(record.channel("rules"), None);
        assert_eq!(record.channel("bot"), None);
    }

    #[test]
    fn test_changes_contain_only_differing_fields() {
        let mut before = GuildResourceRecord::empty(GuildId(1));
        before.honoree_role_id = Some(RoleId(10));
        before.channels.insert("general".to_string(), ChannelId(30));

        let mut after = before.clone();
        after.category_id = Some(ChannelId(20));
        after.channels.insert("general".to_string(), ChannelId(31));

        let changes = before.changes_to(&after);
        assert_eq!(changes.changed_names(), vec!["categoryId", "general"]);
        assert!(before.changes_to(&before).is_empty());
    }

    #[tokio::test]
    async fn test_guild_record_persists_partial_changes() {
        let store = open_store(None, "beyond").await.unwrap();
        let guild = GuildId(7);

        let empty = load_guild_record(&store, guild).await.unwrap();
        assert_eq!(empty, GuildResourceRecord::empty(guild));

        let mut first = empty.clone();
        first.honoree_role_id = Some(RoleId(10));
        assert!(save_guild_changes(&store, guild, &empty.changes_to(&first)).await.unwrap());

        let mut second = first.clone();
        second.category_id = Some(ChannelId(20));
        save_guild_changes(&store, guild, &first.changes_to(&second)).await.unwrap();

        assert_eq!(load_guild_record(&store, guild).await.unwrap(), second);
        assert!(!save_guild_changes(&store, guild, &second.changes_to(&second)).await.unwrap());
    }

    #[tokio::test]
    async fn test_ballots_roundtrip_through_store() {
        let store = open_store(None, "beyond").await.unwrap();
        let ballot = BallotRecord {
            guild_id: GuildId(1),
            period: march(),
            voter_id: UserId(5),
            candidate_id: UserId(9),
        };
        put_ballot(&store, &ballot).await.unwrap();

        let changed = BallotRecord {
            candidate_id: UserId(11),
            ..ballot.clone()
        };
        update_ballot_candidate(&store, &changed).await.unwrap();

        let fetched = get_ballot(&store, GuildId(1), march(), UserId(5)).await.unwrap();
        assert_eq!(fetched, Some(changed));
        assert!(get_ballot(&store, GuildId(1), march().next(), UserId(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_ballots_skips_malformed_entries() {
        let store = open_store(None, "beyond").await.unwrap();
        for voter in [3u64, 1, 2] {
            put_ballot(
                &store,
                &BallotRecord {
                    guild_id: GuildId(1),
                    period: march(),
                    voter_id: UserId(voter),
                    candidate_id: UserId(100 + voter),
                },
            )
            .await
            .unwrap();
        }
        store
            .put(&Item::new(
                ItemKey::new("1", "election/2024-03/4"),
                Attributes::new(),
            ))
            .await
            .unwrap();

        let ballots = list_ballots(&store, GuildId(1), march()).await.unwrap();
        let voters: Vec<u64> = ballots.iter().map(|b| b.voter_id.get()).collect();
        assert_eq!(voters, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_election_result_is_not_a_ballot() {
        let store = open_store(None, "beyond").await.unwrap();
        let result = ElectionResultRecord {
            guild_id: GuildId(1),
            period: march(),
            honoree_id: UserId(9),
        };
        put_election_result(&store, &result).await.unwrap();

        assert_eq!(
            get_election_result(&store, GuildId(1), march()).await.unwrap(),
            Some(result)
        );
        assert!(list_ballots(&store, GuildId(1), march()).await.unwrap().is_empty());
    }
}
