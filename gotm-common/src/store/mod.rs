//! Resource Store
//!
//! Typed get/put/update/query over one key-value table. The partition key is
//! the logical endpoint (a guild id) and the sort key is a composite tag such
//! as `information` or `election/2024-03/<voter>`.
//!
//! The store owns no business logic and performs no retries. There are no
//! transactions: a caller doing "read, then write" on the same key races with
//! other callers and gets last-write-wins semantics.

mod init;

pub use init::{create_resources_table, open_store};

use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

use crate::{Error, Result};

/// Attribute map stored with each item
pub type Attributes = BTreeMap<String, Value>;

/// Fully formed item key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub endpoint: String,
    pub tag: String,
}

impl ItemKey {
    pub fn new(endpoint: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tag: tag.into(),
        }
    }
}

/// One stored item
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    pub attributes: Attributes,
}

impl Item {
    pub fn new(key: ItemKey, attributes: Attributes) -> Self {
        Self { key, attributes }
    }

    /// String attribute, if present and a string
    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// Handle to the single resource table
#[derive(Debug, Clone)]
pub struct ResourceStore {
    pool: SqlitePool,
    table: String,
}

impl ResourceStore {
    /// Wrap an existing pool. The table must already exist
    /// (see [`create_resources_table`]).
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch one item; `None` when the key has never been written
    pub async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        let sql = format!(
            "SELECT attributes FROM {} WHERE endpoint = ? AND tag = ?",
            self.table
        );
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(&key.endpoint)
            .bind(&key.tag)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((json,)) => Ok(Some(Item::new(key.clone(), decode_attributes(key, &json)?))),
            None => Ok(None),
        }
    }

    /// Write a whole item, replacing any previous attributes
    pub async fn put(&self, item: &Item) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (endpoint, tag, attributes) VALUES (?, ?, ?)
             ON CONFLICT(endpoint, tag) DO UPDATE SET attributes = excluded.attributes",
            self.table
        );
        sqlx::query(&sql)
            .bind(&item.key.endpoint)
            .bind(&item.key.tag)
            .bind(serde_json::to_string(&item.attributes)?)
            .execute(&self.pool)
            .await?;

        debug!(endpoint = %item.key.endpoint, tag = %item.key.tag, "Item put");
        Ok(())
    }

    /// Merge `changes` into the item's attributes, creating the item if absent.
    ///
    /// Attributes not named in `changes` are left untouched. The merge is a
    /// single statement, so concurrent updates to disjoint attributes of the
    /// same item do not clobber each other.
    pub async fn update(&self, key: &ItemKey, changes: &Attributes) -> Result<()> {
        if changes.values().any(Value::is_null) {
            return Err(Error::InvalidInput(
                "null attribute values are not supported by update".to_string(),
            ));
        }

        let sql = format!(
            "INSERT INTO {} (endpoint, tag, attributes) VALUES (?, ?, ?)
             ON CONFLICT(endpoint, tag) DO UPDATE
             SET attributes = json_patch(attributes, excluded.attributes)",
            self.table
        );
        sqlx::query(&sql)
            .bind(&key.endpoint)
            .bind(&key.tag)
            .bind(serde_json::to_string(changes)?)
            .execute(&self.pool)
            .await?;

        debug!(
            endpoint = %key.endpoint,
            tag = %key.tag,
            changed = changes.len(),
            "Item updated"
        );
        Ok(())
    }

    /// All items in `endpoint` whose tag starts with `tag_prefix`, ordered by tag
    pub async fn query(&self, endpoint: &str, tag_prefix: &str) -> Result<Vec<Item>> {
        // substr comparison avoids LIKE wildcard escaping on user-derived tags
        let sql = format!(
            "SELECT tag, attributes FROM {}
             WHERE endpoint = ? AND substr(tag, 1, length(?)) = ?
             ORDER BY tag ASC",
            self.table
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(endpoint)
            .bind(tag_prefix)
            .bind(tag_prefix)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(tag, json)| {
                let key = ItemKey::new(endpoint, tag);
                let attributes = decode_attributes(&key, &json)?;
                Ok(Item::new(key, attributes))
            })
            .collect()
    }
}

fn decode_attributes(key: &ItemKey, json: &str) -> Result<Attributes> {
    serde_json::from_str(json).map_err(|e| Error::InvalidRecord {
        endpoint: key.endpoint.clone(),
        tag: key.tag.clone(),
        reason: format!("attributes are not a JSON object: {}", e),
    })
}

/// Table names are interpolated into SQL, so only identifiers are accepted
fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid table name: {:?}", table)))
    }
}
