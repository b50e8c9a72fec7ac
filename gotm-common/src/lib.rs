//! # GOTM Common Library
//!
//! Shared code for the Gumby of the Month services including:
//! - Resource Store (single-table key-value store over SQLite)
//! - Typed record codecs (guild resources, ballots, election results)
//! - Calendar period tokens
//! - Bootstrap configuration loading
//! - Shared-secret API authentication helpers

pub mod api;
pub mod config;
pub mod error;
pub mod ids;
pub mod period;
pub mod records;
pub mod store;

pub use error::{Error, Result};
pub use ids::{ChannelId, GuildId, RoleId, UserId};
pub use period::Period;
pub use store::{Attributes, Item, ItemKey, ResourceStore};
