//! Ballot casting
//!
//! Rules are checked before the store is touched. The read-then-write is not
//! atomic: two concurrent submissions by the same voter race, and the last
//! write wins. Each voter owns a distinct key, so no other ballot is at risk.
//! A stored ballot that cannot be decoded counts as no ballot and is replaced.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use gotm_common::records::{get_ballot, put_ballot, update_ballot_candidate, BallotRecord};
use gotm_common::{GuildId, Period, ResourceStore, UserId};

/// Who the voter picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: UserId,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First ballot of the period
    Recorded,
    /// Previous ballot rebound to a new candidate
    Changed { previous: UserId },
    /// Same candidate as before; nothing written
    Unchanged,
}

impl VoteOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            VoteOutcome::Recorded | VoteOutcome::Changed { .. } => "You have submitted your vote.",
            VoteOutcome::Unchanged => "You have already voted for this candidate.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRejection {
    SelfVote,
    BotCandidate,
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("vote rejected: {0:?}")]
    Rejected(VoteRejection),

    #[error(transparent)]
    Store(#[from] gotm_common::Error),
}

impl VoteError {
    /// Text safe to show the voter
    pub fn message(&self) -> &'static str {
        match self {
            VoteError::Rejected(_) => "You cannot vote for that person!",
            VoteError::Store(_) => "Your vote could not be recorded right now, please try again later.",
        }
    }
}

#[derive(Clone)]
pub struct VoteService {
    store: ResourceStore,
}

impl VoteService {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Cast `voter`'s ballot for the period containing `now`
    pub async fn cast(
        &self,
        guild: GuildId,
        voter: UserId,
        candidate: Candidate,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, VoteError> {
        if candidate.id == voter {
            return Err(VoteError::Rejected(VoteRejection::SelfVote));
        }
        if candidate.is_bot {
            return Err(VoteError::Rejected(VoteRejection::BotCandidate));
        }

        let period = Period::containing(now);
        let ballot = BallotRecord {
            guild_id: guild,
            period,
            voter_id: voter,
            candidate_id: candidate.id,
        };

        let existing = match get_ballot(&self.store, guild, period, voter).await {
            Ok(existing) => existing,
            Err(e @ gotm_common::Error::InvalidRecord { .. }) => {
                warn!(guild_id = %guild, period = %period, voter = %voter, "Overwriting unreadable ballot: {}", e);
                None
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = match existing {
            None => {
                put_ballot(&self.store, &ballot).await?;
                VoteOutcome::Recorded
            }
            Some(existing) if existing.candidate_id == candidate.id => VoteOutcome::Unchanged,
            Some(existing) => {
                update_ballot_candidate(&self.store, &ballot).await?;
                VoteOutcome::Changed {
                    previous: existing.candidate_id,
                }
            }
        };

        match outcome {
            VoteOutcome::Unchanged => {
                debug!(guild_id = %guild, period = %period, voter = %voter, "Duplicate vote ignored")
            }
            _ => info!(guild_id = %guild, period = %period, voter = %voter, outcome = ?outcome, "Vote stored"),
        }

        Ok(outcome)
    }
}
