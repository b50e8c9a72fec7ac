//! Election engine
//!
//! Per guild: finalize the prior period's election exactly once, as far as
//! the store can tell. The result record is the commit marker; it is written
//! last, after role rotation and the announcement. If that write fails, the
//! next run redoes the tally and rotation, which is safe because rotation is
//! idempotent. Announcements are therefore at-least-once.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use gotm_common::records::{
    get_election_result, list_ballots, put_election_result, BallotRecord, ElectionResultRecord,
};
use gotm_common::{Period, ResourceStore};

use crate::chat::{ChatServer, GuildId, Member, RoleId, UserId};
use crate::error::BotError;
use crate::reconciler::{GuildReconciler, NOTIFICATION_CHANNEL};

const REMOVAL_REASON: &str = "New GOTM, please re-invite this bot if you wish to have it.";

/// Votes received by one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateTally {
    pub candidate: UserId,
    pub votes: usize,
}

/// Count ballots per candidate, in order of each candidate's first ballot
pub fn tally(ballots: &[BallotRecord]) -> Vec<CandidateTally> {
    let mut index: HashMap<UserId, usize> = HashMap::new();
    let mut tallies: Vec<CandidateTally> = Vec::new();
    for ballot in ballots {
        match index.get(&ballot.candidate_id) {
            Some(&i) => tallies[i].votes += 1,
            None => {
                index.insert(ballot.candidate_id, tallies.len());
                tallies.push(CandidateTally {
                    candidate: ballot.candidate_id,
                    votes: 1,
                });
            }
        }
    }
    tallies
}

/// Candidate with the strictly highest count among `eligible` ones.
///
/// Ties go to the candidate seen first in `tallies`. This is deterministic
/// but arbitrary; it says nothing about fairness between tied candidates.
pub fn leading_candidate(
    tallies: &[CandidateTally],
    eligible: impl Fn(UserId) -> bool,
) -> Option<CandidateTally> {
    let mut leader: Option<CandidateTally> = None;
    for entry in tallies.iter().filter(|t| eligible(t.candidate)) {
        if leader.map_or(true, |l| entry.votes > l.votes) {
            leader = Some(*entry);
        }
    }
    leader
}

/// Why a particular winner was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerSource {
    Ballots { votes: usize },
    /// No eligible ballots; the current honoree keeps the title
    IncumbentRetained,
    /// No eligible ballots and no incumbent; uniform pick among humans
    RandomMember,
}

/// Choose the period's winner.
///
/// Only current, non-bot members can win. Without any eligible ballot the
/// current honoree is kept; failing that, a random non-bot member is drawn.
pub fn select_winner<R: Rng + ?Sized>(
    tallies: &[CandidateTally],
    members: &[Member],
    honoree_role: RoleId,
    rng: &mut R,
) -> Option<(UserId, WinnerSource)> {
    let humans: Vec<&Member> = members.iter().filter(|m| !m.is_bot).collect();
    let is_eligible = |user: UserId| humans.iter().any(|m| m.user_id == user);

    if let Some(leader) = leading_candidate(tallies, is_eligible) {
        return Some((leader.candidate, WinnerSource::Ballots { votes: leader.votes }));
    }

    if let Some(incumbent) = humans.iter().find(|m| m.has_role(honoree_role)) {
        return Some((incumbent.user_id, WinnerSource::IncumbentRetained));
    }

    humans
        .choose(rng)
        .map(|m| (m.user_id, WinnerSource::RandomMember))
}

/// Side effects of one role rotation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationSummary {
    pub granted: bool,
    pub revoked: usize,
    pub bots_removed: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Notification channel or honoree role could not be resolved
    UninitializedGuild,
    /// Nobody eligible to win
    NoEligibleMembers,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UninitializedGuild => write!(f, "uninitialized guild"),
            SkipReason::NoEligibleMembers => write!(f, "no eligible members"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Finalized {
        period: Period,
        winner: UserId,
        source: WinnerSource,
        rotation: RotationSummary,
    },
    AlreadyFinalized {
        period: Period,
        honoree: UserId,
    },
    Skipped {
        period: Period,
        reason: SkipReason,
    },
}

/// Election policy knobs
#[derive(Debug, Clone, Copy)]
pub struct ElectionPolicy {
    /// Remove bot accounts other than our own during rotation
    pub remove_foreign_bots: bool,
}

impl Default for ElectionPolicy {
    fn default() -> Self {
        Self {
            remove_foreign_bots: true,
        }
    }
}

pub struct ElectionEngine {
    store: ResourceStore,
    chat: Arc<dyn ChatServer>,
    reconciler: Arc<GuildReconciler>,
    self_id: UserId,
    policy: ElectionPolicy,
    rng: Mutex<StdRng>,
}

impl ElectionEngine {
    pub fn new(
        store: ResourceStore,
        chat: Arc<dyn ChatServer>,
        reconciler: Arc<GuildReconciler>,
        self_id: UserId,
        policy: ElectionPolicy,
    ) -> Self {
        Self {
            store,
            chat,
            reconciler,
            self_id,
            policy,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic random fallback, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Finalize the election for the period before `now`, if not yet done.
    ///
    /// Safe to call any number of times per period.
    pub async fn run_election(
        &self,
        guild: GuildId,
        now: DateTime<Utc>,
    ) -> Result<ElectionOutcome, BotError> {
        let period = Period::prior_to(now);

        if let Some(result) = get_election_result(&self.store, guild, period).await? {
            debug!(guild_id = %guild, period = %period, "Election already finalized");
            return Ok(ElectionOutcome::AlreadyFinalized {
                period,
                honoree: result.honoree_id,
            });
        }

        let report = self.reconciler.reconcile(guild).await?;
        let (Some(channel), Some(role)) = (report.channel(NOTIFICATION_CHANNEL), report.honoree_role())
        else {
            warn!(guild_id = %guild, period = %period, "Skipping election: guild not initialized");
            return Ok(ElectionOutcome::Skipped {
                period,
                reason: SkipReason::UninitializedGuild,
            });
        };

        let ballots = list_ballots(&self.store, guild, period).await?;
        let tallies = tally(&ballots);
        let members = self.chat.members(guild).await?;

        let selection = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            select_winner(&tallies, &members, role, &mut *rng)
        };
        let Some((winner, source)) = selection else {
            warn!(guild_id = %guild, period = %period, "Skipping election: no eligible members");
            return Ok(ElectionOutcome::Skipped {
                period,
                reason: SkipReason::NoEligibleMembers,
            });
        };

        info!(
            guild_id = %guild,
            period = %period,
            winner = %winner,
            ballots = ballots.len(),
            source = ?source,
            "Election winner selected"
        );

        let rotation = self.rotate_role(guild, role, winner, &members).await;

        let announcement = format!("<@{}> has won Gumby of the Month for {}!", winner, period);
        self.chat.send_message(channel, &announcement).await?;

        put_election_result(
            &self.store,
            &ElectionResultRecord {
                guild_id: guild,
                period,
                honoree_id: winner,
            },
        )
        .await?;

        info!(guild_id = %guild, period = %period, winner = %winner, "Election finalized");

        Ok(ElectionOutcome::Finalized {
            period,
            winner,
            source,
            rotation,
        })
    }

    /// Give the honoree role to `winner` only. Per-member failures are
    /// logged and counted; they never abort the rotation.
    async fn rotate_role(
        &self,
        guild: GuildId,
        role: RoleId,
        winner: UserId,
        members: &[Member],
    ) -> RotationSummary {
        let mut summary = RotationSummary::default();

        for member in members {
            if member.user_id == winner {
                if member.has_role(role) {
                    continue;
                }
                match self.chat.add_member_role(guild, member.user_id, role).await {
                    Ok(()) => summary.granted = true,
                    Err(e) => {
                        summary.failures += 1;
                        warn!(guild_id = %guild, user_id = %member.user_id, "Could not grant honoree role: {}", e);
                    }
                }
                continue;
            }

            if member.has_role(role) {
                match self.chat.remove_member_role(guild, member.user_id, role).await {
                    Ok(()) => summary.revoked += 1,
                    Err(e) => {
                        summary.failures += 1;
                        warn!(guild_id = %guild, user_id = %member.user_id, "Could not revoke honoree role: {}", e);
                    }
                }
            }

            if self.policy.remove_foreign_bots && member.is_bot && member.user_id != self.self_id {
                match self.chat.remove_member(guild, member.user_id, REMOVAL_REASON).await {
                    Ok(()) => summary.bots_removed += 1,
                    Err(e) => {
                        summary.failures += 1;
                        warn!(
                            guild_id = %guild,
                            user_id = %member.user_id,
                            name = %member.display_name,
                            "Could not remove bot: {}", e
                        );
                    }
                }
            }
        }

        summary
    }
}
