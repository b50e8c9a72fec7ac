//! Election scheduler
//!
//! One long-lived task. Each pass enumerates the bot's guilds and runs the
//! election engine for each one in turn, with a fixed delay between guilds.
//! A guild's failure is logged and the pass moves on.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gotm_common::config::ElectionConfig;

use crate::chat::ChatServer;
use crate::election::{ElectionEngine, ElectionOutcome};
use crate::error::BotError;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Target interval between pass starts
    pub period: Duration,
    /// Pause between two guilds within a pass
    pub guild_delay: Duration,
    /// Passes that may fail outright (guild enumeration) before giving up
    pub max_consecutive_pass_failures: u32,
}

impl From<&ElectionConfig> for SchedulerConfig {
    fn from(config: &ElectionConfig) -> Self {
        Self {
            period: config.check_interval(),
            guild_delay: config.guild_delay(),
            max_consecutive_pass_failures: config.max_consecutive_pass_failures.max(1),
        }
    }
}

/// Per-pass counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub guilds: usize,
    pub finalized: usize,
    pub already_finalized: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Cancellation was observed during an inter-guild delay
    pub interrupted: bool,
}

/// Why the scheduler stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerExit {
    Cancelled,
    Fault(String),
}

/// Sleep before the next pass, given how long the current one took.
///
/// Clamped at zero: an overrunning pass is followed immediately by the next
/// one, never by a compensating extra sleep.
pub fn next_sleep(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

pub struct ElectionScheduler {
    engine: Arc<ElectionEngine>,
    chat: Arc<dyn ChatServer>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl ElectionScheduler {
    pub fn new(
        engine: Arc<ElectionEngine>,
        chat: Arc<dyn ChatServer>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            chat,
            config,
            cancel,
        }
    }

    /// Run until cancelled or until guild enumeration keeps failing.
    ///
    /// An election already in progress is allowed to finish before
    /// cancellation is observed.
    pub async fn run(self) -> SchedulerExit {
        info!(
            period_secs = self.config.period.as_secs(),
            guild_delay_ms = self.config.guild_delay.as_millis() as u64,
            "Election scheduler started"
        );

        let mut consecutive_failures: u32 = 0;

        let exit = loop {
            if self.cancel.is_cancelled() {
                break SchedulerExit::Cancelled;
            }

            let woke_at = Instant::now();

            match self.run_pass(Utc::now()).await {
                Ok(summary) => {
                    consecutive_failures = 0;
                    info!(
                        guilds = summary.guilds,
                        finalized = summary.finalized,
                        already_finalized = summary.already_finalized,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "Election pass complete"
                    );
                }
                Err(e) if !e.is_retryable() => {
                    break SchedulerExit::Fault(e.to_string());
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        attempt = consecutive_failures,
                        "Election pass failed: {}", e
                    );
                    if consecutive_failures >= self.config.max_consecutive_pass_failures {
                        break SchedulerExit::Fault(format!(
                            "{} consecutive failed passes, last error: {}",
                            consecutive_failures, e
                        ));
                    }
                }
            }

            let sleep = next_sleep(self.config.period, woke_at.elapsed());
            if sleep.is_zero() {
                debug!("Pass overran the check interval, starting next pass now");
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break SchedulerExit::Cancelled,
                _ = tokio::time::sleep(sleep) => {}
            }
        };

        match &exit {
            SchedulerExit::Cancelled => warn!("Election scheduler cancelled"),
            SchedulerExit::Fault(reason) => {
                error!("Election scheduler stopped on fault: {}", reason);
                // Shared with the API server, which shuts down too
                self.cancel.cancel();
            }
        }
        exit
    }

    /// One sweep over every guild.
    ///
    /// Only failure to enumerate guilds fails the pass; per-guild errors are
    /// logged with the guild id and counted.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassSummary, BotError> {
        let guilds = self.chat.guilds().await?;
        let mut summary = PassSummary {
            guilds: guilds.len(),
            ..PassSummary::default()
        };

        for (index, guild) in guilds.iter().copied().enumerate() {
            if index > 0 && !self.config.guild_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        summary.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.guild_delay) => {}
                }
            }

            match self.engine.run_election(guild, now).await {
                Ok(ElectionOutcome::Finalized { .. }) => summary.finalized += 1,
                Ok(ElectionOutcome::AlreadyFinalized { .. }) => summary.already_finalized += 1,
                Ok(ElectionOutcome::Skipped { period, reason }) => {
                    summary.skipped += 1;
                    debug!(guild_id = %guild, period = %period, reason = %reason, "Election skipped");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(guild_id = %guild, retryable = e.is_retryable(), "Election failed: {}", e);
                }
            }
        }

        Ok(summary)
    }
}
