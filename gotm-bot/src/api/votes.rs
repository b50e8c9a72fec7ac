//! Vote submission and result lookup

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use gotm_common::records::get_election_result as load_result;
use gotm_common::{GuildId, Period, UserId};

use crate::error::{ApiError, ApiResult};
use crate::vote::{Candidate, VoteError, VoteOutcome};
use crate::AppState;

/// POST body; `timestamp` and `hash` are consumed by the auth layer
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub voter_id: UserId,
    pub candidate_id: UserId,
    #[serde(default)]
    pub candidate_is_bot: bool,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub outcome: &'static str,
    pub message: &'static str,
    pub period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_candidate_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct ElectionResultResponse {
    pub guild_id: GuildId,
    pub period: String,
    pub honoree_id: UserId,
}

fn parse_guild(raw: &str) -> ApiResult<GuildId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid guild id '{}'", raw)))
}

/// POST /api/guilds/:guild_id/votes
pub async fn submit_vote(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<Json<VoteResponse>> {
    let guild = parse_guild(&guild_id)?;
    let now = Utc::now();
    let candidate = Candidate {
        id: request.candidate_id,
        is_bot: request.candidate_is_bot,
    };

    let outcome = state
        .votes
        .cast(guild, request.voter_id, candidate, now)
        .await
        .map_err(|e| match &e {
            VoteError::Rejected(_) => ApiError::Rejected(e.message().to_string()),
            VoteError::Store(inner) => {
                error!(guild_id = %guild, "Vote store failure: {}", inner);
                ApiError::Unavailable(e.message().to_string())
            }
        })?;

    let (label, previous) = match outcome {
        VoteOutcome::Recorded => ("recorded", None),
        VoteOutcome::Changed { previous } => ("changed", Some(previous)),
        VoteOutcome::Unchanged => ("unchanged", None),
    };

    Ok(Json(VoteResponse {
        outcome: label,
        message: outcome.message(),
        period: Period::containing(now).to_string(),
        previous_candidate_id: previous,
    }))
}

/// GET /api/guilds/:guild_id/elections/:period
pub async fn get_election_result(
    State(state): State<AppState>,
    Path((guild_id, period)): Path<(String, String)>,
) -> ApiResult<Json<ElectionResultResponse>> {
    let guild = parse_guild(&guild_id)?;
    let period: Period = period
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid period '{}', expected YYYY-MM", period)))?;

    let result = load_result(state.votes.store(), guild, period)
        .await
        .map_err(|e| {
            error!(guild_id = %guild, period = %period, "Result lookup failed: {}", e);
            ApiError::Unavailable("Election results are unavailable right now.".to_string())
        })?
        .ok_or_else(|| ApiError::NotFound(format!("no finalized election for {}", period)))?;

    Ok(Json(ElectionResultResponse {
        guild_id: result.guild_id,
        period: result.period.to_string(),
        honoree_id: result.honoree_id,
    }))
}
