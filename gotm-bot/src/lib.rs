//! gotm-bot library
//!
//! Guild reconciliation, the monthly election engine and its scheduler, and
//! the HTTP surface through which the command layer submits votes.

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod chat;
pub mod election;
pub mod error;
pub mod reconciler;
pub mod scheduler;
pub mod vote;

use vote::VoteService;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub votes: VoteService,
    /// 0 disables request authentication
    pub shared_secret: i64,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(votes: VoteService, shared_secret: i64) -> Self {
        Self {
            votes,
            shared_secret,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Vote submission requires authentication; health and finalized results
/// are public.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/api/guilds/:guild_id/votes", post(api::submit_vote))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .route(
            "/api/guilds/:guild_id/elections/:period",
            get(api::get_election_result),
        )
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
