//! HTTP surface for vote submission

pub mod auth;
pub mod health;
pub mod votes;

pub use auth::auth_middleware;
pub use health::health_routes;
pub use votes::{get_election_result, submit_vote};
