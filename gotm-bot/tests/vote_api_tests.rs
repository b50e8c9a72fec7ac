//! HTTP surface: vote submission, result lookup, health and authentication

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use gotm_bot::vote::VoteService;
use gotm_bot::{build_router, AppState};
use gotm_common::api::auth::calculate_hash;
use gotm_common::records::{list_ballots, put_election_result, ElectionResultRecord};
use gotm_common::{GuildId, Period, ResourceStore, UserId};
use helpers::memory_store;

async fn create_test_app(shared_secret: i64) -> (Router, ResourceStore) {
    let store = memory_store().await;
    let state = AppState::new(VoteService::new(store.clone()), shared_secret);
    (build_router(state), store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post_vote(guild: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/guilds/{}/votes", guild))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn vote_body(voter: &str, candidate: &str, candidate_is_bot: bool) -> Value {
    json!({
        "voter_id": voter,
        "candidate_id": candidate,
        "candidate_is_bot": candidate_is_bot,
        "timestamp": Utc::now().timestamp_millis(),
        "hash": "",
    })
}

fn signed(mut body: Value, secret: i64) -> Value {
    let hash = calculate_hash(&body, secret);
    body["hash"] = Value::String(hash);
    body
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _store) = create_test_app(12345).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "gotm-bot");
}

#[tokio::test]
async fn test_vote_flow_messages() {
    let (app, store) = create_test_app(0).await;

    let (status, json) = send(&app, post_vote("42", &vote_body("10", "20", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "recorded");
    assert_eq!(json["message"], "You have submitted your vote.");

    let (status, json) = send(&app, post_vote("42", &vote_body("10", "20", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "unchanged");
    assert_eq!(json["message"], "You have already voted for this candidate.");

    let (status, json) = send(&app, post_vote("42", &vote_body("10", "30", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "changed");
    assert_eq!(json["previous_candidate_id"], "20");

    let period = Period::containing(Utc::now());
    let ballots = list_ballots(&store, GuildId(42), period).await.unwrap();
    assert_eq!(ballots.len(), 1);
    assert_eq!(ballots[0].candidate_id, UserId(30));
}

#[tokio::test]
async fn test_rejected_votes_are_not_stored() {
    let (app, store) = create_test_app(0).await;

    let (status, json) = send(&app, post_vote("42", &vote_body("10", "10", false))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VOTE_REJECTED");
    assert_eq!(json["error"]["message"], "You cannot vote for that person!");

    let (status, _) = send(&app, post_vote("42", &vote_body("10", "99", true))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let period = Period::containing(Utc::now());
    assert!(list_ballots(&store, GuildId(42), period).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_guild_id_rejected() {
    let (app, _store) = create_test_app(0).await;

    let (status, json) = send(&app, post_vote("not-a-guild", &vote_body("10", "20", false))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_signed_vote_accepted() {
    let secret = 987_654_321;
    let (app, _store) = create_test_app(secret).await;

    let body = signed(vote_body("10", "20", false), secret);
    let (status, json) = send(&app, post_vote("42", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "recorded");
}

#[tokio::test]
async fn test_bad_hash_rejected() {
    let secret = 987_654_321;
    let (app, store) = create_test_app(secret).await;

    let body = signed(vote_body("10", "20", false), secret + 1);
    let (status, json) = send(&app, post_vote("42", &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "INVALID_HASH");

    let period = Period::containing(Utc::now());
    assert!(list_ballots(&store, GuildId(42), period).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_timestamp_rejected() {
    let secret = 987_654_321;
    let (app, _store) = create_test_app(secret).await;

    let mut body = vote_body("10", "20", false);
    body["timestamp"] = json!(Utc::now().timestamp_millis() - 60_000);
    let body = signed(body, secret);

    let (status, json) = send(&app, post_vote("42", &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "INVALID_TIMESTAMP");
}

#[tokio::test]
async fn test_missing_auth_fields_rejected() {
    let (app, _store) = create_test_app(1).await;

    let body = json!({"voter_id": "10", "candidate_id": "20"});
    let (status, json) = send(&app, post_vote("42", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "MISSING_FIELDS");
}

#[tokio::test]
async fn test_election_result_lookup() {
    let (app, store) = create_test_app(12345).await;
    put_election_result(
        &store,
        &ElectionResultRecord {
            guild_id: GuildId(42),
            period: Period::new(2024, 3).unwrap(),
            honoree_id: UserId(100),
        },
    )
    .await
    .unwrap();

    let request = Request::builder()
        .uri("/api/guilds/42/elections/2024-03")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["period"], "2024-03");
    assert_eq!(json["honoree_id"], "100");

    let request = Request::builder()
        .uri("/api/guilds/42/elections/2024-04")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let request = Request::builder()
        .uri("/api/guilds/42/elections/March")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
