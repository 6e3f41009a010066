use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::{identity::Identity, AppState};
use crate::error::{AppError, Result};
use crate::models::auction::AuctionFilter;
use crate::models::{AuctionStatus, Participant};
use crate::services::{auctions, lifecycle};

async fn create_auction(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<auctions::CreateAuctionRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let created =
        auctions::create_auction(&state.pool, state.clock.as_ref(), identity.user_id, req).await?;

    tracing::info!(
        auction_id = %created.auction.id,
        invited = created.invited_participants,
        "Auction created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "auction": created.auction,
            "invited_participants": created.invited_participants,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<AuctionStatus>,
    /// "created" or "participated"; anything else lists everything visible.
    #[serde(rename = "type")]
    kind: Option<String>,
    search: Option<String>,
}

async fn list_auctions(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    let filter = AuctionFilter {
        status: query.status,
        created_by: (query.kind.as_deref() == Some("created")).then_some(identity.user_id),
        participated_by: (query.kind.as_deref() == Some("participated"))
            .then_some(identity.user_id),
        search: query.search,
    };

    let auctions = auctions::list_auctions(&state.pool, state.clock.as_ref(), &filter).await?;
    Ok(Json(json!({
        "success": true,
        "count": auctions.len(),
        "auctions": auctions,
    })))
}

async fn list_live(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let auctions = auctions::list_live_auctions(&state.pool, state.clock.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "count": auctions.len(),
        "auctions": auctions,
    })))
}

/// Manual sweep trigger for operational debugging.
async fn trigger_sweep(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let stats = lifecycle::run_sweep(&state.pool, state.clock.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "completed": stats.completed,
        "went_live": stats.went_live,
        "winners_elected": stats.winners_elected,
    })))
}

async fn auction_details(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let details =
        auctions::get_auction_details(&state.pool, state.clock.as_ref(), id, identity.user_id)
            .await?;
    Ok(Json(json!({ "success": true, "auction": details })))
}

async fn delete_auction(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    auctions::delete_auction(&state.pool, id, identity.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Auction deleted",
    })))
}

async fn close_auction(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let closed =
        auctions::close_auction(&state.pool, state.clock.as_ref(), id, identity.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "auction": closed.auction,
        "winner": closed.winner,
    })))
}

#[derive(Debug, Deserialize)]
struct ExtendRequest {
    additional_minutes: i32,
}

async fn extend_auction(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<serde_json::Value>> {
    let auction =
        auctions::extend_auction(&state.pool, id, identity.user_id, req.additional_minutes).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Auction time extended by {} minutes", req.additional_minutes),
        "auction": auction,
    })))
}

async fn start_auction(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let auction = auctions::start_auction(&state.pool, id, identity.user_id).await?;
    Ok(Json(json!({ "success": true, "auction": auction })))
}

async fn cancel_auction(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let auction = auctions::cancel_auction(&state.pool, id, identity.user_id).await?;
    Ok(Json(json!({ "success": true, "auction": auction })))
}

#[derive(Debug, Deserialize)]
struct StepRequest {
    decremental_step: i64,
}

async fn update_step(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<StepRequest>,
) -> Result<Json<serde_json::Value>> {
    let auction =
        auctions::update_decremental_step(&state.pool, id, identity.user_id, req.decremental_step)
            .await?;
    Ok(Json(json!({ "success": true, "auction": auction })))
}

async fn join_auction(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let phone = identity
        .phone_number
        .ok_or_else(|| AppError::Validation("A phone number is required to join".to_string()))?;
    auctions::join_auction(&state.pool, id, &phone).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Joined auction successfully",
    })))
}

#[derive(Debug, Deserialize)]
struct InviteRequest {
    participants: Vec<String>,
}

async fn invite_participants(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<serde_json::Value>> {
    let invited =
        auctions::add_participants(&state.pool, id, identity.user_id, &req.participants).await?;
    Ok(Json(json!({
        "success": true,
        "invited_participants": invited,
    })))
}

async fn list_participants(
    State(state): State<AppState>,
    _identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let participants = Participant::find_by_auction(&state.pool, id).await?;
    Ok(Json(json!({
        "success": true,
        "count": participants.len(),
        "participants": participants,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auctions", post(create_auction).get(list_auctions))
        .route("/auctions/live", get(list_live))
        .route("/auctions/sweep", post(trigger_sweep))
        .route("/auctions/:id", get(auction_details).delete(delete_auction))
        .route("/auctions/:id/close", post(close_auction))
        .route("/auctions/:id/extend", post(extend_auction))
        .route("/auctions/:id/start", post(start_auction))
        .route("/auctions/:id/cancel", post(cancel_auction))
        .route("/auctions/:id/decremental-step", patch(update_step))
        .route("/auctions/:id/join", post(join_auction))
        .route(
            "/auctions/:id/participants",
            post(invite_participants).get(list_participants),
        )
}
