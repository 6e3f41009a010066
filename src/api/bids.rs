use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::{identity::Identity, AppState};
use crate::error::{AppError, Result};
use crate::models::{Auction, Bid};
use crate::services::bidding;

#[derive(Debug, Deserialize)]
struct PlaceBidRequest {
    auction_id: Uuid,
    amount: i64,
}

async fn place_bid(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<PlaceBidRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let outcome = bidding::place_bid(
        &state.pool,
        state.clock.as_ref(),
        req.auction_id,
        identity.user_id,
        req.amount,
    )
    .await?;

    tracing::info!(
        auction_id = %req.auction_id,
        bid_id = %outcome.bid.id,
        amount = req.amount,
        "Bid placed"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Bid placed successfully",
            "bid": outcome.bid,
            "auction": outcome.auction,
            "bids": outcome.bids,
        })),
    ))
}

/// Owner's moderation view of pending pre-bids.
async fn list_pre_bids(
    State(state): State<AppState>,
    identity: Identity,
    Path(auction_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let auction = Auction::find_by_id(&state.pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;
    if auction.created_by != identity.user_id {
        return Err(AppError::Forbidden(
            "Only the auction owner can view pre-bids".to_string(),
        ));
    }

    let pre_bids = Bid::find_pre_bids(&state.pool, auction_id).await?;
    Ok(Json(json!({ "success": true, "prebids": pre_bids })))
}

/// The caller's own latest bid on an auction.
async fn my_bid(
    State(state): State<AppState>,
    identity: Identity,
    Path(auction_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let bid = Bid::find_latest_for_bidder(&state.pool, auction_id, identity.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "has_bid": bid.is_some(),
        "bid": bid,
    })))
}

async fn approve_pre_bid(
    State(state): State<AppState>,
    identity: Identity,
    Path(bid_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let bid = bidding::approve_pre_bid(&state.pool, bid_id, identity.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Pre-bid approved successfully",
        "bid": bid,
    })))
}

async fn reject_pre_bid(
    State(state): State<AppState>,
    identity: Identity,
    Path(bid_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    bidding::reject_pre_bid(&state.pool, bid_id, identity.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Pre-bid rejected and deleted",
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bids", post(place_bid))
        .route("/auctions/:id/pre-bids", get(list_pre_bids))
        .route("/auctions/:id/my-bid", get(my_bid))
        .route("/bids/:id/approve", post(approve_pre_bid))
        .route("/bids/:id/reject", post(reject_pre_bid))
}
