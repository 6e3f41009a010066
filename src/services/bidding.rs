use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::bid::BidWithBidder;
use crate::models::participant::{Participant, ParticipantStatus};
use crate::models::{Auction, AuctionStatus, Bid, BidStatus, User};
use crate::services::clock::Clock;
use crate::services::{lifecycle, notifier};

/// Maximum amount the next bid may have. With no active bids the starting
/// ceiling applies (first bid exempt from the decremental check); otherwise
/// the lowest active amount minus the step. May be negative once the price
/// floor is reached.
pub fn bid_ceiling(lowest_active: Option<i64>, decremental_step: i64, starting_ceiling: i64) -> i64 {
    match lowest_active {
        Some(lowest) => lowest - decremental_step,
        None => starting_ceiling,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedBid {
    pub rank: usize,
    #[serde(flatten)]
    pub bid: BidWithBidder,
}

/// Deterministic display ranking: ascending amount, ties broken by earlier
/// placement. Ranks are 1-based and strictly increasing; equal amounts do not
/// share a rank.
pub fn assign_ranks(mut bids: Vec<BidWithBidder>) -> Vec<RankedBid> {
    bids.sort_by(|a, b| {
        a.amount
            .cmp(&b.amount)
            .then_with(|| a.placed_at.cmp(&b.placed_at))
    });
    bids.into_iter()
        .enumerate()
        .map(|(i, bid)| RankedBid { rank: i + 1, bid })
        .collect()
}

/// After a bid is removed, decides who holds the winning flag and what the
/// auction's current price becomes. The flag moves to the next-lowest bid
/// only when the removed bid held it; the price always follows the new lowest
/// active bid, falling back to the starting ceiling when none remain.
pub fn reelect_after_removal(
    next_best: Option<(Uuid, i64)>,
    removed_was_winning: bool,
    starting_ceiling: i64,
) -> (Option<Uuid>, i64) {
    match next_best {
        Some((id, amount)) => (removed_was_winning.then_some(id), amount),
        None => (None, starting_ceiling),
    }
}

#[derive(Debug, Serialize)]
pub struct PlacementOutcome {
    pub bid: Bid,
    pub auction: Auction,
    pub bids: Vec<RankedBid>,
}

/// Validates and persists one bid as a single transaction, then refreshes the
/// caller's view. Lock contention gets exactly one internal retry against
/// fresh state.
pub async fn place_bid(
    pool: &PgPool,
    clock: &dyn Clock,
    auction_id: Uuid,
    bidder_id: Uuid,
    amount: i64,
) -> Result<PlacementOutcome> {
    if amount <= 0 {
        return Err(AppError::Validation(
            "Bid amount must be a positive number".to_string(),
        ));
    }

    // Never act on stale status.
    lifecycle::run_sweep(pool, clock).await?;

    let (bid, auction, displaced_winner) =
        match try_place(pool, clock, auction_id, bidder_id, amount).await {
            Ok(outcome) => outcome,
            Err(AppError::Database(e)) if is_retryable(&e) => {
                tracing::warn!(
                    auction_id = %auction_id,
                    error = %e,
                    "Bid placement hit a serialization conflict, retrying once"
                );
                lifecycle::run_sweep(pool, clock).await?;
                try_place(pool, clock, auction_id, bidder_id, amount)
                    .await
                    .map_err(|e| match e {
                        AppError::Database(e) if is_retryable(&e) => AppError::Conflict(
                            "Auction is busy, please retry your bid".to_string(),
                        ),
                        other => other,
                    })?
            }
            Err(e) => return Err(e),
        };

    // Best-effort side effects; none of these may fail the accepted bid.
    auto_register(pool, &auction, bidder_id).await;
    notify_bid_placed(pool, &auction, &bid, bidder_id, displaced_winner).await;

    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;
    let bids = assign_ranks(Bid::find_active_ranked(pool, auction_id).await?);

    Ok(PlacementOutcome { bid, auction, bids })
}

/// The validate-then-write sequence, serialized per auction by a row lock on
/// the auction record so two concurrent bids cannot both pass validation
/// against the same stale lowest bid.
async fn try_place(
    pool: &PgPool,
    clock: &dyn Clock,
    auction_id: Uuid,
    bidder_id: Uuid,
    amount: i64,
) -> Result<(Bid, Auction, Option<Uuid>)> {
    let mut tx = pool.begin().await?;

    let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(auction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if !auction.status.is_biddable() {
        return Err(AppError::invariant(
            "Bids can only be placed on upcoming or live auctions",
        ));
    }
    if auction.status == AuctionStatus::Upcoming && !auction.pre_bid_allowed {
        return Err(AppError::invariant(
            "Pre-bidding is not allowed for this auction",
        ));
    }

    let (lowest_active,): (Option<i64>,) =
        sqlx::query_as("SELECT MIN(amount) FROM bids WHERE auction_id = $1 AND status <> 'rejected'")
            .bind(auction_id)
            .fetch_one(&mut *tx)
            .await?;

    let ceiling = bid_ceiling(lowest_active, auction.decremental_step, auction.starting_ceiling());
    if amount > ceiling {
        let max_allowed = ceiling.max(0);
        let message = match lowest_active {
            _ if ceiling < 0 => format!("Bid must be <= {} (price floor reached)", max_allowed),
            Some(lowest) => format!(
                "Bid must be <= {} (current lowest {} - decrement {})",
                max_allowed, lowest, auction.decremental_step
            ),
            None => format!("First bid must be <= the starting ceiling {}", max_allowed),
        };
        return Err(AppError::InvariantViolation {
            message,
            max_allowed: Some(max_allowed),
        });
    }

    // Bids placed while upcoming are pre-bids held for moderation; live bids
    // are active immediately.
    let bid_status = if auction.status == AuctionStatus::Live {
        BidStatus::Approved
    } else {
        BidStatus::Pending
    };

    let bid: Bid = sqlx::query_as(
        r#"
        INSERT INTO bids (auction_id, bidder_id, amount, placed_at, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(auction_id)
    .bind(bidder_id)
    .bind(amount)
    .bind(clock.now())
    .bind(bid_status)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE auctions SET current_price = $2, updated_at = NOW() WHERE id = $1")
        .bind(auction_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

    // While live, the accepted bid is by construction the new lowest and
    // takes the single winning flag. Pre-bids are not flagged until the
    // auction goes live.
    let mut displaced_winner = None;
    if auction.status == AuctionStatus::Live {
        let previous: Option<(Uuid,)> = sqlx::query_as(
            "SELECT bidder_id FROM bids WHERE auction_id = $1 AND is_winning AND bidder_id <> $2",
        )
        .bind(auction_id)
        .bind(bidder_id)
        .fetch_optional(&mut *tx)
        .await?;
        displaced_winner = previous.map(|(id,)| id);

        sqlx::query("UPDATE bids SET is_winning = FALSE WHERE auction_id = $1 AND is_winning")
            .bind(auction_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE bids SET is_winning = TRUE WHERE id = $1")
            .bind(bid.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok((bid, auction, displaced_winner))
}

fn is_retryable(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03")
        ),
        _ => false,
    }
}

/// A bidder becomes an approved participant on their first bid. Best-effort:
/// a failure here is logged, never surfaced.
async fn auto_register(pool: &PgPool, auction: &Auction, bidder_id: Uuid) {
    let result = async {
        if let Some(user) = User::find_by_id(pool, bidder_id).await? {
            Participant::add(
                pool,
                auction.id,
                Some(bidder_id),
                &user.phone_number,
                ParticipantStatus::Approved,
            )
            .await?;
        }
        Ok::<_, sqlx::Error>(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(
            auction_id = %auction.id,
            bidder_id = %bidder_id,
            error = %e,
            "Participant auto-registration skipped"
        );
    }
}

async fn notify_bid_placed(
    pool: &PgPool,
    auction: &Auction,
    bid: &Bid,
    bidder_id: Uuid,
    displaced_winner: Option<Uuid>,
) {
    let bidder = match User::find_by_id(pool, bidder_id).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping bid notifications, bidder lookup failed");
            return;
        }
    };
    let bidder_name = bidder
        .as_ref()
        .and_then(|u| u.person_name.clone())
        .unwrap_or_else(|| "a participant".to_string());
    let bidder_company = bidder
        .as_ref()
        .and_then(|u| u.company_name.clone())
        .unwrap_or_else(|| "unknown company".to_string());

    notifier::dispatch(
        pool,
        vec![auction.created_by],
        "new_bid",
        auction.id,
        format!(
            "New bid of {} {} placed by {} from {} on your auction \"{}\".",
            bid.amount, auction.currency, bidder_name, bidder_company, auction.title
        ),
    );

    match Participant::user_ids_except(pool, auction.id, bidder_id).await {
        Ok(participant_ids) => notifier::dispatch(
            pool,
            participant_ids,
            "new_bid",
            auction.id,
            format!(
                "New bid of {} {} placed on auction \"{}\".",
                bid.amount, auction.currency, auction.title
            ),
        ),
        Err(e) => {
            tracing::warn!(auction_id = %auction.id, error = %e, "Participant fan-out skipped")
        }
    }

    if let Some(previous_winner) = displaced_winner {
        notifier::dispatch(
            pool,
            vec![previous_winner],
            "outbid",
            auction.id,
            format!(
                "You've been outbid on auction \"{}\". Current winning bid is {} {}.",
                auction.title, bid.amount, auction.currency
            ),
        );
    }
}

/// Approves a pending pre-bid, re-validating against the lowest *other*
/// active bid at approval time since the floor may have moved underneath it.
pub async fn approve_pre_bid(pool: &PgPool, bid_id: Uuid, requester_id: Uuid) -> Result<Bid> {
    let mut tx = pool.begin().await?;

    let bid: Bid = sqlx::query_as("SELECT * FROM bids WHERE id = $1")
        .bind(bid_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Pre-bid not found".to_string()))?;

    let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(bid.auction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction owner can manage pre-bids".to_string(),
        ));
    }
    if auction.status != AuctionStatus::Upcoming {
        return Err(AppError::invariant(
            "Pre-bids can only be moderated while the auction is upcoming",
        ));
    }

    let (lowest_other,): (Option<i64>,) = sqlx::query_as(
        "SELECT MIN(amount) FROM bids WHERE auction_id = $1 AND status <> 'rejected' AND id <> $2",
    )
    .bind(bid.auction_id)
    .bind(bid_id)
    .fetch_one(&mut *tx)
    .await?;

    let ceiling = bid_ceiling(lowest_other, auction.decremental_step, auction.starting_ceiling());
    if bid.amount > ceiling {
        let max_allowed = ceiling.max(0);
        return Err(AppError::InvariantViolation {
            message: format!(
                "Cannot approve pre-bid: amount {} exceeds the allowed maximum {}",
                bid.amount, max_allowed
            ),
            max_allowed: Some(max_allowed),
        });
    }

    let approved: Bid = sqlx::query_as("UPDATE bids SET status = 'approved' WHERE id = $1 RETURNING *")
        .bind(bid_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(approved)
}

/// Rejects a pre-bid by hard delete, then repairs auction state in the same
/// transaction: the winning flag moves to the next-lowest active bid when the
/// deleted bid held it, and current_price follows the new lowest active bid
/// (or resets to the starting ceiling when none remain).
pub async fn reject_pre_bid(pool: &PgPool, bid_id: Uuid, requester_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    let bid: Bid = sqlx::query_as("SELECT * FROM bids WHERE id = $1")
        .bind(bid_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Pre-bid not found".to_string()))?;

    let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(bid.auction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction owner can manage pre-bids".to_string(),
        ));
    }
    if auction.status != AuctionStatus::Upcoming {
        return Err(AppError::invariant(
            "Pre-bids can only be moderated while the auction is upcoming",
        ));
    }

    sqlx::query("DELETE FROM bids WHERE id = $1")
        .bind(bid_id)
        .execute(&mut *tx)
        .await?;

    let next_best: Option<(Uuid, i64)> = sqlx::query_as(
        r#"
        SELECT id, amount FROM bids
        WHERE auction_id = $1 AND status <> 'rejected'
        ORDER BY amount ASC, placed_at ASC
        LIMIT 1
        "#,
    )
    .bind(bid.auction_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (promoted, new_price) =
        reelect_after_removal(next_best, bid.is_winning, auction.starting_ceiling());

    if let Some(next_id) = promoted {
        sqlx::query("UPDATE bids SET is_winning = TRUE WHERE id = $1")
            .bind(next_id)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE auctions SET current_price = $2, updated_at = NOW() WHERE id = $1")
        .bind(bid.auction_id)
        .bind(new_price)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn first_bid_ceiling_is_the_starting_ceiling() {
        assert_eq!(bid_ceiling(None, 100, 1000), 1000);
    }

    #[test]
    fn subsequent_ceiling_is_lowest_minus_step() {
        // Worked example: step 100, starting ceiling 1000.
        // First bid 1000 accepted; second must be <= 900.
        assert_eq!(bid_ceiling(Some(1000), 100, 1000), 900);
        assert!(950 > bid_ceiling(Some(1000), 100, 1000)); // 950 rejected
        assert!(850 <= bid_ceiling(Some(1000), 100, 1000)); // 850 accepted
        assert_eq!(bid_ceiling(Some(850), 100, 1000), 750);
    }

    #[test]
    fn ceiling_goes_negative_at_the_price_floor() {
        assert_eq!(bid_ceiling(Some(50), 100, 1000), -50);
        assert_eq!(bid_ceiling(Some(50), 100, 1000).max(0), 0);
    }

    fn bid_at(amount: i64, seconds: i64) -> BidWithBidder {
        BidWithBidder {
            id: Uuid::new_v4(),
            auction_id: Uuid::nil(),
            bidder_id: Uuid::new_v4(),
            amount,
            placed_at: Utc.with_ymd_and_hms(2025, 9, 8, 10, 0, 0).unwrap()
                + Duration::seconds(seconds),
            is_winning: false,
            status: BidStatus::Approved,
            person_name: None,
            company_name: None,
        }
    }

    #[test]
    fn ranking_sorts_by_amount_then_time() {
        let ranked = assign_ranks(vec![bid_at(900, 30), bid_at(700, 10), bid_at(800, 20)]);
        let amounts: Vec<i64> = ranked.iter().map(|r| r.bid.amount).collect();
        assert_eq!(amounts, vec![700, 800, 900]);
        assert_eq!(
            ranked.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn equal_amounts_rank_earlier_submission_first() {
        let early = bid_at(500, 5);
        let late = bid_at(500, 50);
        let early_id = early.id;

        let ranked = assign_ranks(vec![late, early]);
        assert_eq!(ranked[0].bid.id, early_id);
        // Strictly increasing ranks, no tie-sharing.
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn ranking_empty_list_is_empty() {
        assert!(assign_ranks(Vec::new()).is_empty());
    }

    #[test]
    fn rejecting_the_winning_bid_promotes_the_next_lowest() {
        let next = Uuid::new_v4();
        assert_eq!(
            reelect_after_removal(Some((next, 800)), true, 1000),
            (Some(next), 800)
        );
    }

    #[test]
    fn rejecting_a_non_winning_bid_only_refreshes_the_price() {
        let next = Uuid::new_v4();
        assert_eq!(reelect_after_removal(Some((next, 700)), false, 1000), (None, 700));
    }

    #[test]
    fn rejecting_the_sole_bid_resets_to_the_starting_ceiling() {
        assert_eq!(reelect_after_removal(None, true, 1000), (None, 1000));
        assert_eq!(reelect_after_removal(None, false, 1000), (None, 1000));
    }
}
