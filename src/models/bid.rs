use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Moderation sub-status. Meaningful for pre-bids placed while the auction is
/// still upcoming; bids on a live auction are inserted as `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bid_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bid {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
    pub is_winning: bool,
    pub status: BidStatus,
}

/// Bid joined with bidder identity, for display and reports.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BidWithBidder {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
    pub is_winning: bool,
    pub status: BidStatus,
    pub person_name: Option<String>,
    pub company_name: Option<String>,
}

impl Bid {
    /// All non-rejected bids for an auction in rank order: lowest amount
    /// first, earlier placement breaking ties.
    pub async fn find_active_ranked(
        pool: &PgPool,
        auction_id: Uuid,
    ) -> Result<Vec<BidWithBidder>, sqlx::Error> {
        sqlx::query_as::<_, BidWithBidder>(
            r#"
            SELECT b.*, u.person_name, u.company_name
            FROM bids b
            JOIN users u ON u.id = b.bidder_id
            WHERE b.auction_id = $1 AND b.status <> 'rejected'
            ORDER BY b.amount ASC, b.placed_at ASC
            "#,
        )
        .bind(auction_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_winning(
        pool: &PgPool,
        auction_id: Uuid,
    ) -> Result<Option<BidWithBidder>, sqlx::Error> {
        sqlx::query_as::<_, BidWithBidder>(
            r#"
            SELECT b.*, u.person_name, u.company_name
            FROM bids b
            JOIN users u ON u.id = b.bidder_id
            WHERE b.auction_id = $1 AND b.is_winning
            "#,
        )
        .bind(auction_id)
        .fetch_optional(pool)
        .await
    }

    /// Pending / approved pre-bids for the owner's moderation view.
    pub async fn find_pre_bids(
        pool: &PgPool,
        auction_id: Uuid,
    ) -> Result<Vec<BidWithBidder>, sqlx::Error> {
        sqlx::query_as::<_, BidWithBidder>(
            r#"
            SELECT b.*, u.person_name, u.company_name
            FROM bids b
            JOIN users u ON u.id = b.bidder_id
            WHERE b.auction_id = $1
              AND b.status <> 'rejected'
              AND NOT b.is_winning
            ORDER BY b.amount ASC, b.placed_at ASC
            "#,
        )
        .bind(auction_id)
        .fetch_all(pool)
        .await
    }

    /// The caller's most recent bid on an auction.
    pub async fn find_latest_for_bidder(
        pool: &PgPool,
        auction_id: Uuid,
        bidder_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bids
            WHERE auction_id = $1 AND bidder_id = $2
            ORDER BY placed_at DESC
            LIMIT 1
            "#,
        )
        .bind(auction_id)
        .bind(bidder_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn has_bid(
        pool: &PgPool,
        auction_id: Uuid,
        bidder_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM bids WHERE auction_id = $1 AND bidder_id = $2)",
        )
        .bind(auction_id)
        .bind(bidder_id)
        .fetch_one(pool)
        .await?;
        Ok(exists.0)
    }
}
