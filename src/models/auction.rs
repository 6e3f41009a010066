use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "auction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    /// Terminal states accept no further transitions from the sweep.
    pub fn is_terminal(self) -> bool {
        matches!(self, AuctionStatus::Completed | AuctionStatus::Cancelled)
    }

    pub fn is_biddable(self) -> bool {
        matches!(self, AuctionStatus::Upcoming | AuctionStatus::Live)
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuctionStatus::Upcoming => "upcoming",
            AuctionStatus::Live => "live",
            AuctionStatus::Completed => "completed",
            AuctionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Auction {
    pub id: Uuid,
    pub auction_no: i64,
    pub title: String,
    pub description: Option<String>,
    pub auction_date: NaiveDate,
    pub start_time: NaiveTime,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    /// Scheduled end of window at creation; restamped to the computed end on
    /// completion, or to "now" on a manual close.
    pub ends_at: DateTime<Utc>,
    pub currency: String,
    pub decremental_step: i64,
    pub current_price: i64,
    pub status: AuctionStatus,
    pub open_to_all: bool,
    pub pre_bid_allowed: bool,
    pub created_by: Uuid,
    pub winner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    /// Short human-facing reference, e.g. "AUC007".
    pub fn short_code(&self) -> String {
        format!("AUC{:03}", self.auction_no)
    }

    /// The price a first bid must not exceed. The decremental step doubles as
    /// the starting ceiling.
    pub fn starting_ceiling(&self) -> i64 {
        self.decremental_step
    }
}

#[derive(Debug, Clone)]
pub struct CreateAuctionData {
    pub title: String,
    pub description: Option<String>,
    pub auction_date: NaiveDate,
    pub start_time: NaiveTime,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub ends_at: DateTime<Utc>,
    pub currency: String,
    pub decremental_step: i64,
    pub open_to_all: bool,
    pub pre_bid_allowed: bool,
    pub created_by: Uuid,
    pub status: AuctionStatus,
}

#[derive(Debug, Clone, Default)]
pub struct AuctionFilter {
    pub status: Option<AuctionStatus>,
    pub created_by: Option<Uuid>,
    pub participated_by: Option<Uuid>,
    pub search: Option<String>,
}

impl Auction {
    pub async fn create(pool: &PgPool, data: CreateAuctionData) -> Result<Self, sqlx::Error> {
        let auction = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO auctions
                (title, description, auction_date, start_time, starts_at,
                 duration_minutes, ends_at, currency, decremental_step,
                 current_price, open_to_all, pre_bid_allowed, created_by, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.auction_date)
        .bind(data.start_time)
        .bind(data.starts_at)
        .bind(data.duration_minutes)
        .bind(data.ends_at)
        .bind(&data.currency)
        .bind(data.decremental_step)
        .bind(data.open_to_all)
        .bind(data.pre_bid_allowed)
        .bind(data.created_by)
        .bind(data.status)
        .fetch_one(pool)
        .await?;

        Ok(auction)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM auctions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_live(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM auctions
            WHERE status = 'live'
            ORDER BY auction_date, start_time
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn list_filtered(
        pool: &PgPool,
        filter: &AuctionFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT a.* FROM auctions a WHERE TRUE");

        if let Some(status) = filter.status {
            qb.push(" AND a.status = ").push_bind(status);
        }
        if let Some(created_by) = filter.created_by {
            qb.push(" AND a.created_by = ").push_bind(created_by);
        }
        if let Some(user_id) = filter.participated_by {
            qb.push(" AND EXISTS (SELECT 1 FROM bids b WHERE b.auction_id = a.id AND b.bidder_id = ")
                .push_bind(user_id)
                .push(")");
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            qb.push(" AND (a.title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR a.description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }

        qb.push(" ORDER BY a.auction_date DESC, a.start_time DESC");
        qb.build_query_as::<Self>().fetch_all(pool).await
    }

    pub async fn update_decremental_step(
        pool: &PgPool,
        id: Uuid,
        step: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        // Resetting the step also resets the starting ceiling.
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE auctions
            SET decremental_step = $2, current_price = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(step)
        .fetch_optional(pool)
        .await
    }

    /// Cancellation is terminal and only reachable from a pre-completed
    /// state; returns None when the auction is already terminal.
    pub async fn mark_cancelled(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE auctions
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status IN ('upcoming', 'live')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Manual upcoming -> live override; returns None unless upcoming.
    pub async fn mark_live(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE auctions
            SET status = 'live', updated_at = NOW()
            WHERE id = $1 AND status = 'upcoming'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        // Participants, bids and notifications cascade.
        let result = sqlx::query("DELETE FROM auctions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
