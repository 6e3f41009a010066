use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Invited,
    Joined,
    Approved,
    Declined,
    Removed,
}

/// Participation is keyed by phone identity so people can be invited before
/// they register; user_id is attached opportunistically and may stay null.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Participant {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub user_id: Option<Uuid>,
    pub phone_number: String,
    pub status: ParticipantStatus,
    pub invited_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ParticipantWithUser {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub user_id: Option<Uuid>,
    pub phone_number: String,
    pub status: ParticipantStatus,
    pub invited_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
    pub person_name: Option<String>,
    pub company_name: Option<String>,
}

impl Participant {
    /// Adds a participant if the phone is not already on the auction.
    /// Returns the existing or inserted row.
    pub async fn add(
        pool: &PgPool,
        auction_id: Uuid,
        user_id: Option<Uuid>,
        phone_number: &str,
        status: ParticipantStatus,
    ) -> Result<Self, sqlx::Error> {
        if let Some(existing) = Self::find(pool, auction_id, phone_number).await? {
            return Ok(existing);
        }

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO auction_participants (auction_id, user_id, phone_number, status, joined_at)
            VALUES ($1, $2, $3, $4, CASE WHEN $4 IN ('joined', 'approved') THEN NOW() END)
            ON CONFLICT (auction_id, phone_number) DO UPDATE SET status = auction_participants.status
            RETURNING *
            "#,
        )
        .bind(auction_id)
        .bind(user_id)
        .bind(phone_number)
        .bind(status)
        .fetch_one(pool)
        .await
    }

    /// Bulk invitation; duplicates are ignored. Returns the number of rows
    /// actually inserted.
    pub async fn invite_many(
        pool: &PgPool,
        auction_id: Uuid,
        phone_numbers: &[String],
    ) -> Result<u64, sqlx::Error> {
        if phone_numbers.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO auction_participants (auction_id, phone_number, user_id)
            SELECT $1, t.phone, u.id
            FROM UNNEST($2::text[]) AS t(phone)
            LEFT JOIN users u ON u.phone_number = t.phone
            ON CONFLICT (auction_id, phone_number) DO NOTHING
            "#,
        )
        .bind(auction_id)
        .bind(phone_numbers)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn find(
        pool: &PgPool,
        auction_id: Uuid,
        phone_number: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM auction_participants WHERE auction_id = $1 AND phone_number = $2",
        )
        .bind(auction_id)
        .bind(phone_number)
        .fetch_optional(pool)
        .await
    }

    pub async fn is_participant(
        pool: &PgPool,
        auction_id: Uuid,
        phone_number: &str,
    ) -> Result<bool, sqlx::Error> {
        Ok(Self::find(pool, auction_id, phone_number).await?.is_some())
    }

    pub async fn find_by_auction(
        pool: &PgPool,
        auction_id: Uuid,
    ) -> Result<Vec<ParticipantWithUser>, sqlx::Error> {
        sqlx::query_as::<_, ParticipantWithUser>(
            r#"
            SELECT ap.*, u.person_name, u.company_name
            FROM auction_participants ap
            LEFT JOIN users u ON u.phone_number = ap.phone_number
            WHERE ap.auction_id = $1
            ORDER BY ap.invited_at DESC
            "#,
        )
        .bind(auction_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update_status(
        pool: &PgPool,
        auction_id: Uuid,
        phone_number: &str,
        status: ParticipantStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE auction_participants
            SET status = $3,
                joined_at = CASE WHEN $3 = 'joined' THEN NOW() ELSE joined_at END
            WHERE auction_id = $1 AND phone_number = $2
            "#,
        )
        .bind(auction_id)
        .bind(phone_number)
        .bind(status)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Registered user ids of every participant except the given one, for
    /// notification fan-out.
    pub async fn user_ids_except(
        pool: &PgPool,
        auction_id: Uuid,
        except: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id FROM auction_participants
            WHERE auction_id = $1 AND user_id IS NOT NULL AND user_id <> $2
            "#,
        )
        .bind(auction_id)
        .bind(except)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
