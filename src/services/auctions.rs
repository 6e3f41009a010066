use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::auction::{AuctionFilter, CreateAuctionData};
use crate::models::bid::BidWithBidder;
use crate::models::participant::ParticipantWithUser;
use crate::models::{Auction, AuctionStatus, Bid, Participant, ParticipantStatus, User};
use crate::services::bidding::{assign_ranks, RankedBid};
use crate::services::clock::{self, Clock};
use crate::services::{lifecycle, notifier};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAuctionRequest {
    pub title: String,
    pub description: Option<String>,
    pub auction_date: NaiveDate,
    /// Civil start time in the auction zone, "HH:MM:SS" or "HH:MM".
    pub start_time: String,
    pub duration_minutes: i32,
    pub currency: Option<String>,
    pub decremental_step: i64,
    #[serde(default)]
    pub open_to_all: bool,
    #[serde(default = "default_true")]
    pub pre_bid_allowed: bool,
    #[serde(default)]
    pub participants: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct CreatedAuction {
    pub auction: Auction,
    pub invited_participants: u64,
}

pub async fn create_auction(
    pool: &PgPool,
    clock: &dyn Clock,
    owner_id: Uuid,
    req: CreateAuctionRequest,
) -> Result<CreatedAuction> {
    if req.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if req.duration_minutes <= 0 {
        return Err(AppError::Validation(
            "duration_minutes must be a positive number".to_string(),
        ));
    }
    if req.decremental_step <= 0 {
        return Err(AppError::Validation(
            "decremental_step must be a positive number".to_string(),
        ));
    }
    let start_time = clock::parse_civil_time(&req.start_time).ok_or_else(|| {
        AppError::Validation("start_time must be a valid HH:MM:SS time".to_string())
    })?;

    let starts_at = clock::civil_to_instant(req.auction_date, start_time);
    let ends_at = clock::end_of_window(starts_at, req.duration_minutes);
    let now = clock.now();

    // Created live when the scheduled instant has already passed; a sweep
    // right after creation completes it if the whole window has elapsed.
    let status = match lifecycle::transition_for(
        AuctionStatus::Upcoming,
        starts_at,
        req.duration_minutes,
        now,
    ) {
        Some(AuctionStatus::Live) => AuctionStatus::Live,
        _ => AuctionStatus::Upcoming,
    };

    let auction = Auction::create(
        pool,
        CreateAuctionData {
            title: req.title.trim().to_string(),
            description: req.description,
            auction_date: req.auction_date,
            start_time,
            starts_at,
            duration_minutes: req.duration_minutes,
            ends_at,
            currency: req.currency.unwrap_or_else(|| "INR".to_string()),
            decremental_step: req.decremental_step,
            open_to_all: req.open_to_all,
            pre_bid_allowed: req.pre_bid_allowed,
            created_by: owner_id,
            status,
        },
    )
    .await?;

    lifecycle::run_sweep(pool, clock).await?;

    let phones = normalize_phones(&req.participants);
    let mut invited = 0;
    if !phones.is_empty() {
        invited = Participant::invite_many(pool, auction.id, &phones).await?;
        notify_invitations(pool, &auction, &phones).await;
    }

    let auction = Auction::find_by_id(pool, auction.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    Ok(CreatedAuction {
        auction,
        invited_participants: invited,
    })
}

/// Trims, strips punctuation and de-duplicates invitation phone numbers
/// while preserving order.
pub fn normalize_phones(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .map(|p| {
            p.chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect::<String>()
        })
        .filter(|p| !p.is_empty())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

async fn notify_invitations(pool: &PgPool, auction: &Auction, phones: &[String]) {
    notifier::dispatch(
        pool,
        vec![auction.created_by],
        "participant_added",
        auction.id,
        format!(
            "{} participant(s) added to your auction \"{}\".",
            phones.len(),
            auction.title
        ),
    );

    match User::ids_for_phones(pool, phones).await {
        Ok(user_ids) => notifier::dispatch(
            pool,
            user_ids,
            "added_to_auction",
            auction.id,
            format!(
                "You've been added to auction \"{}\" on {} at {}.",
                auction.title,
                auction.auction_date,
                clock::format_civil_time_ampm(auction.start_time)
            ),
        ),
        Err(e) => {
            tracing::warn!(auction_id = %auction.id, error = %e, "Invitation fan-out skipped")
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ContactInfo {
    pub user_id: Uuid,
    pub person_name: Option<String>,
    pub company_name: Option<String>,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct WinnerInfo {
    pub user_id: Uuid,
    pub person_name: Option<String>,
    pub company_name: Option<String>,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct AuctionStatistics {
    pub total_participants: usize,
    pub total_bids: usize,
    pub active_participants: usize,
    pub highest_bid: Option<i64>,
    pub lowest_bid: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuctionDetails {
    #[serde(flatten)]
    pub auction: Auction,
    pub auction_code: String,
    pub formatted_start_time: String,
    pub formatted_end_time: String,
    pub time_status: String,
    pub time_value: String,
    pub time_remaining_ms: i64,
    pub is_creator: bool,
    pub has_joined: bool,
    pub has_bid: bool,
    pub creator_info: Option<ContactInfo>,
    pub winner_info: Option<WinnerInfo>,
    pub participants: Vec<ParticipantWithUser>,
    pub bids: Vec<RankedBid>,
    pub statistics: AuctionStatistics,
}

/// Countdown label and remaining milliseconds for display.
pub fn time_display(
    status: AuctionStatus,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (String, String, i64) {
    match status {
        AuctionStatus::Live => {
            let remaining = (ends_at - now).num_milliseconds();
            if remaining > 0 {
                let secs = remaining / 1000;
                let value = format!(
                    "{:02}h {:02}m {:02}s",
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60
                );
                ("Live".to_string(), value, remaining)
            } else {
                ("Ended".to_string(), String::new(), 0)
            }
        }
        AuctionStatus::Upcoming => {
            let remaining = (starts_at - now).num_milliseconds();
            if remaining > 0 {
                let mins = remaining / 60_000;
                let value = format!(
                    "{}d {}h {}m",
                    mins / (60 * 24),
                    (mins / 60) % 24,
                    mins % 60
                );
                ("Starts in".to_string(), value, remaining)
            } else {
                ("Starting soon".to_string(), String::new(), 0)
            }
        }
        AuctionStatus::Completed => ("Completed".to_string(), String::new(), 0),
        AuctionStatus::Cancelled => ("Cancelled".to_string(), String::new(), 0),
    }
}

pub async fn get_auction_details(
    pool: &PgPool,
    clock: &dyn Clock,
    auction_id: Uuid,
    requester_id: Uuid,
) -> Result<AuctionDetails> {
    lifecycle::run_sweep(pool, clock).await?;

    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    let requester = User::find_by_id(pool, requester_id).await?;
    let requester_phone = requester.as_ref().map(|u| u.phone_number.as_str());

    let is_creator = auction.created_by == requester_id;
    let has_joined = match requester_phone {
        Some(phone) => Participant::is_participant(pool, auction_id, phone).await?,
        None => false,
    };
    let has_bid = Bid::has_bid(pool, auction_id, requester_id).await?;

    if !is_creator && !has_joined && !has_bid && !auction.open_to_all {
        return Err(AppError::Forbidden(
            "You do not have access to this auction".to_string(),
        ));
    }

    let participants = Participant::find_by_auction(pool, auction_id).await?;
    let bids = Bid::find_active_ranked(pool, auction_id).await?;
    let winning = Bid::find_winning(pool, auction_id).await?;
    let creator = User::find_by_id(pool, auction.created_by).await?;

    let statistics = AuctionStatistics {
        total_participants: participants.len(),
        total_bids: bids.len(),
        active_participants: participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Joined)
            .count(),
        highest_bid: bids.iter().map(|b| b.amount).max(),
        lowest_bid: bids.iter().map(|b| b.amount).min(),
    };

    let (time_status, time_value, time_remaining_ms) =
        time_display(auction.status, auction.starts_at, auction.ends_at, clock.now());

    Ok(AuctionDetails {
        auction_code: auction.short_code(),
        formatted_start_time: clock::format_civil_time_ampm(auction.start_time),
        formatted_end_time: clock::format_time_ampm(auction.ends_at),
        time_status,
        time_value,
        time_remaining_ms,
        is_creator,
        has_joined,
        has_bid,
        creator_info: creator.map(|u| ContactInfo {
            user_id: u.id,
            person_name: u.person_name,
            company_name: u.company_name,
            phone_number: u.phone_number,
        }),
        winner_info: winning.map(|b| WinnerInfo {
            user_id: b.bidder_id,
            person_name: b.person_name,
            company_name: b.company_name,
            amount: b.amount,
        }),
        participants,
        bids: assign_ranks(bids),
        statistics,
        auction,
    })
}

pub async fn list_live_auctions(pool: &PgPool, clock: &dyn Clock) -> Result<Vec<Auction>> {
    lifecycle::run_sweep(pool, clock).await?;
    Ok(Auction::find_live(pool).await?)
}

pub async fn list_auctions(
    pool: &PgPool,
    clock: &dyn Clock,
    filter: &AuctionFilter,
) -> Result<Vec<Auction>> {
    lifecycle::run_sweep(pool, clock).await?;
    Ok(Auction::list_filtered(pool, filter).await?)
}

#[derive(Debug, Serialize)]
pub struct ClosedAuction {
    pub auction: Auction,
    pub winner: Option<BidWithBidder>,
}

fn authorize_close(auction: &Auction, requester_id: Uuid) -> Result<()> {
    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can close the auction".to_string(),
        ));
    }
    if auction.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Auction is already {}",
            auction.status
        )));
    }
    Ok(())
}

/// Manual completion, independent of the scheduler. Stamps ends_at to "now"
/// since the window was cut short by hand. The winner snapshot and the status
/// flip happen under a row lock on the auction so a bid landing mid-close
/// cannot leave a stale winner_id behind.
pub async fn close_auction(
    pool: &PgPool,
    clock: &dyn Clock,
    auction_id: Uuid,
    requester_id: Uuid,
) -> Result<ClosedAuction> {
    let mut tx = pool.begin().await?;

    let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(auction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    authorize_close(&auction, requester_id)?;

    let winning: Option<BidWithBidder> = sqlx::query_as(
        r#"
        SELECT b.*, u.person_name, u.company_name
        FROM bids b
        JOIN users u ON u.id = b.bidder_id
        WHERE b.auction_id = $1 AND b.is_winning
        "#,
    )
    .bind(auction_id)
    .fetch_optional(&mut *tx)
    .await?;

    let auction: Auction = sqlx::query_as(
        r#"
        UPDATE auctions
        SET status = 'completed', winner_id = $2, ends_at = $3, updated_at = NOW()
        WHERE id = $1 AND status IN ('upcoming', 'live')
        RETURNING *
        "#,
    )
    .bind(auction_id)
    .bind(winning.as_ref().map(|b| b.bidder_id))
    .bind(clock.now())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("Auction is already terminal".to_string()))?;

    tx.commit().await?;

    match &winning {
        Some(winner) => {
            notifier::dispatch(
                pool,
                vec![winner.bidder_id],
                "won_auction",
                auction.id,
                format!(
                    "You won auction \"{}\" with bid {} {}.",
                    auction.title, winner.amount, auction.currency
                ),
            );
            notifier::dispatch(
                pool,
                vec![auction.created_by],
                "auction_completed",
                auction.id,
                format!(
                    "Auction \"{}\" has been won with bid {} {}.",
                    auction.title, winner.amount, auction.currency
                ),
            );
        }
        None => notifier::dispatch(
            pool,
            vec![auction.created_by],
            "auction_completed",
            auction.id,
            format!("Auction \"{}\" completed with no winning bid.", auction.title),
        ),
    }

    Ok(ClosedAuction {
        auction,
        winner: winning,
    })
}

fn authorize_extend(auction: &Auction, requester_id: Uuid) -> Result<()> {
    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can extend the auction".to_string(),
        ));
    }
    if auction.status != AuctionStatus::Live {
        return Err(AppError::invariant("Only live auctions can be extended"));
    }
    Ok(())
}

/// Extends a live auction's window. The live check and the update happen
/// under a row lock so a sweep completing the auction mid-extend cannot
/// stretch an already-closed window.
pub async fn extend_auction(
    pool: &PgPool,
    auction_id: Uuid,
    requester_id: Uuid,
    additional_minutes: i32,
) -> Result<Auction> {
    if additional_minutes <= 0 {
        return Err(AppError::Validation(
            "additional_minutes must be a positive number".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let auction: Auction = sqlx::query_as("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(auction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    authorize_extend(&auction, requester_id)?;

    let auction: Auction = sqlx::query_as(
        r#"
        UPDATE auctions
        SET duration_minutes = duration_minutes + $2,
            ends_at = ends_at + make_interval(mins => $2),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(auction_id)
    .bind(additional_minutes)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(auction)
}

pub async fn start_auction(pool: &PgPool, auction_id: Uuid, requester_id: Uuid) -> Result<Auction> {
    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can start the auction".to_string(),
        ));
    }

    Auction::mark_live(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::invariant("Only upcoming auctions can be started"))
}

pub async fn cancel_auction(pool: &PgPool, auction_id: Uuid, requester_id: Uuid) -> Result<Auction> {
    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can cancel the auction".to_string(),
        ));
    }
    if auction.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Auction is already {}",
            auction.status
        )));
    }

    Auction::mark_cancelled(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::Conflict("Auction is already terminal".to_string()))
}

/// Resets the decremental step (and with it the starting ceiling). Only
/// meaningful before any bidding has happened.
pub async fn update_decremental_step(
    pool: &PgPool,
    auction_id: Uuid,
    requester_id: Uuid,
    step: i64,
) -> Result<Auction> {
    if step <= 0 {
        return Err(AppError::Validation(
            "decremental_step must be a positive number".to_string(),
        ));
    }

    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can change the decremental step".to_string(),
        ));
    }
    if !Bid::find_active_ranked(pool, auction_id).await?.is_empty() {
        return Err(AppError::invariant(
            "Cannot change the decremental step once bids exist",
        ));
    }

    Auction::update_decremental_step(pool, auction_id, step)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))
}

/// Deletes an auction outright; participants, bids and notifications
/// cascade with it.
pub async fn delete_auction(pool: &PgPool, auction_id: Uuid, requester_id: Uuid) -> Result<()> {
    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can delete the auction".to_string(),
        ));
    }

    if !Auction::delete(pool, auction_id).await? {
        return Err(AppError::NotFound("Auction not found".to_string()));
    }
    Ok(())
}

pub async fn join_auction(pool: &PgPool, auction_id: Uuid, phone_number: &str) -> Result<()> {
    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    let is_participant = Participant::is_participant(pool, auction_id, phone_number).await?;
    if !is_participant && !auction.open_to_all {
        return Err(AppError::Forbidden(
            "You are not invited to this auction".to_string(),
        ));
    }

    if is_participant {
        Participant::update_status(pool, auction_id, phone_number, ParticipantStatus::Joined)
            .await?;
    } else {
        // Open auctions accept unknown phones directly as joined.
        let user = User::find_by_phone(pool, phone_number).await?;
        Participant::add(
            pool,
            auction_id,
            user.map(|u| u.id),
            phone_number,
            ParticipantStatus::Joined,
        )
        .await?;
    }

    Ok(())
}

pub async fn add_participants(
    pool: &PgPool,
    auction_id: Uuid,
    requester_id: Uuid,
    raw_phones: &[String],
) -> Result<u64> {
    let auction = Auction::find_by_id(pool, auction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Auction not found".to_string()))?;

    if auction.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the auction creator can invite participants".to_string(),
        ));
    }

    let phones = normalize_phones(raw_phones);
    if phones.is_empty() {
        return Err(AppError::Validation(
            "At least one phone number is required".to_string(),
        ));
    }

    let invited = Participant::invite_many(pool, auction_id, &phones).await?;
    notify_invitations(pool, &auction, &phones).await;
    Ok(invited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 8, 10, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn normalizes_and_dedupes_phones() {
        let raw = vec![
            " +91 98765 43210 ".to_string(),
            "[\"9876543210\"]".to_string(),
            "+919876543210".to_string(),
            "".to_string(),
            "+919876543210".to_string(),
        ];
        assert_eq!(
            normalize_phones(&raw),
            vec!["+919876543210".to_string(), "9876543210".to_string()]
        );
    }

    #[test]
    fn live_countdown_counts_to_end_of_window() {
        let (status, value, ms) = time_display(AuctionStatus::Live, at(0), at(30), at(5));
        assert_eq!(status, "Live");
        assert_eq!(value, "00h 25m 00s");
        assert_eq!(ms, 25 * 60 * 1000);
    }

    #[test]
    fn live_countdown_keeps_whole_hours_past_a_day() {
        // 25 hour window, nothing elapsed: hours must not wrap at 24.
        let (_, value, _) = time_display(AuctionStatus::Live, at(0), at(25 * 60), at(0));
        assert_eq!(value, "25h 00m 00s");
    }

    #[test]
    fn live_past_end_shows_ended() {
        let (status, value, ms) = time_display(AuctionStatus::Live, at(0), at(30), at(31));
        assert_eq!(status, "Ended");
        assert!(value.is_empty());
        assert_eq!(ms, 0);
    }

    #[test]
    fn upcoming_counts_down_to_start() {
        let (status, value, _) =
            time_display(AuctionStatus::Upcoming, at(26 * 60), at(26 * 60 + 30), at(0));
        assert_eq!(status, "Starts in");
        assert_eq!(value, "1d 2h 0m");

        let (status, value, ms) = time_display(AuctionStatus::Upcoming, at(0), at(30), at(0));
        assert_eq!(status, "Starting soon");
        assert!(value.is_empty());
        assert_eq!(ms, 0);
    }

    fn auction_with(status: AuctionStatus, owner: Uuid) -> Auction {
        Auction {
            id: Uuid::new_v4(),
            auction_no: 7,
            title: "Steel coils".to_string(),
            description: None,
            auction_date: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            start_time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            starts_at: at(0),
            duration_minutes: 30,
            ends_at: at(30),
            currency: "INR".to_string(),
            decremental_step: 100,
            current_price: 1000,
            status,
            open_to_all: false,
            pre_bid_allowed: true,
            created_by: owner,
            winner_id: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    #[test]
    fn only_the_owner_may_close_or_extend() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let auction = auction_with(AuctionStatus::Live, owner);

        assert!(matches!(
            authorize_close(&auction, stranger),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            authorize_extend(&auction, stranger),
            Err(AppError::Forbidden(_))
        ));
        assert!(authorize_close(&auction, owner).is_ok());
        assert!(authorize_extend(&auction, owner).is_ok());
    }

    #[test]
    fn terminal_auctions_cannot_be_closed_again() {
        let owner = Uuid::new_v4();
        for status in [AuctionStatus::Completed, AuctionStatus::Cancelled] {
            let auction = auction_with(status, owner);
            assert!(matches!(
                authorize_close(&auction, owner),
                Err(AppError::Conflict(_))
            ));
        }
    }

    #[test]
    fn only_live_auctions_can_be_extended() {
        let owner = Uuid::new_v4();
        for status in [
            AuctionStatus::Upcoming,
            AuctionStatus::Completed,
            AuctionStatus::Cancelled,
        ] {
            let auction = auction_with(status, owner);
            assert!(matches!(
                authorize_extend(&auction, owner),
                Err(AppError::InvariantViolation { .. })
            ));
        }
    }

    #[test]
    fn terminal_states_have_static_labels() {
        assert_eq!(
            time_display(AuctionStatus::Completed, at(0), at(30), at(60)).0,
            "Completed"
        );
        assert_eq!(
            time_display(AuctionStatus::Cancelled, at(0), at(30), at(60)).0,
            "Cancelled"
        );
    }
}
