use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Notification;

/// Fire-and-forget notification fan-out. Dispatched after the core
/// transaction commits; a failure here is logged and never reaches the
/// operation that triggered it.
pub fn dispatch(
    pool: &PgPool,
    user_ids: Vec<Uuid>,
    notification_type: &'static str,
    auction_id: Uuid,
    message: String,
) {
    if user_ids.is_empty() {
        return;
    }

    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) =
            Notification::insert_many(&pool, &user_ids, notification_type, Some(auction_id), &message)
                .await
        {
            tracing::warn!(
                auction_id = %auction_id,
                notification_type,
                error = %e,
                "Notification dispatch failed"
            );
        }
    });
}
