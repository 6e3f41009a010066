// API module - HTTP surface

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::services::clock::Clock;

pub mod auctions;
pub mod bids;
pub mod identity;
pub mod notifications;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
}
