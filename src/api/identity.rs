use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::AppError;

/// Caller identity as resolved by the upstream auth gateway. The core trusts
/// these headers completely; issuing and verifying sessions is not this
/// service's job.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub phone_number: Option<String>,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(AppError::Unauthorized)?;

        let phone_number = parts
            .headers
            .get("x-phone-number")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(Identity {
            user_id,
            phone_number,
        })
    }
}
