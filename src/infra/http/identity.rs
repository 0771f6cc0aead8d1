use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::application::error::AppError;
use crate::domain::types::UserId;

/// Header carrying the caller's user id. Authentication happens upstream.
pub const USER_ID_HEADER: &str = "System-Design-User-Id";

/// The acting user, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct AuthorizedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthorizedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let user = UserId::parse(raw).map_err(|_| AppError::Unauthorized)?;
        Ok(Self(user))
    }
}
