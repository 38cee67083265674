use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;
use crate::db::registry::{DatabaseRef, UserId};

/// Header set by the auth gateway in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Optional header naming one of the user's databases; the default one otherwise.
pub const DATABASE_ID_HEADER: &str = "x-database-id";

/// Who is asking, and which database their request runs against.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    pub database: DatabaseRef,
}

impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("missing user id"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("user id is not valid text"))?;

        let user_id = UserId::parse(raw).ok_or_else(|| ApiError::unauthorized("invalid user id"))?;

        let database_name = parts
            .headers
            .get(DATABASE_ID_HEADER)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| ApiError::bad_request("database id is not valid text"))
            })
            .transpose()?;
        let database = state.registry.resolve(&user_id, database_name)?;
        debug!("Request context: user {} on database {}", user_id, database.id);

        Ok(Self { user_id, database })
    }
}
