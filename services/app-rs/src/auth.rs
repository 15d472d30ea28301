//! Caller identity for the authenticated API surface.
//!
//! Session handling lives in the auth service; by the time a request reaches
//! this process the middleware in front has validated the session and stamped
//! the owning workspace onto `x-workspace-id`. This extractor turns that
//! header into a workspace + plan pair or rejects the request.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use common_rs::enums::Plan;

use crate::error::ApiError;
use crate::state::AppState;

pub struct AuthedWorkspace {
    pub workspace_id: String,
    pub plan: Plan,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthedWorkspace {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let workspace_id = parts
            .headers
            .get("x-workspace-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(ApiError::Unauthorized)?;

        let plan = state
            .plan_cache
            .get(&state.db, &workspace_id)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::TokenInvalid)?;

        Ok(Self { workspace_id, plan })
    }
}
