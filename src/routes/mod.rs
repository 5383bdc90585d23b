//! Route modules for the transfer server
//!
//! Everything job-scoped lives under `/api/v1/users/:user_id/jobs/:job_id`.
//! The owner in the path has already been authenticated upstream.

pub mod download;
pub mod health;
pub mod upload;

use axum::{
    extract::{DefaultBodyLimit, Query},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::{TransferPlan, CHUNK_TEMP_DIR};
use crate::upload::Owner;

/// Largest accepted request body: one chunk plus multipart framing, or one
/// direct upload (which never exceeds the chunk threshold)
pub const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Prefix of every job-scoped route
pub const JOB_SCOPE: &str = "/api/v1/users/:user_id/jobs/:job_id";

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .route("/api/v1/transfer/plan", get(transfer_plan))
        .nest(
            JOB_SCOPE,
            Router::new()
                .merge(upload::router())
                .merge(download::router()),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PlanQuery {
    size: u64,
}

/// GET /api/v1/transfer/plan?size=N
///
/// Tell a client how to send a payload of `size` bytes.
async fn transfer_plan(Query(query): Query<PlanQuery>) -> Json<TransferPlan> {
    Json(TransferPlan::for_size(query.size))
}

// ============================================================================
// Path validation
// ============================================================================

/// Owner segments shared by every job-scoped route
#[derive(Debug, Deserialize)]
pub struct JobPath {
    pub user_id: String,
    pub job_id: String,
}

impl JobPath {
    /// Validate both segments and turn them into an [`Owner`].
    ///
    /// A job's upload directory sits beside the user's chunk staging
    /// directory, so a job may not take that name.
    pub fn owner(&self) -> Result<Owner> {
        let user_id = sanitize_segment("user_id", &self.user_id)?;
        let job_id = sanitize_segment("job_id", &self.job_id)?;
        if job_id == CHUNK_TEMP_DIR {
            return Err(AppError::BadRequest(format!("Reserved job_id: {job_id:?}")));
        }
        Ok(Owner::new(user_id, job_id))
    }
}

/// Accept a value only if it names exactly one entry inside its directory.
///
/// Empty values, `.`/`..`, path separators and control characters are
/// rejected.
pub fn sanitize_segment<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_control);

    if invalid {
        return Err(AppError::BadRequest(format!("Invalid {kind}: {value:?}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("file_name", "report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_segment("file_name", "a..b.txt").unwrap(), "a..b.txt");
        assert_eq!(sanitize_segment("file_name", "my file (1).png").unwrap(), "my file (1).png");

        for bad in ["", ".", "..", "../etc", "a/b", "a\\b", "a\nb", "nul\0"] {
            assert!(
                matches!(sanitize_segment("file_name", bad), Err(AppError::BadRequest(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_job_path_owner() {
        let path = JobPath {
            user_id: "u1".to_string(),
            job_id: "j1".to_string(),
        };
        assert_eq!(path.owner().unwrap(), Owner::new("u1", "j1"));

        let path = JobPath {
            user_id: "..".to_string(),
            job_id: "j1".to_string(),
        };
        assert!(path.owner().is_err());

        let path = JobPath {
            user_id: "u1".to_string(),
            job_id: CHUNK_TEMP_DIR.to_string(),
        };
        assert!(matches!(path.owner(), Err(AppError::BadRequest(_))));
    }
}
