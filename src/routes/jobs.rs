use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{SubmitJobRequest, PRIORITY_NORMAL, PRIORITY_URGENT};
use crate::routes::{ApiError, ApiErrorKind};
use crate::services::dispatcher::Job;

/// POST /api/v1/job — submit an image-processing job.
///
/// `urgent` runs on the worker pool right away and reports the outcome to
/// the caller; `normal` is published to the queue for asynchronous
/// processing.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let transaction_id = Uuid::new_v4();

    let authorised = header_value(&headers, "user") == state.config.img_username
        && header_value(&headers, "pass") == state.config.img_password;
    if !authorised {
        tracing::error!(%transaction_id, "unauthorised job submission");
        return Err(ApiError::new(ApiErrorKind::Unauthorised, transaction_id));
    }

    match request.priority.as_str() {
        PRIORITY_URGENT => {
            let (reply_tx, reply_rx) = oneshot::channel();
            state
                .jobs
                .send(Job::synchronous(request.job, reply_tx))
                .await
                .map_err(|_| {
                    tracing::error!(%transaction_id, "dispatcher unavailable");
                    ApiError::new(ApiErrorKind::Internal, transaction_id)
                })?;

            let errors = reply_rx.await.map_err(|_| {
                tracing::error!(%transaction_id, "dispatcher dropped the job reply");
                ApiError::new(ApiErrorKind::Internal, transaction_id)
            })?;

            if !errors.is_empty() {
                tracing::error!(
                    %transaction_id,
                    errors = errors.len(),
                    "urgent job finished with errors"
                );
                return Err(ApiError::new(ApiErrorKind::Internal, transaction_id));
            }
        }
        PRIORITY_NORMAL => {
            state.queue.publish(&request.job).await.map_err(|e| {
                tracing::error!(%transaction_id, error = %e, "could not queue job");
                ApiError::new(ApiErrorKind::Internal, transaction_id)
            })?;
        }
        other => {
            tracing::error!(%transaction_id, priority = other, "invalid job priority");
            return Err(ApiError::new(
                ApiErrorKind::InvalidJobPriority,
                transaction_id,
            ));
        }
    }

    Ok(Json(serde_json::Value::Null))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}
