use axum::extract::{FromRequestParts, Multipart, Path, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobDetailResponse, JobListResponse, SubmitResponse};
use crate::models::operation::RawOperation;
use crate::routes::error::{ApiError, ApiResult};
use crate::services::auth::{AuthError, Requester};
use crate::services::submission::SubmissionRequest;

impl FromRequestParts<AppState> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().map_err(|_| AuthError::InvalidFormat))
            .transpose()?;

        Ok(state.verifier.requester(authorization)?)
    }
}

/// POST /api/v1/images: Upload an image with its operations.
///
/// Multipart fields: `image` (file), `format` (optional), `operations`
/// (JSON array of `{ operation_type, parameters }`).
pub async fn submit_image(
    State(state): State<AppState>,
    requester: Requester,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut source: Option<Vec<u8>> = None;
    let mut target_format: Option<String> = None;
    let mut operations: Option<Vec<RawOperation>> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("image") => {
                let data = field.bytes().await.map_err(multipart_error)?;
                source = Some(data.to_vec());
            }
            Some("format") => {
                target_format = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("operations") => {
                let text = field.text().await.map_err(multipart_error)?;
                let parsed = serde_json::from_str(&text).map_err(|e| {
                    ApiError::validation(format!("operations must be a JSON array: {e}"))
                })?;
                operations = Some(parsed);
            }
            _ => {}
        }
    }

    let source = source.ok_or_else(|| ApiError::validation("Missing 'image' field"))?;

    let job = state
        .submissions
        .submit(
            &requester,
            SubmissionRequest {
                source,
                target_format,
                operations: operations.unwrap_or_default(),
            },
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job))))
}

/// GET /api/v1/images: The caller's jobs, newest first.
pub async fn list_images(
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<Json<JobListResponse>> {
    let Some(user_id) = requester.user_id() else {
        return Ok(Json(JobListResponse { jobs: Vec::new() }));
    };

    let now = state.clock.now();
    let jobs = state
        .repo
        .list_jobs_for_owner(user_id)
        .await?
        .iter()
        .map(|job| JobDetailResponse::from_job(job, now, &state.public_base_url))
        .collect();

    Ok(Json(JobListResponse { jobs }))
}

/// GET /api/v1/images/{job_id}: Job status and progress.
pub async fn get_image(
    State(state): State<AppState>,
    requester: Requester,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobDetailResponse>> {
    let job = state.gate.job_detail(&requester, job_id).await?;
    Ok(Json(JobDetailResponse::from_job(
        &job,
        state.clock.now(),
        &state.public_base_url,
    )))
}

/// GET /api/v1/images/{job_id}/download: The processed artifact.
pub async fn download_image(
    State(state): State<AppState>,
    requester: Requester,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let download = state.gate.download(&requester, job_id).await?;

    let headers = [
        (header::CONTENT_TYPE, download.content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.filename),
        ),
    ];
    Ok((headers, download.bytes).into_response())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(status, "PAYLOAD_TOO_LARGE", err.body_text());
    }
    ApiError::bad_request(err.body_text())
}
