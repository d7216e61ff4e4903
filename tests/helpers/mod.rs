//! HTTP helpers for tests against a running server

#![allow(dead_code)]

use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::fixtures::ImageJobFixture;

/// Response from POST /api/v1/images
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
    pub format: String,
    pub download_expires_at: Option<String>,
}

/// Response from GET /api/v1/images/{job_id}
#[derive(Debug, Deserialize)]
pub struct JobDetailResponse {
    pub id: Uuid,
    pub status: String,
    pub format: String,
    pub estimated_seconds_remaining: Option<i64>,
    pub download_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Submit a fixture. Returns the raw response so callers can assert on rejections.
pub async fn submit_fixture(
    client: &reqwest::Client,
    base_url: &str,
    fixture: &ImageJobFixture,
    token: Option<&str>,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new()
        .part(
            "image",
            multipart::Part::bytes(fixture.source())
                .file_name(format!("{}.bin", fixture.name))
                .mime_str("application/octet-stream")?,
        )
        .text("operations", (fixture.operations)().to_string());

    if let Some(format) = fixture.format {
        form = form.text("format", format.to_string());
    }

    let mut request = client
        .post(format!("{}/api/v1/images", base_url))
        .multipart(form);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    Ok(request.send().await?)
}

/// Submit a fixture and expect 202.
pub async fn upload_fixture(
    client: &reqwest::Client,
    base_url: &str,
    fixture: &ImageJobFixture,
    token: Option<&str>,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = submit_fixture(client, base_url, fixture, token).await?;
    let status = response.status();
    if status != reqwest::StatusCode::ACCEPTED {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }
    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job detail until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    token: Option<&str>,
    timeout_secs: u64,
) -> Result<JobDetailResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let mut request = client.get(format!("{}/api/v1/images/{}", base_url, job_id));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let detail = response.json::<JobDetailResponse>().await?;
        match detail.status.as_str() {
            "completed" | "failed" => return Ok(detail),
            "pending" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown job status: {}", other).into()),
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}

pub async fn wait_for_job_completion(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    token: Option<&str>,
) -> Result<JobDetailResponse, Box<dyn std::error::Error>> {
    poll_job_status(client, base_url, job_id, token, 60).await
}

/// Fetch a download link, returning status, Content-Disposition and body.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
) -> Result<(reqwest::StatusCode, Option<String>, Vec<u8>), Box<dyn std::error::Error>> {
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    let status = response.status();
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?.to_vec();
    Ok((status, disposition, body))
}
