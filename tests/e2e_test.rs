//! End-to-end tests against a running deployment
//!
//! These tests require:
//! 1. PostgreSQL database running (migrations are applied by the server)
//! 2. Redis running
//! 3. S3-compatible storage configured
//! 4. API server running on configured port
//! 5. Worker process running
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod fixtures;
mod helpers;

use fixtures::*;
use helpers::*;

fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );

    println!("✓ Health check passed");
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and all infrastructure
async fn test_e2e_anonymous_job_lifecycle() {
    let fixture = &JOB_FIXTURES[0];
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    println!("Testing: {} - {}", fixture.name, fixture.description);

    let submitted = upload_fixture(&client, &base_url, fixture, None)
        .await
        .expect("Failed to upload image");
    assert_eq!(submitted.status, "pending");
    println!("  ✓ Upload accepted, job_id: {}", submitted.job_id);

    let detail = wait_for_job_completion(&client, &base_url, submitted.job_id, None)
        .await
        .expect("Failed to wait for job completion");
    assert_eq!(detail.status, "completed", "job failed: {:?}", detail.error);
    assert!(detail.error.is_none());
    let url = detail.download_url.expect("completed job has a download link");

    let (status, disposition, body) = download(&client, &url, None)
        .await
        .expect("Download failed");
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        disposition.as_deref(),
        Some(
            format!(
                "attachment; filename=\"processed_{}.{}\"",
                submitted.job_id, fixture.expected_extension
            )
            .as_str()
        )
    );

    let output = image::load_from_memory(&body).expect("Output decodes");
    assert_eq!(
        (output.width(), output.height()),
        fixture.expected_dimensions
    );
    println!("  ✓ Downloaded {} bytes", body.len());

    // Anonymous downloads renew the expiry by 20 seconds only.
    tokio::time::sleep(std::time::Duration::from_secs(22)).await;
    let (status, _, _) = download(&client, &url, None).await.expect("Request failed");
    assert_eq!(status, reqwest::StatusCode::GONE);
    println!("  ✓ Download expired after the anonymous window");
}

#[tokio::test]
#[ignore]
async fn test_e2e_anonymous_quota_is_enforced() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let fixture = ImageJobFixture {
        operations: || {
            serde_json::json!([
                {"operation_type": "filter", "parameters": {"type": "blur"}},
                {"operation_type": "filter", "parameters": {"type": "sharpen"}},
                {"operation_type": "filter", "parameters": {"type": "grayscale"}}
            ])
        },
        ..JOB_FIXTURES[0].clone()
    };

    let response = submit_fixture(&client, &base_url, &fixture, None)
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let error: ErrorResponse = response.json().await.expect("Error body");
    assert_eq!(error.code, "VALIDATION_ERROR");
    assert_eq!(error.message, "Anonymous users can only perform 2 operations");
}

#[tokio::test]
#[ignore]
async fn test_e2e_all_fixtures() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    println!("\nRunning all {} fixtures:\n", JOB_FIXTURES.len());

    let mut successful = 0;
    let mut failed = 0;

    for (idx, fixture) in JOB_FIXTURES.iter().enumerate() {
        println!(
            "[{}/{}] {} - {}",
            idx + 1,
            JOB_FIXTURES.len(),
            fixture.name,
            fixture.description
        );

        let submitted = match upload_fixture(&client, &base_url, fixture, None).await {
            Ok(resp) => resp,
            Err(e) => {
                println!("  ✗ Upload failed: {}", e);
                failed += 1;
                continue;
            }
        };

        match wait_for_job_completion(&client, &base_url, submitted.job_id, None).await {
            Ok(detail) if detail.status == "completed" => {
                println!("  ✓ Completed as {}", detail.format);
                assert_eq!(detail.format, fixture.expected_extension);
                successful += 1;
            }
            Ok(detail) => {
                println!("  ✗ Job failed: {:?}", detail.error);
                failed += 1;
            }
            Err(e) => {
                println!("  ✗ Job status check failed: {}", e);
                failed += 1;
            }
        }
    }

    println!("\n=== Summary ===");
    println!("Successful: {}", successful);
    println!("Failed: {}", failed);

    assert_eq!(failed, 0, "Some fixtures failed - check the worker logs");
}
