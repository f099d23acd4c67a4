//! End-to-end tests for the convert, status, result, and clear endpoints.
//!
//! The app runs in-process with the built-in engine; HTTP sources are served
//! by a small local file server.

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::time::sleep;

use docling_serve::config::AppConfig;
use docling_serve::server::create_app;

const SAMPLE_MD: &str = "# DocLayNet\n\n## DocLayNet: A Large Dataset\n\nBody paragraph about layout analysis.\n";

fn test_config(scratch: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.settings.scratch_path = Some(scratch.to_path_buf());
    config.settings.eng_loc_num_workers = 2;
    // Tests that exercise single-use deletion opt in explicitly.
    config.settings.single_use_results = false;
    config
}

async fn make_server(config: AppConfig) -> TestServer {
    let app = create_app(config).await.expect("app builds");
    TestServer::new(app).expect("test server")
}

/// Serve markdown fixtures over HTTP for URL-source tests.
async fn spawn_source_server() -> String {
    let app = Router::new()
        .route("/docs/sample.md", get(|| async { SAMPLE_MD }))
        .route(
            "/docs/slow.md",
            get(|| async {
                sleep(Duration::from_secs(2)).await;
                "# Slow document\n"
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind source server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("source server");
    });
    format!("http://{addr}")
}

fn encoded_sample() -> String {
    base64::engine::general_purpose::STANDARD.encode(SAMPLE_MD)
}

async fn poll_until_completed(server: &TestServer, task_id: &str) -> Value {
    for _ in 0..100 {
        let response = server
            .get(&format!("/v1alpha/status/poll/{task_id}"))
            .await;
        response.assert_status_ok();
        let task: Value = response.json();
        let status = task["task_status"].as_str().unwrap_or_default().to_string();
        if status == "success" || status == "failure" {
            return task;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("task {task_id} did not complete in time");
}

#[tokio::test]
async fn health_returns_ok() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn sync_convert_file_source_returns_inline_document() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let payload = json!({
        "options": {
            "to_formats": ["md", "json", "html", "text", "doctags"],
            "image_export_mode": "placeholder",
            "return_as_file": false,
        },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });

    let response = server.post("/v1alpha/convert/source").json(&payload).await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    let document = &body["document"];
    assert_eq!(document["filename"], "sample.md");
    assert!(document["md_content"]
        .as_str()
        .unwrap()
        .contains("## DocLayNet: "));
    assert_eq!(document["json_content"]["schema_name"], "DoclingDocument");
    assert!(document["html_content"].as_str().unwrap().contains("<h1>"));
    assert!(document["text_content"].as_str().unwrap().contains("DocLayNet"));
    assert!(document["doctags_content"]
        .as_str()
        .unwrap()
        .starts_with("<doctag>"));
}

#[tokio::test]
async fn sync_convert_http_source_returns_inline_document() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;
    let source_base = spawn_source_server().await;

    let payload = json!({
        "options": { "to_formats": ["md", "json"] },
        "http_sources": [{"url": format!("{source_base}/docs/sample.md")}],
    });

    let response = server.post("/v1alpha/convert/source").json(&payload).await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["document"]["filename"], "sample.md");
    assert_eq!(body["document"]["json_content"]["schema_name"], "DoclingDocument");
}

#[tokio::test]
async fn sync_convert_two_files_returns_zip() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let form = MultipartForm::new()
        .add_text("to_formats", "md")
        .add_text("to_formats", "json")
        .add_part(
            "files",
            Part::bytes(SAMPLE_MD.as_bytes().to_vec()).file_name("first.md"),
        )
        .add_part(
            "files",
            Part::bytes("# Second\n\nMore text.\n".as_bytes().to_vec()).file_name("second.md"),
        );

    let response = server.post("/v1alpha/convert/file").multipart(form).await;
    response.assert_status_ok();

    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/zip");
    assert!(headers["content-disposition"]
        .to_str()
        .unwrap()
        .contains("filename=\"converted_docs.zip\""));
    assert!(!response.as_bytes().is_empty());
}

#[tokio::test]
async fn single_file_forced_as_file_returns_zip() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let form = MultipartForm::new()
        .add_text("to_formats", "md")
        .add_text("return_as_file", "true")
        .add_part(
            "files",
            Part::bytes(SAMPLE_MD.as_bytes().to_vec()).file_name("only.md"),
        );

    let response = server.post("/v1alpha/convert/file").multipart(form).await;
    response.assert_status_ok();
    assert_eq!(response.headers()["content-type"], "application/zip");
}

#[tokio::test]
async fn async_lifecycle_poll_then_result() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let payload = json!({
        "options": { "to_formats": ["md", "json"] },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });

    let response = server
        .post("/v1alpha/convert/source/async")
        .json(&payload)
        .await;
    response.assert_status_ok();
    let task: Value = response.json();
    let task_id = task["task_id"].as_str().unwrap().to_string();
    assert!(matches!(
        task["task_status"].as_str().unwrap(),
        "pending" | "started"
    ));

    let task = poll_until_completed(&server, &task_id).await;
    assert_eq!(task["task_status"], "success");
    assert!(task["task_position"].is_null());

    let response = server.get(&format!("/v1alpha/result/{task_id}")).await;
    response.assert_status_ok();
    let result: Value = response.json();
    assert_eq!(result["document"]["json_content"]["schema_name"], "DoclingDocument");
}

#[tokio::test]
async fn long_poll_returns_completed_status_in_one_call() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let payload = json!({
        "options": { "to_formats": ["json"] },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });
    let task: Value = server
        .post("/v1alpha/convert/source/async")
        .json(&payload)
        .await
        .json();
    let task_id = task["task_id"].as_str().unwrap();

    let response = server
        .get(&format!("/v1alpha/status/poll/{task_id}?wait=10"))
        .await;
    response.assert_status_ok();
    let task: Value = response.json();
    assert_eq!(task["task_status"], "success");
}

#[tokio::test]
async fn unknown_task_returns_404() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let response = server.get("/v1alpha/status/poll/no-such-task").await;
    response.assert_status_not_found();

    let response = server.get("/v1alpha/result/no-such-task").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn result_before_completion_is_404() {
    let scratch = tempfile::tempdir().unwrap();
    let source_base = spawn_source_server().await;
    let server = make_server(test_config(scratch.path())).await;

    let payload = json!({
        "options": { "to_formats": ["md"] },
        "http_sources": [{"url": format!("{source_base}/docs/slow.md")}],
    });
    let task: Value = server
        .post("/v1alpha/convert/source/async")
        .json(&payload)
        .await
        .json();
    let task_id = task["task_id"].as_str().unwrap();

    let response = server.get(&format!("/v1alpha/result/{task_id}")).await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn sync_wait_exceeded_returns_504_and_keeps_task() {
    let scratch = tempfile::tempdir().unwrap();
    let source_base = spawn_source_server().await;
    let mut config = test_config(scratch.path());
    config.settings.max_sync_wait = 0;
    let server = make_server(config).await;

    let payload = json!({
        "options": { "to_formats": ["md"] },
        "http_sources": [{"url": format!("{source_base}/docs/slow.md")}],
    });

    let response = server.post("/v1alpha/convert/source").json(&payload).await;
    response.assert_status(axum::http::StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // The task was not cancelled: it still completes.
    let task = poll_until_completed(&server, &task_id).await;
    assert_eq!(task["task_status"], "success");
}

#[tokio::test]
async fn clear_results_deletes_completed_tasks_and_is_idempotent() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let payload = json!({
        "options": { "to_formats": ["json"] },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });
    let task: Value = server
        .post("/v1alpha/convert/source/async")
        .json(&payload)
        .await
        .json();
    let task_id = task["task_id"].as_str().unwrap().to_string();
    poll_until_completed(&server, &task_id).await;

    let response = server.get(&format!("/v1alpha/result/{task_id}")).await;
    response.assert_status_ok();

    let response = server.get("/v1alpha/clear/results?older_then=0").await;
    response.assert_status_ok();

    let response = server.get(&format!("/v1alpha/result/{task_id}")).await;
    response.assert_status_not_found();

    // Clearing again is a no-op.
    let response = server.get("/v1alpha/clear/results?older_then=0").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn single_use_results_are_deleted_after_the_delay() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = test_config(scratch.path());
    config.settings.single_use_results = true;
    config.settings.result_removal_delay = 1.0;
    let server = make_server(config).await;

    let payload = json!({
        "options": { "to_formats": ["json"] },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });
    let task: Value = server
        .post("/v1alpha/convert/source/async")
        .json(&payload)
        .await
        .json();
    let task_id = task["task_id"].as_str().unwrap().to_string();
    poll_until_completed(&server, &task_id).await;

    // Two reads inside the window both succeed.
    server
        .get(&format!("/v1alpha/result/{task_id}"))
        .await
        .assert_status_ok();
    server
        .get(&format!("/v1alpha/result/{task_id}"))
        .await
        .assert_status_ok();

    sleep(Duration::from_millis(1800)).await;
    server
        .get(&format!("/v1alpha/result/{task_id}"))
        .await
        .assert_status_not_found();
}

#[cfg(not(target_os = "macos"))]
#[tokio::test]
async fn unavailable_ocr_engine_is_a_400_on_the_sync_path() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let payload = json!({
        "options": { "ocr_engine": "ocrmac" },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });

    let response = server.post("/v1alpha/convert/source").json(&payload).await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "unavailable_engine");
}

#[tokio::test]
async fn clear_converters_empties_the_cache() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    // A sync conversion populates the cache.
    let payload = json!({
        "options": { "to_formats": ["md"] },
        "file_sources": [{"base64_string": encoded_sample(), "filename": "sample.md"}],
    });
    server
        .post("/v1alpha/convert/source")
        .json(&payload)
        .await
        .assert_status_ok();

    let response = server.get("/v1alpha/clear/converters").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let scratch = tempfile::tempdir().unwrap();
    let server = make_server(test_config(scratch.path())).await;

    let response = server.get("/openapi.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["info"]["title"], "Docling Serve");
    assert!(body["paths"]["/v1alpha/convert/source"].is_object());
}
