//! Remote orchestrator tests against a fake workflow-engine API.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use docling_serve::config::DoclingServeSettings;
use docling_serve::datamodel::callback::{
    FailedDocsItem, ProgressCallbackRequest, SucceededDocsItem, TaskProgress,
};
use docling_serve::datamodel::convert::ConvertDocumentsOptions;
use docling_serve::datamodel::requests::{FileSource, HttpSource, TaskSource};
use docling_serve::datamodel::task::TaskStatus;
use docling_serve::orchestrator::remote::AsyncKfpOrchestrator;
use docling_serve::orchestrator::{Orchestrator, OrchestratorError};

#[derive(Clone)]
struct FakeRun {
    run_id: String,
    display_name: String,
    state: String,
}

#[derive(Clone, Default)]
struct FakeEngine {
    runs: Arc<Mutex<Vec<FakeRun>>>,
    submissions: Arc<Mutex<Vec<Value>>>,
}

impl FakeEngine {
    fn set_state(&self, run_id: &str, state: &str) {
        let mut runs = self.runs.lock();
        let run = runs
            .iter_mut()
            .find(|run| run.run_id == run_id)
            .expect("run exists");
        run.state = state.to_string();
    }

    fn add_run(&self, run_id: &str, display_name: &str, state: &str) {
        self.runs.lock().push(FakeRun {
            run_id: run_id.to_string(),
            display_name: display_name.to_string(),
            state: state.to_string(),
        });
    }
}

fn run_json(run: &FakeRun) -> Value {
    json!({
        "run_id": run.run_id,
        "display_name": run.display_name,
        "state": run.state,
    })
}

async fn create_run(State(engine): State<FakeEngine>, Json(body): Json<Value>) -> Json<Value> {
    let display_name = body["display_name"].as_str().unwrap_or_default().to_string();
    let run_id = format!("run-{}", engine.runs.lock().len() + 1);
    engine.submissions.lock().push(body);
    engine.add_run(&run_id, &display_name, "PENDING");
    let runs = engine.runs.lock();
    Json(run_json(runs.last().expect("just added")))
}

async fn get_run(
    State(engine): State<FakeEngine>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, axum::http::StatusCode> {
    let runs = engine.runs.lock();
    runs.iter()
        .find(|run| run.run_id == run_id)
        .map(|run| Json(run_json(run)))
        .ok_or(axum::http::StatusCode::NOT_FOUND)
}

async fn list_runs(
    State(engine): State<FakeEngine>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let filter: Value = query
        .get("filter")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let predicate = &filter["predicates"][0];
    let key = predicate["key"].as_str().unwrap_or_default();
    let wanted = predicate["stringValue"].as_str().unwrap_or_default();

    let runs = engine.runs.lock();
    let matching: Vec<Value> = runs
        .iter()
        .filter(|run| match key {
            "state" => run.state == wanted,
            "name" => run.display_name == wanted,
            _ => true,
        })
        .map(run_json)
        .collect();
    Json(json!({ "runs": matching }))
}

async fn spawn_fake_engine() -> (FakeEngine, String) {
    let engine = FakeEngine::default();
    let app = Router::new()
        .route("/apis/v2beta1/runs", post(create_run).get(list_runs))
        .route("/apis/v2beta1/runs/{run_id}", get(get_run))
        .with_state(engine.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake engine");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake engine");
    });
    (engine, format!("http://{addr}"))
}

async fn make_orchestrator(endpoint: &str) -> AsyncKfpOrchestrator {
    let mut settings = DoclingServeSettings::default();
    settings.eng_kfp_endpoint = Some(endpoint.parse().unwrap());
    AsyncKfpOrchestrator::new(settings).expect("orchestrator builds")
}

fn http_source(url: &str) -> TaskSource {
    TaskSource::Http(HttpSource {
        url: url.parse().unwrap(),
        headers: HashMap::new(),
    })
}

#[tokio::test]
async fn enqueue_submits_a_named_run_and_filters_file_sources() {
    let (engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    let sources = vec![
        http_source("https://example.com/a.pdf"),
        TaskSource::File(FileSource {
            base64_string: "aGVsbG8=".to_string(),
            filename: "inline.pdf".to_string(),
        }),
    ];
    let task = orchestrator
        .enqueue(sources, ConvertDocumentsOptions::default())
        .await
        .unwrap();

    assert_eq!(task.task_id, "run-1");
    assert_eq!(task.task_status, TaskStatus::Pending);

    let submissions = engine.submissions.lock();
    let parameters = &submissions[0]["runtime_config"]["parameters"];
    assert!(submissions[0]["display_name"]
        .as_str()
        .unwrap()
        .starts_with("docling-job-"));
    assert_eq!(parameters["batch_size"], 10);
    // Only the HTTP source is forwarded.
    assert_eq!(parameters["sources"].as_array().unwrap().len(), 1);
    assert_eq!(
        parameters["sources"][0]["url"],
        "https://example.com/a.pdf"
    );
    assert_eq!(parameters["run_name"], submissions[0]["display_name"]);
}

#[tokio::test]
async fn task_status_maps_engine_run_states() {
    let (engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    let task = orchestrator
        .enqueue(
            vec![http_source("https://example.com/a.pdf")],
            ConvertDocumentsOptions::default(),
        )
        .await
        .unwrap();

    let status = orchestrator.task_status(&task.task_id, 0.0).await.unwrap();
    assert_eq!(status.task_status, TaskStatus::Pending);

    engine.set_state(&task.task_id, "RUNNING");
    let status = orchestrator.task_status(&task.task_id, 0.0).await.unwrap();
    assert_eq!(status.task_status, TaskStatus::Started);
    assert!(status.started_at.is_some());

    engine.set_state(&task.task_id, "SUCCEEDED");
    let status = orchestrator.task_status(&task.task_id, 0.0).await.unwrap();
    assert_eq!(status.task_status, TaskStatus::Success);
    assert!(status.finished_at.is_some());

    engine.set_state(&task.task_id, "CANCELED");
    // Terminal timestamps are stamped once; a later state change still maps.
    let status = orchestrator.task_status(&task.task_id, 0.0).await.unwrap();
    assert_eq!(status.task_status, TaskStatus::Failure);
}

#[tokio::test]
async fn queue_position_follows_the_engine_pending_list() {
    let (engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    let first = orchestrator
        .enqueue(
            vec![http_source("https://example.com/a.pdf")],
            ConvertDocumentsOptions::default(),
        )
        .await
        .unwrap();
    let second = orchestrator
        .enqueue(
            vec![http_source("https://example.com/b.pdf")],
            ConvertDocumentsOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(orchestrator.queue_size().await.unwrap(), 2);
    assert_eq!(
        orchestrator.get_queue_position(&first.task_id).await.unwrap(),
        Some(1)
    );
    assert_eq!(
        orchestrator
            .get_queue_position(&second.task_id)
            .await
            .unwrap(),
        Some(2)
    );

    engine.set_state(&first.task_id, "RUNNING");
    assert_eq!(orchestrator.queue_size().await.unwrap(), 1);
    assert_eq!(
        orchestrator.get_queue_position(&first.task_id).await.unwrap(),
        None
    );
    assert_eq!(
        orchestrator
            .get_queue_position(&second.task_id)
            .await
            .unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn progress_intake_translates_run_names_and_updates_counters() {
    let (engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    let task = orchestrator
        .enqueue(
            vec![http_source("https://example.com/a.pdf")],
            ConvertDocumentsOptions::default(),
        )
        .await
        .unwrap();
    let run_name = engine.runs.lock()[0].display_name.clone();

    orchestrator
        .receive_task_progress(ProgressCallbackRequest {
            task_id: run_name.clone(),
            progress: TaskProgress::SetNumDocs { num_docs: 4 },
        })
        .await
        .unwrap();

    let snapshot = orchestrator.registry().get(&task.task_id).unwrap();
    assert_eq!(snapshot.task_status, TaskStatus::Started);
    assert_eq!(snapshot.processing_meta.as_ref().unwrap().num_docs, 4);

    orchestrator
        .receive_task_progress(ProgressCallbackRequest {
            task_id: run_name.clone(),
            progress: TaskProgress::UpdateProcessed {
                num_processed: 2,
                num_succeeded: 1,
                num_failed: 1,
                docs_succeeded: vec![SucceededDocsItem {
                    source: "https://example.com/a.pdf".to_string(),
                }],
                docs_failed: vec![FailedDocsItem {
                    source: "https://example.com/b.pdf".to_string(),
                    error: "boom".to_string(),
                }],
            },
        })
        .await
        .unwrap();

    let snapshot = orchestrator.registry().get(&task.task_id).unwrap();
    let meta = snapshot.processing_meta.as_ref().unwrap();
    assert_eq!(meta.num_processed, 2);
    assert_eq!(meta.num_succeeded, 1);
    assert_eq!(meta.num_failed, 1);
}

#[tokio::test]
async fn update_processed_before_set_num_docs_is_invalid() {
    let (engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    orchestrator
        .enqueue(
            vec![http_source("https://example.com/a.pdf")],
            ConvertDocumentsOptions::default(),
        )
        .await
        .unwrap();
    let run_name = engine.runs.lock()[0].display_name.clone();

    let err = orchestrator
        .receive_task_progress(ProgressCallbackRequest {
            task_id: run_name,
            progress: TaskProgress::UpdateProcessed {
                num_processed: 1,
                num_succeeded: 1,
                num_failed: 0,
                docs_succeeded: Vec::new(),
                docs_failed: Vec::new(),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ProgressInvalid(_)));
}

#[tokio::test]
async fn unknown_run_name_is_task_not_found() {
    let (_engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    let err = orchestrator
        .receive_task_progress(ProgressCallbackRequest {
            task_id: "docling-job-missing".to_string(),
            progress: TaskProgress::SetNumDocs { num_docs: 1 },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::TaskNotFound));
}

#[tokio::test]
async fn ambiguous_run_name_resolution_is_rejected() {
    let (engine, endpoint) = spawn_fake_engine().await;
    let orchestrator = make_orchestrator(&endpoint).await;

    orchestrator
        .enqueue(
            vec![http_source("https://example.com/a.pdf")],
            ConvertDocumentsOptions::default(),
        )
        .await
        .unwrap();
    let run_name = engine.runs.lock()[0].display_name.clone();
    // A colliding run with the same display name.
    engine.add_run("run-duplicate", &run_name, "PENDING");

    let err = orchestrator
        .receive_task_progress(ProgressCallbackRequest {
            task_id: run_name,
            progress: TaskProgress::SetNumDocs { num_docs: 1 },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ProgressInvalid(_)));
}
