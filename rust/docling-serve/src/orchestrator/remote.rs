//! Remote orchestrator backed by an external workflow engine.
//!
//! Tasks are submitted as pipeline runs over the engine's HTTP API; the
//! engine reports progress back through authenticated HTTP callbacks handled
//! by [`AsyncKfpOrchestrator::receive_task_progress`]. The engine's run id is
//! the task id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::config::DoclingServeSettings;
use crate::datamodel::callback::{CallbackSpec, ProgressCallbackRequest, TaskProgress};
use crate::datamodel::convert::ConvertDocumentsOptions;
use crate::datamodel::requests::{HttpSource, TaskSource};
use crate::datamodel::task::{Task, TaskProcessingMeta, TaskStatus};
use crate::orchestrator::registry::TaskRegistry;
use crate::orchestrator::{Orchestrator, OrchestratorError, Result};

/// Batch size forwarded to the pipeline run.
const RUN_BATCH_SIZE: u32 = 10;

/// Poll cadence against the engine while long-polling for completion.
const REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// In-cluster service account credentials, used when no explicit paths are
/// configured.
const KUBE_SA_TOKEN_PATH: &str = "/run/secrets/kubernetes.io/serviceaccount/token";
const KUBE_SA_CA_CERT_PATH: &str = "/run/secrets/kubernetes.io/serviceaccount/service-ca.crt";

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct RunList {
    #[serde(default)]
    runs: Vec<RunInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Thin typed client for the workflow engine's run API.
struct EngineClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl EngineClient {
    fn from_settings(settings: &DoclingServeSettings) -> anyhow::Result<Self> {
        let endpoint = settings
            .eng_kfp_endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("eng_kfp_endpoint is required for the kfp engine"))?;

        let mut token = match &settings.eng_kfp_token_path {
            Some(path) => Some(read_trimmed(path)?),
            None => None,
        };
        if token.is_none() && Path::new(KUBE_SA_TOKEN_PATH).exists() {
            token = Some(read_trimmed(Path::new(KUBE_SA_TOKEN_PATH))?);
        }

        let mut ca_cert_path = settings.eng_kfp_ca_cert_path.clone();
        if ca_cert_path.is_none()
            && endpoint.host_str().is_some_and(|host| host.contains(".svc"))
            && Path::new(KUBE_SA_CA_CERT_PATH).exists()
        {
            ca_cert_path = Some(KUBE_SA_CA_CERT_PATH.into());
        }

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(path) = ca_cert_path {
            let pem = std::fs::read(&path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint,
            token,
        })
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/apis/v2beta1/runs",
            self.endpoint.as_str().trim_end_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn create_run(
        &self,
        display_name: &str,
        parameters: serde_json::Value,
    ) -> Result<RunInfo> {
        let body = serde_json::json!({
            "display_name": display_name,
            "runtime_config": { "parameters": parameters },
        });
        let response = self
            .authorize(self.http.post(self.runs_url()).json(&body))
            .send()
            .await
            .map_err(remote_err)?;
        parse_response(response).await
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        let response = self
            .authorize(self.http.get(format!("{}/{run_id}", self.runs_url())))
            .send()
            .await
            .map_err(remote_err)?;
        parse_response(response).await
    }

    async fn list_runs(
        &self,
        filter: &serde_json::Value,
        page_token: Option<&str>,
    ) -> Result<RunList> {
        let mut query = vec![
            ("page_size", "20".to_string()),
            ("filter", filter.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        let response = self
            .authorize(self.http.get(self.runs_url()).query(&query))
            .send()
            .await
            .map_err(remote_err)?;
        parse_response(response).await
    }
}

fn read_trimmed(path: &Path) -> anyhow::Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

fn remote_err(err: reqwest::Error) -> OrchestratorError {
    OrchestratorError::Remote(err.to_string())
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OrchestratorError::Remote(format!(
            "engine returned HTTP {status}: {body}"
        )));
    }
    response.json().await.map_err(remote_err)
}

fn state_filter(state: &str) -> serde_json::Value {
    serde_json::json!({
        "predicates": [
            { "operation": "EQUALS", "key": "state", "stringValue": state }
        ]
    })
}

fn name_filter(name: &str) -> serde_json::Value {
    serde_json::json!({
        "predicates": [
            { "operation": "EQUALS", "key": "name", "stringValue": name }
        ]
    })
}

/// Orchestrator backend that offloads execution to the workflow engine.
pub struct AsyncKfpOrchestrator {
    registry: Arc<TaskRegistry>,
    settings: DoclingServeSettings,
    client: EngineClient,
}

impl std::fmt::Debug for AsyncKfpOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncKfpOrchestrator")
            .field("endpoint", &self.client.endpoint.as_str())
            .finish()
    }
}

impl AsyncKfpOrchestrator {
    pub fn new(settings: DoclingServeSettings) -> anyhow::Result<Self> {
        let client = EngineClient::from_settings(&settings)?;
        Ok(Self {
            registry: Arc::new(TaskRegistry::new()),
            settings,
            client,
        })
    }

    /// Callback wiring passed to the pipeline so it can report back.
    fn self_callbacks(&self) -> Result<Vec<CallbackSpec>> {
        let Some(endpoint) = &self.settings.eng_kfp_self_callback_endpoint else {
            return Ok(Vec::new());
        };
        let mut headers = HashMap::new();
        if let Some(path) = &self.settings.eng_kfp_self_callback_token_path {
            let token = read_trimmed(path)
                .map_err(|err| OrchestratorError::Internal(err.to_string()))?;
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        let ca_cert = match &self.settings.eng_kfp_self_callback_ca_cert_path {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|err| OrchestratorError::Internal(err.to_string()))?,
            None => String::new(),
        };
        Ok(vec![CallbackSpec {
            url: endpoint.clone(),
            headers,
            ca_cert,
        }])
    }

    async fn update_task_from_run(&self, task_id: &str) -> Result<()> {
        let run = self.client.get_run(task_id).await?;
        let status = match run.state.as_str() {
            "SUCCEEDED" => TaskStatus::Success,
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Started,
            _ => TaskStatus::Failure,
        };
        self.registry.set_status(task_id, status)
    }

    /// All runs the engine still reports as PENDING, in engine order.
    async fn get_pending(&self) -> Result<Vec<RunInfo>> {
        let filter = state_filter("PENDING");
        let mut runs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.client.list_runs(&filter, page_token.as_deref()).await?;
            runs.extend(page.runs);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(runs)
    }

    /// Translate the run name the pipeline posts back into a run id.
    ///
    /// The name-filtered lookup must be unique: zero hits is TaskNotFound,
    /// more than one is rejected rather than guessed.
    async fn resolve_run_name(&self, run_name: &str) -> Result<String> {
        let page = self.client.list_runs(&name_filter(run_name), None).await?;
        match page.runs.len() {
            0 => Err(OrchestratorError::TaskNotFound),
            1 => Ok(page.runs.into_iter().next().expect("one run").run_id),
            hits => Err(OrchestratorError::ProgressInvalid(format!(
                "run name {run_name} resolves to {hits} runs"
            ))),
        }
    }
}

#[async_trait]
impl Orchestrator for AsyncKfpOrchestrator {
    fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    fn settings(&self) -> &DoclingServeSettings {
        &self.settings
    }

    async fn enqueue(
        &self,
        sources: Vec<TaskSource>,
        options: ConvertDocumentsOptions,
    ) -> Result<Task> {
        let callbacks = self.self_callbacks()?;

        // This backend only supports fetchable sources.
        let http_sources: Vec<&HttpSource> = sources
            .iter()
            .filter_map(|source| match source {
                TaskSource::Http(http) => Some(http),
                _ => None,
            })
            .collect();

        // The engine does not resolve its own job-id placeholder, so the run
        // name is passed down as an argument and posted back in callbacks.
        let run_name = format!("docling-job-{}", Uuid::new_v4());
        let parameters = serde_json::json!({
            "batch_size": RUN_BATCH_SIZE,
            "sources": http_sources,
            "options": &options,
            "callbacks": callbacks,
            "run_name": &run_name,
        });

        let run = self.client.create_run(&run_name, parameters).await?;
        tracing::info!(run_name, run_id = %run.run_id, "Submitted pipeline run");

        let task = Task::new(run.run_id, sources, options);
        self.registry.insert(task.clone());
        Ok(task)
    }

    async fn queue_size(&self) -> Result<usize> {
        Ok(self.get_pending().await?.len())
    }

    async fn get_queue_position(&self, task_id: &str) -> Result<Option<usize>> {
        let runs = self.get_pending().await?;
        Ok(runs
            .iter()
            .position(|run| run.run_id == task_id)
            .map(|index| index + 1))
    }

    async fn task_status(&self, task_id: &str, wait: f64) -> Result<Task> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(wait.max(0.0));
        loop {
            self.update_task_from_run(task_id).await?;
            let task = self.registry.get(task_id)?;
            if task.is_completed() || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(REMOTE_POLL_INTERVAL).await;
        }
    }

    async fn receive_task_progress(&self, request: ProgressCallbackRequest) -> Result<()> {
        let task_id = self.resolve_run_name(&request.task_id).await?;

        match request.progress {
            TaskProgress::SetNumDocs { num_docs } => {
                self.registry.update(&task_id, |task| {
                    task.processing_meta = Some(TaskProcessingMeta::new(num_docs));
                    task.set_status(TaskStatus::Started);
                })?;
            }
            TaskProgress::UpdateProcessed {
                num_processed,
                num_succeeded,
                num_failed,
                ..
            } => {
                self.registry.update(&task_id, |task| {
                    let Some(meta) = task.processing_meta.as_mut() else {
                        return Err(OrchestratorError::ProgressInvalid(
                            "update_processed was received before the expected number of documents was set"
                                .to_string(),
                        ));
                    };
                    meta.num_processed += num_processed;
                    meta.num_succeeded += num_succeeded;
                    meta.num_failed += num_failed;
                    task.set_status(TaskStatus::Started);
                    Ok(())
                })??;
            }
        }

        self.notify_task_subscribers(&task_id).await
    }

    async fn process_queue(&self) -> Result<()> {
        // Execution happens in the engine; nothing to drive here.
        Ok(())
    }

    async fn warm_up_caches(&self) -> Result<()> {
        Ok(())
    }
}
