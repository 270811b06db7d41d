//! HTTP API server for repo-pilot.
//!
//! Runs are started with a [`Task`] body and either streamed as server-sent
//! events (one event per [`AgentStep`], named by its `type`) or awaited and
//! returned whole.

// Allow clippy lint triggered by utoipa's OpenApi derive macro
#![allow(clippy::needless_for_each)]

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::core::agent::prompt::ContextFile;
use crate::core::agent::{
    AgentStep, CATALOG_VERSION, LandingMode, LandingResult, StepEmitter, TerminationReason, Tool,
    catalog,
};
use crate::core::history::{RunRecorder, RunSummary, StorageRecorder};
use crate::core::repo::{GithubConnector, HostConnector, RepoHost, RepositoryDirectory};
use crate::core::run::{Task, TaskRunner, open_repository};
use crate::core::storage::Storage;

/// Shared application state.
pub struct AppState {
    /// Runner for new tasks (if a model provider is configured).
    pub runner: Option<TaskRunner>,

    /// Resolves repository keys to coordinates.
    pub directory: Arc<dyn RepositoryDirectory>,

    /// Opens hosts for resolved repositories.
    pub connector: Arc<dyn HostConnector>,

    /// Run history.
    pub recorder: Arc<dyn RunRecorder>,

    /// API token for authentication (if configured).
    pub token: Option<String>,
}

impl AppState {
    /// State backed by configuration, GitHub and on-disk history.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let recorder: Arc<dyn RunRecorder> = Arc::new(StorageRecorder::new(Storage::new()?));
        let runner = match config.agent.agent() {
            Ok(agent) => Some(TaskRunner::new(agent).with_recorder(recorder.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "no model provider available, runs disabled");
                None
            }
        };

        Ok(Self {
            runner,
            directory: Arc::new(config.directory()),
            connector: Arc::new(GithubConnector::new(config.github.api_url.clone())),
            recorder,
            token: config.api.token(),
        })
    }

    fn open(&self, task: &Task) -> Result<(TaskRunner, String, Arc<dyn RepoHost>), ApiError> {
        let runner = self.runner.clone().ok_or(ApiError::NoProvider)?;
        let (repository, host) =
            open_repository(self.directory.as_ref(), self.connector.as_ref(), &task.repository)
                .map_err(ApiError::Open)?;
        Ok((runner, repository, host))
    }
}

type SharedState = Arc<AppState>;

/// `OpenAPI` documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "repo-pilot API",
        description = "HTTP API for running the repo-pilot coding agent",
        version = "0.1.0",
        license(name = "MIT")
    ),
    paths(health, stream_run, create_run, list_runs, list_tools),
    components(schemas(
        Task,
        ContextFile,
        LandingMode,
        AgentStep,
        LandingResult,
        TerminationReason,
        RunSummary,
        RunResponse,
        ToolDefinition,
        ToolCatalog
    ))
)]
struct ApiDoc;

/// Handler failures.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("No model provider configured")]
    NoProvider,

    #[error(transparent)]
    Open(crate::core::Error),

    #[error("failed to read run history: {0}")]
    History(#[from] crate::core::storage::StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NoProvider => StatusCode::SERVICE_UNAVAILABLE,
            Self::Open(crate::core::Error::UnknownRepository(_)) => StatusCode::NOT_FOUND,
            Self::Open(crate::core::Error::MissingCredential(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Open(crate::core::Error::Host(_)) => StatusCode::BAD_GATEWAY,
            Self::Open(_) | Self::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Authentication middleware.
///
/// Validates the `Authorization: Bearer <token>` header if a token is configured.
async fn auth_middleware(
    State(state): State<SharedState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    // If no token configured, allow all requests (localhost-only mode)
    let Some(expected_token) = &state.token else {
        return next.run(request).await;
    };

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if token == expected_token => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "Missing or invalid Authorization header. Use: Bearer <token>"
            })),
        )
            .into_response(),
    }
}

/// Build the application router.
pub fn router(state: SharedState) -> Router {
    let protected_routes = Router::new()
        .route("/api/runs", post(create_run).get(list_runs))
        .route("/api/runs/stream", post(stream_run))
        .route("/api/tools", get(list_tools))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP API server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or start.
pub async fn serve(config: &Config, host: &str, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    let auth_enabled = state.token.is_some();
    let app = router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let version = crate::build_info::version_string();
    if auth_enabled {
        tracing::info!(addr = %addr, version = %version, "starting HTTP API server (auth enabled)");
    } else {
        tracing::warn!(addr = %addr, version = %version, "starting HTTP API server (NO AUTH - localhost only recommended)");
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service healthy", body = String))
)]
async fn health() -> &'static str {
    "ok"
}

/// A finished run with every step it emitted.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunResponse {
    pub summary: RunSummary,
    pub steps: Vec<AgentStep>,
}

/// One tool as offered to the model.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub input_schema: serde_json::Value,
}

impl From<Tool> for ToolDefinition {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }
}

/// The tool catalog for one landing mode.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolCatalog {
    pub version: u32,
    pub mode: LandingMode,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
struct ToolsQuery {
    mode: Option<LandingMode>,
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

/// Start a run and stream its steps.
#[utoipa::path(
    post,
    path = "/api/runs/stream",
    request_body = Task,
    responses(
        (status = 200, description = "Server-sent events, one per step", content_type = "text/event-stream", body = AgentStep),
        (status = 404, description = "Unknown repository"),
        (status = 503, description = "No model provider configured")
    )
)]
async fn stream_run(
    State(state): State<SharedState>,
    Json(task): Json<Task>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (runner, repository, host) = state.open(&task)?;
    let (mut emitter, steps) = StepEmitter::channel();

    tokio::spawn(async move {
        runner
            .run(host.as_ref(), &repository, &task, &mut emitter)
            .await;
    });

    let stream = steps.map(|step| {
        let data = serde_json::to_string(&step).unwrap_or_default();
        Ok(Event::default().event(step.kind()).data(data))
    });

    Ok(Sse::new(stream))
}

/// Run a task to completion.
#[utoipa::path(
    post,
    path = "/api/runs",
    request_body = Task,
    responses(
        (status = 200, description = "Run finished", body = RunResponse),
        (status = 404, description = "Unknown repository"),
        (status = 503, description = "No model provider configured")
    )
)]
async fn create_run(
    State(state): State<SharedState>,
    Json(task): Json<Task>,
) -> Result<Json<RunResponse>, ApiError> {
    let (runner, repository, host) = state.open(&task)?;

    let mut steps = Vec::new();
    let summary = {
        let mut emitter = StepEmitter::new(|step| steps.push(step));
        runner
            .run(host.as_ref(), &repository, &task, &mut emitter)
            .await
            .summary
    };

    Ok(Json(RunResponse { summary, steps }))
}

/// Recorded runs, newest first.
#[utoipa::path(
    get,
    path = "/api/runs",
    params(("limit" = Option<usize>, Query, description = "Maximum runs returned (default 20)")),
    responses((status = 200, description = "Run history", body = Vec<RunSummary>))
)]
async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunSummary>>, ApiError> {
    let runs = state.recorder.recent(query.limit.unwrap_or(20))?;
    Ok(Json(runs))
}

/// Tool catalog for a landing mode.
#[utoipa::path(
    get,
    path = "/api/tools",
    params(("mode" = Option<LandingMode>, Query, description = "pull_request (default) or direct_push")),
    responses((status = 200, description = "Tool catalog", body = ToolCatalog))
)]
async fn list_tools(Query(query): Query<ToolsQuery>) -> Json<ToolCatalog> {
    let mode = query.mode.unwrap_or_default();
    Json(ToolCatalog {
        version: CATALOG_VERSION,
        mode,
        tools: catalog(mode).into_iter().map(ToolDefinition::from).collect(),
    })
}
