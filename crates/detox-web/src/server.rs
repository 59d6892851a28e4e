// crates/detox-web/src/server.rs
// ============================================================================
// Module: Detox HTTP Server
// Description: axum router, request dispatch, and server lifecycle.
// Purpose: Answer `/detox` report requests from the snapshot cache.
// Dependencies: axum, bytes, tokio, detox-core, detox-config, detox-store-sqlite
// ============================================================================

//! ## Overview
//! [`dispatch`] is the single request path: merge parameters, select the
//! action, resolve the cycle, ensure its cache, and shape the response. Store
//! work runs on the blocking pool. Every request, including rejected ones,
//! emits exactly one audit event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use bytes::Bytes;
use detox_config::DetoxConfig;
use detox_core::CacheOutcome;
use detox_core::ResolutionDefaults;
use detox_core::ResolvedCycle;
use detox_core::SharedSnapshotStore;
use detox_core::resolve_cycle;
use detox_core::runtime::reports;
use detox_store_sqlite::SqliteSnapshotStore;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditEventParams;
use crate::audit::AuditOutcome;
use crate::audit::AuditSink;
use crate::audit::audit_sink_from_config;
use crate::page::PageTemplate;
use crate::request::DataType;
use crate::request::DetoxAction;
use crate::request::RequestError;
use crate::request::RequestParams;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared, read-only state for request handlers.
pub struct ServerState {
    /// Snapshot store backing every report.
    store: SharedSnapshotStore,
    /// Cycle resolution fallbacks.
    defaults: ResolutionDefaults,
    /// HTML shell for requests without an action flag.
    page: PageTemplate,
    /// Audit sink for request events.
    audit: Arc<dyn AuditSink>,
    /// Maximum accepted request body size.
    max_body_bytes: usize,
}

impl ServerState {
    /// Bundles handler state.
    #[must_use]
    pub fn new(
        store: SharedSnapshotStore,
        defaults: ResolutionDefaults,
        page: PageTemplate,
        audit: Arc<dyn AuditSink>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            store,
            defaults,
            page,
            audit,
            max_body_bytes,
        }
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Detox HTTP server instance.
pub struct DetoxServer {
    /// Address to bind.
    bind: SocketAddr,
    /// Handler state.
    state: Arc<ServerState>,
}

impl DetoxServer {
    /// Opens the store, page template, and audit sink named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when validation or initialization fails.
    pub fn from_config(config: &DetoxConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let bind = config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let defaults = config
            .report
            .resolution_defaults()
            .map_err(|err| ServerError::Config(err.to_string()))?;
        let store = SqliteSnapshotStore::new(&config.store.sqlite())
            .map_err(|err| ServerError::Init(err.to_string()))?;
        let page = match &config.report.page_template {
            Some(path) => {
                PageTemplate::load(path).map_err(|err| ServerError::Init(err.to_string()))?
            }
            None => PageTemplate::embedded(),
        };
        let audit = audit_sink_from_config(&config.server.audit)
            .map_err(|err| ServerError::Init(format!("audit sink: {err}")))?;
        if config.server.allow_non_loopback {
            emit_non_loopback_warning(bind);
        }
        let state = ServerState::new(
            Arc::new(store),
            defaults,
            page,
            audit,
            config.server.max_body_bytes,
        );
        Ok(Self {
            bind,
            state: Arc::new(state),
        })
    }

    /// Returns the handler state.
    #[must_use]
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serves HTTP requests until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.bind)
            .await
            .map_err(|_| ServerError::Transport("http bind failed".to_string()))?;
        axum::serve(listener, router(self.state))
            .await
            .map_err(|_| ServerError::Transport("http server failed".to_string()))
    }
}

/// Builds the HTTP router.
pub fn router(state: Arc<ServerState>) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .route("/detox", get(handle_detox).post(handle_detox))
        .route("/healthz", get(handle_health))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Warns that the server relies on a fronting proxy for authentication.
fn emit_non_loopback_warning(bind: SocketAddr) {
    let _ = writeln!(
        std::io::stderr(),
        "detox-web: WARNING: listening on {bind} without authentication; expose only behind an \
         authenticating proxy"
    );
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `/detox` GET and POST requests.
async fn handle_detox(
    State(state): State<Arc<ServerState>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    dispatch(state, query, body).await
}

/// Handles `/healthz` readiness probes.
async fn handle_health(State(state): State<Arc<ServerState>>) -> Response {
    health(state).await
}

/// Reports `ok` when the store answers.
pub async fn health(state: Arc<ServerState>) -> Response {
    let worker = Arc::clone(&state);
    match tokio::task::spawn_blocking(move || worker.store.readiness()).await {
        Ok(Ok(())) => "ok".into_response(),
        Ok(Err(err)) => RequestError::Unavailable(err.to_string()).into_response(),
        Err(err) => RequestError::Internal(err.to_string()).into_response(),
    }
}

/// Answers one `/detox` request and records its audit event.
pub async fn dispatch(state: Arc<ServerState>, query: Option<String>, body: Bytes) -> Response {
    let started = Instant::now();
    if body.len() > state.max_body_bytes {
        let error = RequestError::PayloadTooLarge(state.max_body_bytes);
        return reject(&state, "unknown", error, started);
    }
    let params = RequestParams::merge(query.as_deref(), &body);
    let action = match DetoxAction::from_params(&params, state.defaults.operation) {
        Ok(action) => action,
        Err(error) => return reject(&state, "invalid", error, started),
    };
    let label = action.label();

    let worker = Arc::clone(&state);
    let execution = tokio::task::spawn_blocking(move || execute(&worker, &params, &action))
        .await
        .unwrap_or_else(|err| Execution {
            resolved: None,
            result: Err(RequestError::Internal(err.to_string())),
        });

    let (response, cache, error) = match execution.result {
        Ok(reply) => (reply.response, reply.cache, None),
        Err(error) => {
            let message = error.to_string();
            (error.into_response(), Vec::new(), Some(message))
        }
    };
    let resolved = execution.resolved.as_ref();
    record(
        &state,
        AuditEventParams {
            action: label,
            cycle: resolved.map_or(0, ResolvedCycle::cycle_number),
            partition: resolved.map(|resolved| resolved.partition_id.get()),
            outcome: outcome_for(response.status()),
            status: response.status().as_u16(),
            cache,
            latency_ms: started.elapsed().as_millis(),
            error,
        },
    );
    response
}

/// Renders a request rejected before execution.
fn reject(
    state: &ServerState,
    action: &'static str,
    error: RequestError,
    started: Instant,
) -> Response {
    let message = error.to_string();
    let response = error.into_response();
    record(
        state,
        AuditEventParams {
            action,
            cycle: 0,
            partition: None,
            outcome: outcome_for(response.status()),
            status: response.status().as_u16(),
            cache: Vec::new(),
            latency_ms: started.elapsed().as_millis(),
            error: Some(message),
        },
    );
    response
}

/// Emits one audit event.
fn record(state: &ServerState, params: AuditEventParams) {
    state.audit.record(&AuditEvent::new(params));
}

/// Classifies an HTTP status for audit.
fn outcome_for(status: StatusCode) -> AuditOutcome {
    if status.is_success() {
        AuditOutcome::Ok
    } else if status.is_client_error() {
        AuditOutcome::Rejected
    } else {
        AuditOutcome::Failed
    }
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Response paired with the cache work that produced it.
struct Reply {
    /// HTTP response.
    response: Response,
    /// Cache ensure results.
    cache: Vec<CacheOutcome>,
}

impl Reply {
    /// Wraps a serialized report.
    fn json<T: serde::Serialize>(report: reports::Reported<T>) -> Self {
        Self {
            response: Json(report.report).into_response(),
            cache: report.cache,
        }
    }
}

/// Result of running an action on the blocking pool.
struct Execution {
    /// Cycle the request resolved to, when resolution ran.
    resolved: Option<ResolvedCycle>,
    /// Reply or failure.
    result: Result<Reply, RequestError>,
}

/// Runs `action` against the store.
fn execute(state: &ServerState, params: &RequestParams, action: &DetoxAction) -> Execution {
    let mut resolved = None;
    let result = respond(state, params, action, &mut resolved);
    Execution {
        resolved,
        result,
    }
}

/// Resolves the cycle when the action needs one, then builds the reply.
fn respond(
    state: &ServerState,
    params: &RequestParams,
    action: &DetoxAction,
    slot: &mut Option<ResolvedCycle>,
) -> Result<Reply, RequestError> {
    let store = state.store.as_ref();
    if let DetoxAction::Partitions(operation) = action {
        let partitions = reports::partitions(store, *operation)?;
        return Ok(Reply {
            response: Json(partitions).into_response(),
            cache: Vec::new(),
        });
    }

    let resolved = &*slot.insert(resolve_cycle(store, &params.cycle_request(), &state.defaults)?);
    let reply = match action {
        DetoxAction::CheckUpdate => {
            let latest =
                store.latest_completed_cycle(resolved.partition_id, state.defaults.operation)?;
            Reply {
                response: latest.map_or(0, |cycle| cycle.id.get()).to_string().into_response(),
                cache: Vec::new(),
            }
        }
        DetoxAction::Data(DataType::Summary) => {
            Reply::json(reports::site_summary(store, resolved)?)
        }
        DetoxAction::Data(DataType::SiteDetail(site)) => {
            Reply::json(reports::site_detail(store, resolved, site)?)
        }
        DetoxAction::Data(DataType::Inventory(category)) => {
            Reply::json(reports::inventory(store, resolved, *category)?)
        }
        DetoxAction::SearchDataset(dataset) => {
            Reply::json(reports::dataset_search(store, resolved, dataset)?)
        }
        DetoxAction::DumpDeletions => {
            let dump = reports::deletion_dump(store, resolved)?;
            Reply {
                response: dump_response(resolved.cycle_number(), dump.report),
                cache: dump.cache,
            }
        }
        DetoxAction::Page => Reply {
            response: Html(state.page.render(&resolved.header())).into_response(),
            cache: Vec::new(),
        },
        DetoxAction::Partitions(_) => {
            return Err(RequestError::Internal("partition listing has no cycle".to_string()));
        }
    };
    Ok(reply)
}

/// Wraps the deletion list as a plain-text attachment.
fn dump_response(cycle_number: u64, body: String) -> Response {
    let disposition = format!("attachment; filename=\"detox_deletions_{cycle_number}.txt\"");
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server initialization and transport failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration rejected.
    #[error("config error: {0}")]
    Config(String),
    /// Store, template, or audit sink failed to open.
    #[error("init error: {0}")]
    Init(String),
    /// Listener failure.
    #[error("transport error: {0}")]
    Transport(String),
}
