//! HTTP API for progression sessions
//!
//! Endpoints:
//! - GET /health - Health check
//! - POST /session/new - Create new session
//! - GET /session/{id} - Session status
//! - DELETE /session/{id} - Close session (snapshot saved if a directory is set)
//! - POST /session/{id}/turn - Run drafts through the quality gate and commit
//! - POST /session/{id}/intervention - Commit a rendered intervention
//! - GET /session/{id}/snapshot - Full snapshot
//! - GET /session/{id}/flat - Flattened snapshot records

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::core::{save_snapshot, Embedder, ProgressionController, ScriptedGenerator};
use crate::error::EngineError;
use crate::types::{Intervention, SessionSnapshot, TensionPhase, Turn, TurnOutcome};

/// One conversation
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub controller: ProgressionController,
    pub created_at: String,
}

/// App state
pub struct AppState {
    pub config: EngineConfig,
    pub embedder: Arc<dyn Embedder>,
    /// Each session has its own lock; the map lock is held only for lookup
    pub sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    pub snapshot_dir: Option<PathBuf>,
}

/// Create new session response
#[derive(Debug, Serialize, Deserialize)]
pub struct NewSessionResponse {
    pub session_id: String,
}

/// Session status response
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub created_at: String,
    pub turn_count: usize,
    pub active_tension: Option<String>,
    pub tension_phase: Option<TensionPhase>,
    pub rotation_advice: Option<String>,
    pub last_synthesis_index: u64,
}

/// Propose a turn: the first draft plus revisions served in order
#[derive(Debug, Deserialize)]
pub struct ProposeTurnRequest {
    pub speaker: String,
    pub drafts: Vec<String>,
}

/// Commit an intervention as a turn
#[derive(Debug, Deserialize)]
pub struct CommitInterventionRequest {
    pub speaker: String,
    pub intervention: Intervention,
}

/// Close session response
#[derive(Debug, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub session_id: String,
    pub snapshot_path: Option<String>,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions_active: usize,
}

/// Create the API router
pub fn create_router(
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    snapshot_dir: Option<PathBuf>,
) -> Router {
    let state = Arc::new(AppState {
        config,
        embedder,
        sessions: RwLock::new(HashMap::new()),
        snapshot_dir,
    });

    Router::new()
        .route("/health", get(health))
        .route("/session/new", post(create_session))
        .route("/session/:id", get(get_session).delete(close_session))
        .route("/session/:id/turn", post(propose_turn))
        .route("/session/:id/intervention", post(commit_intervention))
        .route("/session/:id/snapshot", get(get_snapshot))
        .route("/session/:id/flat", get(get_flat))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let sessions = state.sessions.read().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        sessions_active: sessions.len(),
    })
}

/// Create new session
async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NewSessionResponse>, StatusCode> {
    let controller = ProgressionController::new(state.config.clone(), state.embedder.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "cannot build controller");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let session_id = generate_session_id();
    let session = Session {
        id: session_id.clone(),
        controller,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let mut sessions = state.sessions.write().await;
    sessions.insert(session_id.clone(), Arc::new(Mutex::new(session)));
    info!(session = %session_id, "session created");

    Ok(Json(NewSessionResponse { session_id }))
}

async fn lookup(state: &AppState, id: &str) -> Result<Arc<Mutex<Session>>, StatusCode> {
    let sessions = state.sessions.read().await;
    sessions.get(id).cloned().ok_or(StatusCode::NOT_FOUND)
}

/// Get session status
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>, StatusCode> {
    let session = lookup(&state, &id).await?;
    let session = session.lock().await;
    let controller = &session.controller;

    Ok(Json(SessionStatusResponse {
        session_id: id,
        created_at: session.created_at.clone(),
        turn_count: controller.history().len(),
        active_tension: controller.active_tension().map(|p| p.key()),
        tension_phase: controller.active_tension().map(|p| controller.tension_phase(p)),
        rotation_advice: controller.rotation_advice().map(|d| d.key()),
        last_synthesis_index: controller.state().last_synthesis_index(),
    }))
}

/// Run drafts through the quality gate and commit one
#[instrument(skip(state, req), fields(speaker = %req.speaker, drafts = req.drafts.len()))]
async fn propose_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ProposeTurnRequest>,
) -> Result<Json<TurnOutcome>, StatusCode> {
    if req.drafts.is_empty() || req.speaker.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let session = lookup(&state, &id).await?;
    let mut session = session.lock().await;

    let mut generator = ScriptedGenerator::new(req.drafts);
    let outcome = session
        .controller
        .propose_and_commit(&req.speaker, &mut generator)
        .await
        .map_err(|e| {
            warn!(session = %id, error = %e, "turn failed");
            match e {
                EngineError::GeneratorTimeout => StatusCode::GATEWAY_TIMEOUT,
                EngineError::Generator(_) => StatusCode::BAD_GATEWAY,
            }
        })?;

    Ok(Json(outcome))
}

/// Commit a rendered intervention
#[instrument(skip(state, req), fields(kind = %req.intervention.kind))]
async fn commit_intervention(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CommitInterventionRequest>,
) -> Result<Json<Turn>, StatusCode> {
    let session = lookup(&state, &id).await?;
    let mut session = session.lock().await;
    let turn = session
        .controller
        .commit_intervention(&req.intervention, &req.speaker)
        .await;
    Ok(Json(turn))
}

/// Get snapshot for session
async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    let session = lookup(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(session.controller.snapshot()))
}

/// Get flattened snapshot records
async fn get_flat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BTreeMap<String, Value>>, StatusCode> {
    let session = lookup(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(session.controller.snapshot().to_flat_records()))
}

/// Close a session, saving its snapshot when configured
async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CloseSessionResponse>, StatusCode> {
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&id).ok_or(StatusCode::NOT_FOUND)?
    };
    let session = session.lock().await;

    let mut snapshot_path = None;
    if let Some(dir) = &state.snapshot_dir {
        if !session.controller.history().is_empty() {
            match save_snapshot(&session.controller.snapshot(), dir) {
                Ok(path) => snapshot_path = Some(path.display().to_string()),
                Err(e) => {
                    error!(session = %id, error = %e, "snapshot not saved");
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        }
    }
    info!(session = %session.id, turns = session.controller.history().len(), "session closed");

    Ok(Json(CloseSessionResponse {
        session_id: id,
        snapshot_path,
    }))
}

/// Generate session ID
fn generate_session_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session_{:x}_{}", nanos as u64, seq)
}

/// Run the API server
pub async fn run_server(
    addr: &str,
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    snapshot_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = create_router(config, embedder, snapshot_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "volley API listening");
    info!("  POST   /session/new              - Create session");
    info!("  GET    /session/:id              - Session status");
    info!("  DELETE /session/:id              - Close session");
    info!("  POST   /session/:id/turn         - Propose and commit a turn");
    info!("  POST   /session/:id/intervention - Commit an intervention");
    info!("  GET    /session/:id/snapshot     - Snapshot");
    info!("  GET    /session/:id/flat         - Flat snapshot records");
    info!("  GET    /health                   - Health check");
    axum::serve(listener, router).await?;
    Ok(())
}
