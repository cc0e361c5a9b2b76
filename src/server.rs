//! Web server for face editing and channel snapshots

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, DistortionParams, DistortionPatch, PipelineConfig, Point, Region};
use crate::error::SegmentError;
use crate::faces::{face_summaries, FaceId, FaceSummary, Quad};
use crate::output::encode_png;
use crate::segmenter::{ChannelStore, SegmenterControl, TickReport};
use crate::stats::PipelineStats;

/// Shared application state
pub struct AppState {
    /// Live pipeline configuration, swapped whole on every edit
    pub control: SegmenterControl,
    /// Latest channel per face
    pub channels: Arc<ChannelStore>,
    /// Host settings; the pipeline section is refreshed from `control` on save
    pub config: RwLock<Config>,
    /// Path to save configuration
    config_path: PathBuf,
    stats: RwLock<PipelineStats>,
    stop_requested: AtomicBool,
}

impl AppState {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        control: SegmenterControl,
        channels: Arc<ChannelStore>,
    ) -> Self {
        Self {
            control,
            channels,
            config: RwLock::new(config),
            config_path,
            stats: RwLock::new(PipelineStats::default()),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Fold a tick into the stats (called from the pipeline thread)
    pub fn record_tick(&self, report: &TickReport, tick_us: u64) {
        self.stats.write().record(report, tick_us);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Ask the pipeline loop to exit before its next tick
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Save configuration, including the live pipeline settings, to file
    pub fn save_config(&self) -> Result<()> {
        let mut config = self.config.write();
        config.pipeline = PipelineConfig::clone(&self.control.snapshot());
        config.save(&self.config_path)
    }

    fn face_summary(&self, face: FaceId) -> FaceSummary {
        // Summaries come back in `FaceId::ALL` order
        face_summaries(&self.control.snapshot()).swap_remove(face.index())
    }
}

/// Handler failure mapped onto an HTTP status
enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<SegmentError> for ApiError {
    fn from(e: SegmentError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/info", get(get_info))
        .route("/api/config", get(get_config))
        .route("/api/config/save", post(save_config))
        .route("/api/config/reset", post(reset_config))
        .route("/api/faces/active", post(set_active_faces))
        .route("/api/faces/:face/region", post(set_region))
        .route("/api/faces/:face/quad", post(set_quad))
        .route("/api/faces/:face/quad/from-region", post(quad_from_region))
        .route("/api/dewarp", post(set_dewarp))
        .route("/api/distortion", post(set_distortion))
        .route("/api/channels/:face", get(get_channel))
        .route("/api/stats", get(get_stats))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    channel_width: u32,
    channel_height: u32,
    faces: Vec<FaceSummary>,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let (channel_width, channel_height) = state.channels.dimensions();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        channel_width,
        channel_height,
        faces: face_summaries(&state.control.snapshot()),
    })
}

/// Get the live pipeline configuration
async fn get_config(State(state): State<Arc<AppState>>) -> Json<PipelineConfig> {
    Json(PipelineConfig::clone(&state.control.snapshot()))
}

/// Save configuration to file
async fn save_config(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state.save_config()?;
    Ok("Saved")
}

/// Restore default pipeline settings
async fn reset_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<PipelineConfig>> {
    state.control.replace(PipelineConfig::default())?;
    Ok(Json(PipelineConfig::default()))
}

#[derive(Deserialize)]
struct ActiveFacesRequest {
    faces: Vec<FaceId>,
}

/// Choose which faces render each tick
async fn set_active_faces(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActiveFacesRequest>,
) -> ApiResult<Json<Vec<FaceSummary>>> {
    state.control.set_active_faces(&req.faces)?;
    Ok(Json(face_summaries(&state.control.snapshot())))
}

/// Update a face's crop region
async fn set_region(
    State(state): State<Arc<AppState>>,
    Path(face): Path<FaceId>,
    Json(region): Json<Region>,
) -> ApiResult<Json<FaceSummary>> {
    state.control.set_region(face, region)?;
    Ok(Json(state.face_summary(face)))
}

/// Request to set or clear a face's quad
#[derive(Deserialize)]
struct QuadRequest {
    points: Option<Vec<Point>>,
    /// Sort the corners into TL, TR, BR, BL instead of requiring that order
    #[serde(default)]
    reorder: bool,
}

/// Set or clear a face's perspective quad
async fn set_quad(
    State(state): State<Arc<AppState>>,
    Path(face): Path<FaceId>,
    Json(req): Json<QuadRequest>,
) -> ApiResult<Json<FaceSummary>> {
    let quad = match req.points {
        None => None,
        Some(points) if req.reorder => {
            let corners: [Point; 4] = points.as_slice().try_into().map_err(|_| {
                SegmentError::degenerate(format!("expected 4 points, got {}", points.len()))
            })?;
            Some(Quad::from_unordered(corners)?)
        }
        Some(points) => Some(Quad::from_slice(&points)?),
    };

    state.control.set_quad(face, quad)?;
    Ok(Json(state.face_summary(face)))
}

/// Seed a face's quad from the corners of its region
async fn quad_from_region(
    State(state): State<Arc<AppState>>,
    Path(face): Path<FaceId>,
) -> ApiResult<Json<FaceSummary>> {
    let region = state.control.snapshot().faces.get(face).region;
    let quad = Quad::from_region(&region)?;
    state.control.set_quad(face, Some(quad))?;
    Ok(Json(state.face_summary(face)))
}

#[derive(Deserialize)]
struct EnableRequest {
    enabled: bool,
}

/// Toggle quad rectification
async fn set_dewarp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnableRequest>,
) -> ApiResult<StatusCode> {
    state.control.set_dewarp_enabled(req.enabled)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct DistortionRequest {
    /// Only the coefficients given are changed
    params: Option<DistortionPatch>,
    enabled: Option<bool>,
}

/// Update distortion parameters and/or toggle the pass
async fn set_distortion(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DistortionRequest>,
) -> ApiResult<Json<DistortionParams>> {
    state.control.update_distortion(req.params, req.enabled)?;
    Ok(Json(state.control.snapshot().distortion))
}

/// Get a face's current channel (PNG)
async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(face): Path<FaceId>,
) -> ApiResult<Response> {
    let channel = state.channels.get(face);
    let png = encode_png(&channel)?;

    Ok(([(axum::http::header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Get pipeline counters
async fn get_stats(State(state): State<Arc<AppState>>) -> Json<PipelineStats> {
    Json(state.stats())
}
