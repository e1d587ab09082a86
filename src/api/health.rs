//! Health and capability endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Which collaborators this server can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub transcription: bool,
    pub generation: bool,
    pub synthesis: bool,
    /// Audio turns end to end (`POST /api`, `POST /api/stream`)
    pub voice_turns: bool,
    pub voice_cloning: bool,
    /// Sample rate of synthesized PCM, when synthesis is configured
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

impl Capabilities {
    #[must_use]
    pub fn of(state: &ApiState) -> Self {
        let transcription = state.transcriber.is_some();
        let generation = state.generator.is_some();
        let synthesis = state.synthesizer.is_some();
        Self {
            transcription,
            generation,
            synthesis,
            voice_turns: transcription && generation && synthesis,
            voice_cloning: state.cloner.is_some(),
            sample_rate: state.synthesizer.as_ref().map(|s| s.sample_rate()),
        }
    }
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn capabilities(State(state): State<Arc<ApiState>>) -> Json<Capabilities> {
    Json(Capabilities::of(&state))
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/capabilities", get(capabilities))
        .with_state(state)
}
