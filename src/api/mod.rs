//! HTTP API server: the orchestration boundary between clients and providers

pub mod assistant;
pub mod health;
pub mod rate_limit;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::{ChatCompletions, ResponseGenerator};
use crate::relay::FlushPolicy;
use crate::voice::{CartesiaCloner, CartesiaTts, Synthesizer, Transcriber, VoiceCloner, stt};
use crate::Result;

/// Shared state for API handlers
///
/// A collaborator is `None` when its provider is not configured; routes that
/// need it answer 503.
#[derive(Clone)]
pub struct ApiState {
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub generator: Option<Arc<dyn ResponseGenerator>>,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub cloner: Option<Arc<dyn VoiceCloner>>,
    pub relay_policy: FlushPolicy,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

impl ApiState {
    /// State with no collaborators configured
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transcriber: None,
            generator: None,
            synthesizer: None,
            cloner: None,
            relay_policy: FlushPolicy::default(),
            rate_limiter: None,
        }
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    port: u16,
    static_dir: Option<PathBuf>,
    state: ApiState,
    rate_limit: Option<u32>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            static_dir: None,
            state: ApiState::empty(),
            rate_limit: None,
        }
    }

    /// Builder with every provider that `config` has credentials for
    ///
    /// Providers that cannot be constructed are logged and left out.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let keys = &config.api_keys;
        let mut builder = Self::new(config.server.port)
            .static_dir(config.server.static_dir.clone())
            .rate_limit(config.server.rate_limit)
            .relay_policy(config.relay.clone());

        match stt::from_config(
            &config.stt,
            keys.groq.as_deref(),
            keys.openai.as_deref(),
            keys.deepgram.as_deref(),
        ) {
            Ok(t) => builder = builder.transcriber(Arc::from(t)),
            Err(e) => tracing::warn!(error = %e, "transcription disabled"),
        }

        match ChatCompletions::new(
            config.llm_api_key().unwrap_or_default().to_string(),
            config.llm.clone(),
        ) {
            Ok(g) => builder = builder.generator(Arc::new(g)),
            Err(e) => tracing::warn!(error = %e, "response generation disabled"),
        }

        let cartesia = keys.cartesia.clone().unwrap_or_default();
        match CartesiaTts::new(cartesia.clone(), &config.tts) {
            Ok(s) => builder = builder.synthesizer(Arc::new(s)),
            Err(e) => tracing::warn!(error = %e, "speech synthesis disabled"),
        }
        match CartesiaCloner::new(cartesia) {
            Ok(c) => builder = builder.cloner(Arc::new(c)),
            Err(e) => tracing::warn!(error = %e, "voice cloning disabled"),
        }

        builder
    }

    /// Set the transcription collaborator
    #[must_use]
    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.state.transcriber = Some(transcriber);
        self
    }

    /// Set the response generation collaborator
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.state.generator = Some(generator);
        self
    }

    /// Set the speech synthesis collaborator
    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.state.synthesizer = Some(synthesizer);
        self
    }

    /// Set the voice cloning collaborator
    #[must_use]
    pub fn cloner(mut self, cloner: Arc<dyn VoiceCloner>) -> Self {
        self.state.cloner = Some(cloner);
        self
    }

    /// Set how streamed replies are coalesced into synthesis calls
    #[must_use]
    pub fn relay_policy(mut self, policy: FlushPolicy) -> Self {
        self.state.relay_policy = policy;
        self
    }

    /// Limit requests per minute across all clients
    #[must_use]
    pub const fn rate_limit(mut self, requests_per_minute: Option<u32>) -> Self {
        self.rate_limit = requests_per_minute;
        self
    }

    /// Set the static files directory for serving a web UI
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let mut state = self.state;
        state.rate_limiter = self.rate_limit.map(rate_limit::create_limiter);

        ApiServer {
            state: Arc::new(state),
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes and layers
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .merge(assistant::router(self.state.clone()))
            .merge(health::router(self.state.clone()));

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::rate_limit_middleware,
        ));

        // CORS layer for cross-origin requests from a browser UI; the reply
        // headers must be readable by scripts
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(assistant::exposed_headers());

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.rate_limiter.is_some() {
            tracing::info!("rate limiting active");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
