use crate::{
    aggregate::Match,
    config::ServerConfig,
    extractor::{CatalogInfo, ExtractError, Extractor},
};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    extractor: Arc<Extractor>,
}

/// Build the HTTP routes around a bootstrapped extractor.
pub fn router(extractor: Arc<Extractor>, request_timeout: Duration) -> Router {
    let shared_state = Arc::new(SharedState { extractor });

    Router::new()
        .route("/extract/:catalog", post(extract))
        .route("/extract-skills", post(extract_skills))
        .route("/extract-occupations", post(extract_occupations))
        .route("/catalogs", get(catalogs))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(tower_http::timeout::TimeoutLayer::new(request_timeout))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => log::error!("failed to install signal handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(extractor: Arc<Extractor>, config: ServerConfig) -> anyhow::Result<()> {
    let app = router(
        extractor,
        Duration::from_secs(config.request_timeout_secs),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(extractor: Arc<Extractor>, config: ServerConfig) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(extractor, config).await })
}

#[derive(Debug)]
struct HttpError(ExtractError);

// Tell axum how to convert `ExtractError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            ExtractError::UnknownCatalog(_) => axum::http::StatusCode::NOT_FOUND,
            ExtractError::Segmentation(_) | ExtractError::Embedding(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::BAD_GATEWAY
            }
            ExtractError::DimensionMismatch(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl From<ExtractError> for HttpError {
    fn from(err: ExtractError) -> Self {
        Self(err)
    }
}

/// Run a CPU-bound extraction off the async workers.
async fn run_extract<T, F>(state: &SharedState, f: F) -> Result<T, HttpError>
where
    T: Send + 'static,
    F: FnOnce(&Extractor) -> Result<T, ExtractError> + Send + 'static,
{
    let extractor = state.extractor.clone();
    match tokio::task::spawn_blocking(move || f(&extractor)).await {
        Ok(result) => Ok(result?),
        // panics inside the provider end up here
        Err(err) => Err(HttpError(ExtractError::Embedding(
            crate::semantic::EmbeddingError::EmbeddingFailed(format!(
                "extraction task failed: {err}"
            )),
        ))),
    }
}

async fn extract(
    State(state): State<Arc<SharedState>>,
    Path(catalog): Path<String>,
    Json(payload): Json<Vec<String>>,
) -> Result<Json<Vec<Vec<Match>>>, HttpError> {
    log::debug!("extract '{catalog}': {} documents", payload.len());

    let matches = run_extract(&state, move |extractor| extractor.extract(&catalog, &payload)).await?;
    Ok(Json(matches))
}

async fn extract_skills(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<Vec<String>>,
) -> Result<Json<Vec<Vec<String>>>, HttpError> {
    let ids = run_extract(&state, move |extractor| extractor.extract_ids("skills", &payload)).await?;
    Ok(Json(ids))
}

async fn extract_occupations(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<Vec<String>>,
) -> Result<Json<Vec<Vec<String>>>, HttpError> {
    let ids = run_extract(&state, move |extractor| {
        extractor.extract_ids("occupations", &payload)
    })
    .await?;
    Ok(Json(ids))
}

async fn catalogs(State(state): State<Arc<SharedState>>) -> Json<Vec<CatalogInfo>> {
    Json(state.extractor.catalogs())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
