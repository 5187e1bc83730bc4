use crate::{
    app::{AppError, AppLocal},
    auth::extract_bearer_token,
    eid::Eid,
    profiles::{Profile, ProfileCreate, ProfileUpdate},
};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::{signal, sync::RwLock};

const DEFAULT_LIST_LIMIT: usize = 50;
const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Clone)]
struct SharedState {
    app: Arc<RwLock<AppLocal>>,
}

async fn start_app(app: AppLocal) {
    let listen_addr = app.config().read().unwrap().listen_addr.clone();
    let uploads_dir = app.uploads_dir();

    let app = Arc::new(RwLock::new(app));

    let signal = shutdown_signal(app.clone());
    let shared_state = Arc::new(SharedState { app: app.clone() });

    async fn shutdown_signal(app: Arc<RwLock<AppLocal>>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let mut app = app.write().await;
        app.shutdown();

        log::warn!("waiting for queues to stop");
        app.wait_task_queue_finish();
    }

    let app = Router::new()
        .nest_service(
            "/api/file/",
            tower_http::services::ServeDir::new(uploads_dir),
        )
        .route("/api/profiles", get(list_profiles))
        .route("/api/profiles", post(create_profile))
        .route("/api/profiles/total", get(total))
        .route("/api/profiles/:id", get(get_profile))
        .route("/api/profiles/:id", patch(update_profile))
        .route("/api/search", post(search))
        .route("/api/upload", post(upload))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await.unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

pub fn start_daemon(app: AppLocal) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(app).await });
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self.0 {
            AppError::Validation(_) | AppError::MalformedVector { .. } | AppError::Base64(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::IO(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, json!({"error": self.0.to_string()}).to_string()).into_response()
    }
}

// lets handlers use `?` on anything convertible into AppError
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_profiles(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<ListParams>,
) -> Result<axum::Json<Vec<Profile>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.list(params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn create_profile(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ProfileCreate>,
) -> Result<axum::Json<Profile>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.create(payload).map(Into::into).map_err(Into::into)
    })
}

async fn get_profile(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<axum::Json<Profile>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.get(&Eid::from(id)).map(Into::into).map_err(Into::into)
    })
}

async fn update_profile(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ProfileUpdate>,
) -> Result<axum::Json<Profile>, HttpError> {
    log::debug!("payload: {payload:?}");

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(AppError::Unauthorized)?
        .to_string();

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.update(&token, &Eid::from(id), payload)
            .map(Into::into)
            .map_err(Into::into)
    })
}

/// Search by text query or by a precomputed embedding vector. Exactly one
/// of the two must be present.
#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub limit: Option<usize>,
}

impl Debug for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SearchRequest {{ query: {:?}, embedding: {}, limit: {:?} }}",
            self.query,
            match &self.embedding {
                Some(e) => format!("[{} floats]", e.len()),
                None => "None".to_string(),
            },
            self.limit
        )
    }
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub profile: Profile,
    pub score: f32,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<axum::Json<Vec<SearchHit>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let limit = payload.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();

        let results = match (payload.embedding, payload.query) {
            (Some(embedding), _) => app.search_vector(&embedding, limit)?,
            (None, Some(query)) => app.search_text(&query, limit)?,
            (None, None) => {
                return Err(AppError::Validation(
                    "either 'query' or 'embedding' is required".to_string(),
                )
                .into())
            }
        };

        Ok(results
            .into_iter()
            .map(|(profile, score)| SearchHit { profile, score })
            .collect::<Vec<_>>()
            .into())
    })
}

#[derive(Deserialize)]
pub struct UploadRequest {
    pub image: String,
}

impl Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UploadRequest {{ image: [REDUCTED] }}")
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub public_url: String,
    pub file_name: String,
}

async fn upload(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<UploadRequest>,
) -> Result<axum::Json<UploadResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.upload_image(&payload.image)
            .map(|public_url| {
                let file_name = public_url
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                UploadResponse {
                    public_url,
                    file_name,
                }
                .into()
            })
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TotalResponse {
    pub total: usize,
}

async fn total(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<TotalResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.total()
            .map(|total| TotalResponse { total }.into())
            .map_err(Into::into)
    })
}
