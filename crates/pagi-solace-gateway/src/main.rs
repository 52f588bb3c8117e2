//! PAGI Solace Gateway — supportive chat API.
//! POST /chat runs the session pipeline; GET /sessions reports live and logged sessions.
//! Session state is process-local: run one instance or route sessions stickily.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pagi_solace_core::{
    generator_from_config, training, ChatError, ChatReply, ConversationPipeline, LogEntry,
    SessionStats, SessionStore, SolaceConfig,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ConversationPipeline>,
    export_path: PathBuf,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct SessionLogResponse {
    session_id: String,
    entries: Vec<LogEntry>,
}

#[derive(Serialize)]
struct ExportResponse {
    path: String,
    rows: usize,
}

/// JSON `{error}` body with a status. Internal detail stays in the operator log.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::EmptyInput => ApiError(StatusCode::BAD_REQUEST, e.to_string()),
            ChatError::Internal(detail) => {
                tracing::error!(target: "pagi::solace::gateway", error = %detail, "chat request failed");
                ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        }
    }
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(target: "pagi::solace::gateway", error = %e, "request failed");
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[pagi-solace-gateway] .env not loaded: {} (using system environment)", e);
    }

    // --prepare-dataset <conversations.json> <out.jsonl>: format fine-tuning data and exit.
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "--prepare-dataset") {
        let (Some(input), Some(output)) = (args.get(pos + 1), args.get(pos + 2)) else {
            eprintln!("Usage: pagi-solace-gateway --prepare-dataset <conversations.json> <out.jsonl>");
            std::process::exit(1);
        };
        match prepare_dataset(input.as_ref(), output.as_ref()) {
            Ok(n) => {
                println!("Training corpus: {} sample(s) written to {}", n, output);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Dataset preparation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let cfg = SolaceConfig::load()?;
    let _file_log_guard = init_tracing(&cfg);

    let generator = generator_from_config(&cfg);
    let pipeline = Arc::new(ConversationPipeline::from_config(&cfg, generator)?);
    spawn_session_sweeper(
        Arc::clone(pipeline.sessions()),
        Duration::from_secs(cfg.sweep_interval_secs.max(1)),
    );

    let state = AppState {
        pipeline,
        export_path: PathBuf::from(&cfg.export_path),
    };
    let app = router(state).layer(CorsLayer::permissive());

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        target: "pagi::solace::gateway",
        app = %cfg.app_name,
        addr = %addr,
        llm_mode = ?cfg.llm_mode,
        "gateway listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .route("/api/chat", post(chat_handler))
        .route("/sessions", get(sessions_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/sessions/:id/log", get(session_log_handler))
        .route("/logs/export", post(export_handler))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_traffic))
}

/// Stdout plus, when `operator_log_dir` is set, a daily rolling file. Keep the guard alive.
fn init_tracing(cfg: &SolaceConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let (file_layer, guard) = match cfg.operator_log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "solace-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn spawn_session_sweeper(sessions: Arc<dyn SessionStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await;
        loop {
            tick.tick().await;
            let evicted = sessions.evict_expired();
            if evicted > 0 {
                tracing::info!(
                    target: "pagi::solace::gateway",
                    evicted,
                    active = sessions.active_count(),
                    "expired sessions swept"
                );
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "pagi::solace::gateway", error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "pagi::solace::gateway", "shutdown requested");
}

fn prepare_dataset(input: &std::path::Path, output: &std::path::Path) -> Result<usize, training::TrainingError> {
    let samples = training::prepare_dataset(input, training::DEFAULT_EOS)?;
    let written = training::write_jsonl(&samples, output)?;
    training::write_manifest(&training::TrainerManifest::default(), &output.with_extension("toml"))?;
    Ok(written)
}

async fn log_traffic(
    connect: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        target: "pagi::solace::gateway",
        peer = ?connect.map(|ConnectInfo(addr)| addr),
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn health() -> &'static str {
    "OK"
}

/// POST /chat: `{message, session_id?}` → `{response, session_id, timestamp}`.
async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.body_text()))?;
    let reply = state
        .pipeline
        .handle_message(req.session_id.as_deref(), &req.message)
        .await?;
    Ok(Json(reply))
}

/// Stats scan the whole interaction log, so they run on the blocking pool.
async fn sessions_handler(State(state): State<AppState>) -> Result<Json<SessionStats>, ApiError> {
    let pipeline = Arc::clone(&state.pipeline);
    let stats = tokio::task::spawn_blocking(move || pipeline.stats())
        .await
        .map_err(internal)?;
    Ok(Json(stats))
}

async fn session_log_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionLogResponse>, ApiError> {
    let log = Arc::clone(state.pipeline.log());
    let lookup = id.clone();
    let entries = tokio::task::spawn_blocking(move || log.query(&lookup))
        .await
        .map_err(internal)?
        .map_err(internal)?;
    Ok(Json(SessionLogResponse { session_id: id, entries }))
}

async fn export_handler(State(state): State<AppState>) -> Result<Json<ExportResponse>, ApiError> {
    let log = Arc::clone(state.pipeline.log());
    let target = state.export_path.clone();
    let summary = tokio::task::spawn_blocking(move || log.export(&target))
        .await
        .map_err(internal)?
        .map_err(internal)?
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, "No interactions logged".to_string()))?;
    tracing::info!(target: "pagi::solace::gateway", rows = summary.rows, path = %summary.path.display(), "interaction log exported");
    Ok(Json(ExportResponse {
        path: summary.path.display().to_string(),
        rows: summary.rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::async_trait;
    use pagi_solace_core::{
        ContentFilter, GenerationError, InMemorySessionStore, InteractionLog, ResponseEnhancer,
        TextGenerator,
    };
    use tower::ServiceExt;

    struct Sunny;

    #[async_trait]
    impl TextGenerator for Sunny {
        async fn generate(&self, _prompt: &str, _max_new_tokens: u32) -> Result<String, GenerationError> {
            Ok("It's sunny.".to_string())
        }
        fn name(&self) -> &str {
            "sunny"
        }
    }

    fn test_app(dir: &tempfile::TempDir) -> Router {
        let pipeline = ConversationPipeline::new(
            ContentFilter::default(),
            ResponseEnhancer::new(5, 0.0, Some(3)),
            Arc::new(Sunny),
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InteractionLog::open(dir.path().join("user_sessions.log")).unwrap()),
        );
        router(AppState {
            pipeline: Arc::new(pipeline),
            export_path: dir.path().join("export/sessions_export.csv"),
        })
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_reply_and_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);
        let res = app
            .oneshot(post_json("/chat", r#"{"message": "Tell me about the weather"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["response"], "It's sunny.");
        assert!(!json["session_id"].as_str().unwrap().is_empty());
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn empty_and_missing_messages_are_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);
        for body in [r#"{"message": "   "}"#, r#"{}"#] {
            let res = app.clone().oneshot(post_json("/api/chat", body)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(json_body(res).await["error"], "Empty message");
        }
        let res = app.clone().oneshot(post_json("/chat", "{not json")).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(res).await["error"].is_string());

        let stats = json_body(app.oneshot(get("/sessions")).await.unwrap()).await;
        assert_eq!(stats["active_sessions"], 0);
    }

    #[tokio::test]
    async fn flagged_reply_rotates_within_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);
        let filter = ContentFilter::default();

        let first = json_body(
            app.clone()
                .oneshot(post_json("/chat", r#"{"message": "I feel hopeless"}"#))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(first["response"], filter.get_canned_response(0));
        let sid = first["session_id"].as_str().unwrap().to_string();

        let body = serde_json::json!({ "message": "I feel worthless", "session_id": sid }).to_string();
        let second = json_body(app.oneshot(post_json("/chat", &body)).await.unwrap()).await;
        assert_eq!(second["session_id"], sid.as_str());
        assert_eq!(second["response"], filter.get_canned_response(1));
    }

    #[tokio::test]
    async fn sessions_and_log_lookup_reflect_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);
        let mut sid = String::new();
        for msg in ["hello", "hi again"] {
            let res = app
                .clone()
                .oneshot(post_json("/chat", &serde_json::json!({ "message": msg }).to_string()))
                .await
                .unwrap();
            sid = json_body(res).await["session_id"].as_str().unwrap().to_string();
        }

        let stats = json_body(app.clone().oneshot(get("/api/sessions")).await.unwrap()).await;
        assert_eq!(stats["active_sessions"], 2);
        assert_eq!(stats["total_logged_sessions"], 2);

        let log = json_body(app.oneshot(get(&format!("/sessions/{sid}/log"))).await.unwrap()).await;
        let entries = log["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["speaker"], "user");
        assert_eq!(entries[0]["message"], "hi again");
        assert_eq!(entries[1]["speaker"], "bot");
    }

    #[tokio::test]
    async fn export_is_404_until_something_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);
        let res = app.clone().oneshot(post_json("/logs/export", "")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(post_json("/chat", r#"{"message": "hello"}"#))
            .await
            .unwrap();
        let res = app.oneshot(post_json("/logs/export", "")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["rows"], 2);
        assert!(std::path::Path::new(json["path"].as_str().unwrap()).exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn session_stats_count_a_long_log() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir);
        {
            let log = InteractionLog::open(dir.path().join("user_sessions.log")).unwrap();
            for i in 0..500 {
                log.append(&format!("old-{}", i % 50), pagi_solace_core::Speaker::User, "earlier")
                    .unwrap();
            }
        }
        let stats = json_body(app.oneshot(get("/sessions")).await.unwrap()).await;
        assert_eq!(stats["active_sessions"], 0);
        assert_eq!(stats["total_logged_sessions"], 50);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let res = test_app(&dir).oneshot(get("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
