//! EKIP API Gateway
//!
//! The HTTP surface of the knowledge platform.
//! Handles:
//! - Document upload and indexing
//! - Role-filtered question answering
//! - Rate limiting
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use ekip_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    errors::{AppError, Result},
    generation::create_generator,
    metrics, AccessPolicy, Embedder, Generator,
};
use ekip_context::{AnswerComposer, ComposerConfig};
use ekip_ingestion::{DocumentCatalog, IngestionPipeline, LopdfExtractor, PdfExtractor, PipelineConfig};
use ekip_search::{InMemoryIndex, Retriever, VectorIndex};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Room for multipart framing and the text fields around the file
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub retriever: Arc<Retriever>,
    pub composer: Arc<AnswerComposer>,
    pub generator: Arc<dyn Generator>,
    pub pipeline: Arc<IngestionPipeline>,
    pub extractor: Arc<dyn PdfExtractor>,
}

impl AppState {
    /// Wire collaborators, index and services from configuration
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::with_collaborators(config, embedder, generator)
    }

    /// Wire the index and services around the given model clients
    pub fn with_collaborators(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let policy = Arc::new(AccessPolicy::from_config(&config.access)?);
        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryIndex::with_dimension(config.embedding.dimension));

        let pipeline = IngestionPipeline::new(
            PipelineConfig::from_app_config(&config),
            embedder.clone(),
            index.clone(),
            Arc::new(DocumentCatalog::new()),
            policy.clone(),
        )?;
        let retriever = Retriever::new(index, embedder.clone(), policy, config.embedding_timeout());
        let composer = AnswerComposer::new(ComposerConfig {
            max_context_chars: config.retrieval.max_context_chars,
            generation_timeout: config.generation_timeout(),
        });

        info!(
            embedder = embedder.model_name(),
            dimension = embedder.dimension(),
            generator = generator.model_name(),
            "Services initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            retriever: Arc::new(retriever),
            composer: Arc::new(composer),
            generator,
            pipeline: Arc::new(pipeline),
            extractor: Arc::new(LopdfExtractor::new()),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    init_tracing(&config.observability);
    info!("Starting EKIP API Gateway v{}", ekip_common::VERSION);

    // Initialize metrics
    if !install_metrics_exporter(config.observability.metrics_port)? {
        info!("Prometheus exporter disabled (metrics_port = 0)");
    }
    metrics::register_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server.host")?;
    let shutdown_timeout = config.shutdown_timeout();

    // Create app state and router
    let state = AppState::from_config(config).map_err(|e| {
        error!(error = %e, "Failed to initialize services");
        e
    })?;
    let app = create_router(state)?;

    // Start the server
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let stop = Arc::new(tokio::sync::Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let stop = stop.clone();
        async move { stop.notified().await }
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    stop.notify_one();
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result??,
        Err(_) => warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Graceful shutdown timed out, dropping open connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// JSON or plain logs, filtered by `RUST_LOG` when set
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port; port 0 leaves the exporter off
fn install_metrics_exporter(port: u16) -> anyhow::Result<bool> {
    if port == 0 {
        return Ok(false);
    }
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("embedding_duration_seconds".to_string()),
            metrics::EMBEDDING_BUCKETS,
        )?
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()
        .context("Failed to install Prometheus exporter")?;
    Ok(true)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(cors.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).map_err(|_| AppError::Configuration {
                message: format!("Invalid CORS origin: {}", o),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    let config = state.config.clone();

    // API routes
    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/upload", post(handlers::upload::upload))
        .route("/query", post(handlers::query::query));

    let mut app = Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(
            config.server.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .layer(from_fn(middleware::request_metrics::track_requests));

    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        )?;
        app = app.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Request ID is set before it is propagated to the response
    Ok(app
        .layer(from_fn_with_state(
            config.request_timeout(),
            middleware::request_timeout::enforce_deadline,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins)?)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use async_trait::async_trait;
    use ekip_common::{AccessTag, Role};
    use ekip_ingestion::{ExtractedPdf, IngestRequest, PageMap};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_test::assert_ok;
    use tower::ServiceExt;

    const BOUNDARY: &str = "ekip-test-boundary";

    /// Embedder that never answers within any sane deadline
    struct StalledEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for StalledEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![0.0; self.dimension])
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![vec![0.0; self.dimension]; texts.len()])
        }

        fn model_name(&self) -> &str {
            "stalled"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    /// Extractor that ignores the bytes and returns fixed pages
    struct FixedPages(Vec<String>);

    impl PdfExtractor for FixedPages {
        fn extract(&self, _bytes: &[u8]) -> Result<ExtractedPdf> {
            Ok(ExtractedPdf { pages: self.0.clone() })
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config
    }

    fn test_state() -> AppState {
        assert_ok!(AppState::from_config(test_config()))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn query_request(query: &str, role: &str) -> Request<Body> {
        Request::post("/api/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "query": query, "role": role }).to_string()))
            .unwrap()
    }

    fn upload_request(filename: &str, contents: &[u8], role: &str, doc_type: &str) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(contents);
        for (name, value) in [("role", role), ("doc_type", doc_type)] {
            body.extend_from_slice(
                format!("\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn seed(state: &AppState, text: &str, filename: &str, doc_type: &str) {
        assert_ok!(
            state
                .pipeline
                .ingest(IngestRequest {
                    text: text.to_string(),
                    filename: filename.to_string(),
                    doc_type: AccessTag::new(doc_type),
                    uploaded_by: Role::new("Admin"),
                    pages: PageMap::none(),
                })
                .await
        );
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state()).unwrap();
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], ekip_common::VERSION);
    }

    #[tokio::test]
    async fn test_query_answers_with_sources() {
        let state = test_state();
        seed(
            &state,
            "Employees receive twenty five days of annual leave each year. \
             Unused annual leave may be carried over until March.",
            "handbook.pdf",
            "Employee",
        )
        .await;

        let app = create_router(state).unwrap();
        let response = app
            .oneshot(query_request("How many days of annual leave?", "Employee"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["answer"].as_str().unwrap().contains("annual leave"));
        assert_eq!(body["sources"][0]["filename"], "handbook.pdf");
        assert!(body["sources"][0].get("page").is_none());
    }

    #[tokio::test]
    async fn test_query_hides_restricted_documents() {
        let state = test_state();
        seed(
            &state,
            "Salary bands for the engineering organisation are reviewed every spring.",
            "salaries.pdf",
            "HR",
        )
        .await;

        let app = create_router(state).unwrap();
        let response = app
            .oneshot(query_request("What are the salary bands?", "Employee"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["answer"], "No relevant information found.");
        assert_eq!(body["sources"], json!([]));
    }

    #[tokio::test]
    async fn test_query_unknown_role_forbidden() {
        let app = create_router(test_state()).unwrap();
        let response = app
            .oneshot(query_request("What is the leave policy?", "Guest"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "UNKNOWN_ROLE");
        assert!(!body["detail"].as_str().unwrap().contains("Guest"));
    }

    #[tokio::test]
    async fn test_query_validation() {
        let app = create_router(test_state()).unwrap();

        let response = app.clone().oneshot(query_request("hi", "HR")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

        let response = app
            .oneshot(
                Request::post("/api/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"query\": 42}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await.get("detail").is_some());
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf_bytes() {
        let app = create_router(test_state()).unwrap();
        let response = app
            .oneshot(upload_request("policy.pdf", b"PK\x03\x04 not a pdf", "HR", "HR"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn test_upload_rejects_unsafe_filename() {
        let app = create_router(test_state()).unwrap();
        let response = app
            .oneshot(upload_request("../policy.pdf", b"%PDF-1.4", "HR", "HR"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_file() {
        let mut config = test_config();
        config.server.max_upload_bytes = 16;
        let app = create_router(AppState::from_config(config).unwrap()).unwrap();

        let response = app
            .oneshot(upload_request("big.pdf", &[b'%'; 64], "HR", "HR"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let mut config = test_config();
        config.rate_limit.enabled = true;
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = create_router(AppState::from_config(config).unwrap()).unwrap();

        let health = || Request::get("/api/health").body(Body::empty()).unwrap();
        let first = app.clone().oneshot(health()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(health()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(second).await["code"], "RATE_LIMITED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_returns_json_timeout() {
        let mut config = test_config();
        config.server.request_timeout_secs = 1;
        let embedder = Arc::new(StalledEmbedder {
            dimension: config.embedding.dimension,
        });
        let generator = assert_ok!(create_generator(&config.generation));
        let state = assert_ok!(AppState::with_collaborators(config, embedder, generator));
        let app = create_router(state).unwrap();

        let response = app
            .oneshot(query_request("What is the leave policy?", "Employee"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["code"], "TIMEOUT");
        assert!(body["detail"].as_str().unwrap().contains("request"));
    }

    #[tokio::test]
    async fn test_upload_reports_indexed_text_length() {
        let mut state = test_state();
        let page = "word ".repeat(12);
        state.extractor = Arc::new(FixedPages(vec![page.clone(), page]));
        let app = create_router(state).unwrap();

        let response = app
            .oneshot(upload_request("policy.pdf", b"%PDF-1.4 stub", "HR", "HR"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        // Two 60-character pages joined by a newline
        assert_eq!(body["text_length"], 121);
        assert_eq!(body["filename"], "policy.pdf");
        assert_eq!(body["doc_type"], "HR");
    }

    #[test]
    fn test_metrics_exporter_disabled_on_port_zero() {
        assert!(!install_metrics_exporter(0).unwrap());
    }

    #[test]
    fn test_invalid_cors_origin() {
        assert!(cors_layer(&["https://intranet.example.com".to_string()]).is_ok());
        assert!(matches!(
            cors_layer(&["bad\norigin".to_string()]),
            Err(AppError::Configuration { .. })
        ));
    }
}
