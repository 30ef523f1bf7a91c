use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::{json, with_status, Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::analysis::DEFAULT_SEARCH_K;
use crate::error::{AnalysisError, ServiceError, VisionError};
use crate::model::SearchHit;
use crate::service::AnalysisService;
use crate::vision::ImageUpload;

pub const DEFAULT_MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

const CORS_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "cache-control",
    "content-language",
    "content-type",
    "origin",
    "pragma",
    "referer",
    "user-agent",
    "x-api-key",
    "x-requested-with",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    DEFAULT_SEARCH_K
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct ScanServer {
    service: AnalysisService,
    max_body_bytes: u64,
}

impl ScanServer {
    pub fn new(service: AnalysisService, max_body_bytes: u64) -> Self {
        Self { service, max_body_bytes }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        // Paths before methods, so unknown paths come back 404 rather than 405
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| json(&serde_json::json!({ "status": "healthy" })));

        let analyze = warp::path("analyze")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::content_length_limit(self.max_body_bytes))
            .and(warp::body::json())
            .and(with_service(self.service.clone()))
            .and_then(handle_analyze);

        let search = warp::path("search")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::content_length_limit(self.max_body_bytes))
            .and(warp::body::json())
            .and(with_service(self.service.clone()))
            .and_then(handle_search);

        // warp has no header wildcard; list what browsers and API clients send
        let cors = warp::cors()
            .allow_any_origin()
            .allow_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"])
            .allow_headers(CORS_HEADERS.iter().copied());

        let log = warp::log::custom(|info| {
            info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                elapsed_ms = info.elapsed().as_millis() as u64,
                "request"
            );
        });

        health
            .or(analyze)
            .or(search)
            .recover(handle_rejection)
            .with(cors)
            .recover(handle_rejection)
            .with(log)
    }

    /// Serves until `shutdown` resolves.
    pub async fn run(self, addr: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), warp::Error> {
        let (bound, server) = warp::serve(self.routes()).try_bind_with_graceful_shutdown(addr, shutdown)?;
        info!(%bound, records = self.service.store().len(), "scanlens API listening");
        server.await;
        info!("server stopped");
        Ok(())
    }
}

fn with_service(service: AnalysisService) -> impl Filter<Extract = (AnalysisService,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

async fn handle_analyze(upload: ImageUpload, service: AnalysisService) -> Result<WithStatus<Json>, Infallible> {
    match service.analyze_upload(&upload).await {
        Ok(outcome) => Ok(with_status(json(&outcome), StatusCode::OK)),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_search(req: SearchRequest, service: AnalysisService) -> Result<WithStatus<Json>, Infallible> {
    match service.search(&req.query, req.k).await {
        Ok(results) => Ok(with_status(json(&SearchResponse { results }), StatusCode::OK)),
        Err(e) => Ok(error_reply(&e)),
    }
}

pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidInput(_) | ServiceError::Store(AnalysisError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Store(AnalysisError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Vision(VisionError::MissingApiKey) => StatusCode::UNAUTHORIZED,
        ServiceError::Vision(VisionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::Vision(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_reply(err: &ServiceError) -> WithStatus<Json> {
    let status = status_for(err);
    if status.is_server_error() {
        error!(status = status.as_u16(), error = %err, "request failed");
    } else {
        warn!(status = status.as_u16(), error = %err, "request rejected");
    }
    with_status(json(&ErrorBody { error: err.to_string() }), status)
}

async fn handle_rejection(err: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a JSON body".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content-length required".to_string())
    } else if let Some(e) = err.find::<warp::filters::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
    };
    Ok(with_status(json(&ErrorBody { error: message }), status))
}
