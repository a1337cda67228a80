//! HTTP API for devices, detectors, the HR system and operator consoles
//!
//! Routing and request handling live in [`Api::dispatch`], which is plain
//! synchronous code over the engine; the hyper server only collects the body
//! and writes the response.
//!
//! | Method | Path                          | Success |
//! |--------|-------------------------------|---------|
//! | POST   | /presence-sample              | 202     |
//! | GET    | /presence/snapshot            | 200     |
//! | GET    | /presence/summary             | 200     |
//! | GET    | /presence/{id}/history        | 200     |
//! | POST   | /incidents                    | 201     |
//! | GET    | /incidents                    | 200     |
//! | GET    | /incidents/pending            | 200     |
//! | GET    | /incidents/summary            | 200     |
//! | POST   | /incidents/{id}/resolve       | 200     |
//! | PUT    | /subjects                     | 200     |
//! | GET    | /metrics                      | 200     |
//! | GET    | /health                       | 200     |

use crate::domain::incident::{IncidentId, IncidentType, NewIncident, ResolveAction};
use crate::domain::types::{SampleReport, SubjectId, SubjectRecord};
use crate::infra::error::{EngineError, EngineResult};
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::alerts::{IncidentFilter, StatusFilter, DEFAULT_LIST_LIMIT};
use crate::services::engine::Engine;
use crate::services::history::{parse_window, DEFAULT_WINDOW_SECS};
use crate::services::presence_store::UpsertOutcome;
use crate::services::roster::{OnlineFilter, RosterFilter};
use bytes::Bytes;
use chrono::Duration;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_PROMETHEUS: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl ApiResponse {
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, content_type: CONTENT_TYPE_JSON, body },
            Err(e) => {
                error!(error = %e, "response_serialize_failed");
                Self::error_body(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", &e.to_string())
            }
        }
    }

    fn error_body(status: StatusCode, kind: &str, message: &str) -> Self {
        Self {
            status,
            content_type: CONTENT_TYPE_JSON,
            body: json!({ "error": kind, "message": message }).to_string(),
        }
    }

    fn from_error(err: &EngineError) -> Self {
        let status = match err {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyResolved(_) => StatusCode::CONFLICT,
            EngineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::error_body(status, err.kind(), &err.to_string())
    }

    fn method_not_allowed() -> Self {
        Self::error_body(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "method not allowed")
    }

    fn not_found(path: &str) -> Self {
        Self::error_body(StatusCode::NOT_FOUND, "NotFound", &format!("no route for {path}"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotQuery {
    q: Option<String>,
    online: Option<String>,
    branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    window: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IncidentQuery {
    subject: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    action: String,
}

fn parse_query<T: DeserializeOwned + Default>(query: Option<&str>) -> EngineResult<T> {
    match query {
        Some(q) if !q.is_empty() => serde_urlencoded::from_str(q)
            .map_err(|e| EngineError::validation(format!("invalid query string: {e}"))),
        _ => Ok(T::default()),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> EngineResult<T> {
    serde_json::from_slice(body).map_err(|e| EngineError::validation(format!("invalid JSON body: {e}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Request router over a shared engine
pub struct Api {
    engine: Arc<Engine>,
    site_id: String,
}

impl Api {
    pub fn new(engine: Arc<Engine>, site_id: impl Into<String>) -> Self {
        Self { engine, site_id: site_id.into() }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Route one request. Never panics on bad input; every failure becomes an
    /// error body scoped to this request.
    pub fn dispatch(&self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) -> ApiResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        let result = match (segments.as_slice(), method) {
            (["presence-sample"], &Method::POST) => self.ingest(body),
            (["presence", "snapshot"], &Method::GET) => self.snapshot(query),
            (["presence", "summary"], &Method::GET) => {
                Ok(ApiResponse::json(StatusCode::OK, &self.engine.summary()))
            }
            (["presence", subject_id, "history"], &Method::GET) => self.history(subject_id, query),
            (["incidents"], &Method::POST) => self.create_incident(body),
            (["incidents"], &Method::GET) => self.list_incidents(query),
            (["incidents", "pending"], &Method::GET) => {
                Ok(ApiResponse::json(StatusCode::OK, &self.engine.pending_alerts()))
            }
            (["incidents", "summary"], &Method::GET) => {
                Ok(ApiResponse::json(StatusCode::OK, &self.engine.incident_summary()))
            }
            (["incidents", id, "resolve"], &Method::POST) => self.resolve(id, body),
            (["subjects"], &Method::PUT) => self.sync_subjects(body),
            (["metrics"], &Method::GET) => Ok(ApiResponse {
                status: StatusCode::OK,
                content_type: CONTENT_TYPE_PROMETHEUS,
                body: format_prometheus_metrics(&self.engine.metrics_summary(), &self.site_id),
            }),
            (["health"], &Method::GET) => Ok(ApiResponse::json(
                StatusCode::OK,
                &json!({ "ok": true, "subjects": self.engine.subject_count() }),
            )),
            (known, _) if is_known_route(known) => Ok(ApiResponse::method_not_allowed()),
            _ => Ok(ApiResponse::not_found(path)),
        };

        result.unwrap_or_else(|e| {
            match &e {
                EngineError::AlreadyResolved(_) => info!(path = %path, error = %e, "request_already_resolved"),
                _ => debug!(path = %path, error = %e, "request_rejected"),
            }
            ApiResponse::from_error(&e)
        })
    }

    fn ingest(&self, body: &[u8]) -> EngineResult<ApiResponse> {
        let report: SampleReport = parse_body(body)?;
        let outcome = self.engine.ingest(report)?;
        Ok(ApiResponse::json(
            StatusCode::ACCEPTED,
            &json!({ "ok": true, "superseded": outcome == UpsertOutcome::Superseded }),
        ))
    }

    fn snapshot(&self, query: Option<&str>) -> EngineResult<ApiResponse> {
        let q: SnapshotQuery = parse_query(query)?;
        let filter = RosterFilter {
            query: non_empty(q.q),
            online: q.online.as_deref().map(str::parse::<OnlineFilter>).transpose()?.unwrap_or_default(),
            branch: non_empty(q.branch),
        };
        Ok(ApiResponse::json(StatusCode::OK, &self.engine.snapshot(&filter)))
    }

    fn history(&self, subject_id: &str, query: Option<&str>) -> EngineResult<ApiResponse> {
        let q: HistoryQuery = parse_query(query)?;
        let window = match non_empty(q.window) {
            Some(raw) => parse_window(&raw)?,
            None => Duration::seconds(DEFAULT_WINDOW_SECS),
        };
        let points = self.engine.history(&SubjectId::new(subject_id), window)?;
        Ok(ApiResponse::json(StatusCode::OK, &points))
    }

    fn create_incident(&self, body: &[u8]) -> EngineResult<ApiResponse> {
        let request: NewIncident = parse_body(body)?;
        let outcome = self.engine.create_incident(request)?;
        let status = if outcome.deduplicated { StatusCode::OK } else { StatusCode::CREATED };
        Ok(ApiResponse::json(status, &outcome))
    }

    fn list_incidents(&self, query: Option<&str>) -> EngineResult<ApiResponse> {
        let q: IncidentQuery = parse_query(query)?;
        let filter = IncidentFilter {
            subject: non_empty(q.subject).map(SubjectId::new),
            kind: non_empty(q.kind).map(|k| k.parse::<IncidentType>()).transpose()?,
            status: q.status.as_deref().map(str::parse::<StatusFilter>).transpose()?.unwrap_or_default(),
            limit: q.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        };
        Ok(ApiResponse::json(StatusCode::OK, &self.engine.list_incidents(&filter)))
    }

    fn resolve(&self, id: &str, body: &[u8]) -> EngineResult<ApiResponse> {
        let id: IncidentId = id.parse()?;
        let request: ResolveBody = parse_body(body)?;
        let action: ResolveAction = request.action.parse()?;
        let incident = self.engine.resolve(id, action)?;
        Ok(ApiResponse::json(StatusCode::OK, &json!({ "ok": true, "incident": incident })))
    }

    fn sync_subjects(&self, body: &[u8]) -> EngineResult<ApiResponse> {
        let records: Vec<SubjectRecord> = parse_body(body)?;
        let count = self.engine.sync_subjects(records)?;
        Ok(ApiResponse::json(StatusCode::OK, &json!({ "ok": true, "subjects": count })))
    }
}

fn is_known_route(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["presence-sample"]
            | ["presence", "snapshot"]
            | ["presence", "summary"]
            | ["presence", _, "history"]
            | ["incidents"]
            | ["incidents", "pending"]
            | ["incidents", "summary"]
            | ["incidents", _, "resolve"]
            | ["subjects"]
            | ["metrics"]
            | ["health"]
    )
}

fn to_hyper(response: ApiResponse) -> Response<Full<Bytes>> {
    Response::builder()
        .status(response.status)
        .header("Content-Type", response.content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            error!(error = %e, "response_build_failed");
            let mut fallback = Response::new(Full::new(Bytes::from_static(b"internal error")));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    api: Arc<Api>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    if method == Method::OPTIONS {
        let mut preflight = to_hyper(ApiResponse {
            status: StatusCode::NO_CONTENT,
            content_type: CONTENT_TYPE_JSON,
            body: String::new(),
        });
        let headers = preflight.headers_mut();
        headers.insert("Access-Control-Allow-Methods", HeaderValue::from_static("GET, POST, PUT, OPTIONS"));
        headers.insert("Access-Control-Allow-Headers", HeaderValue::from_static("Content-Type"));
        return Ok(preflight);
    }

    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path = %path, error = %e, "request_body_rejected");
            return Ok(to_hyper(ApiResponse::error_body(
                StatusCode::PAYLOAD_TOO_LARGE,
                "ValidationError",
                "request body too large or unreadable",
            )));
        }
    };

    let response = api.dispatch(&method, &path, query.as_deref(), &body);
    debug!(
        method = %method,
        path = %path,
        status = %response.status.as_u16(),
        latency_us = %start.elapsed().as_micros(),
        "http_request"
    );
    Ok(to_hyper(response))
}

/// Serve the API until shutdown
pub async fn start_http_server(
    api: Arc<Api>,
    bind_address: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    info!(bind_address = %bind_address, port = %port, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let api = api.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let api = api.clone();
                                async move { handle_request(req, api).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
