//! HTTP API for catalog intake
//!
//! ## Items
//! - `POST /api/v1/items` - Create an item (honours `Idempotency-Key`)
//! - `GET /api/v1/items` - List items, newest first (`status`, `brand`, `category`, `limit`, `cursor`)
//! - `GET /api/v1/items/{id}` - Get an item
//! - `PATCH /api/v1/items/{id}` - Update an item; body carries the expected `version`
//!
//! ## Bulk
//! - `POST /api/v1/items:bulk` - Create many items, one transaction each (honours `Idempotency-Key`)
//! - `GET /api/v1/items:bulk/limits` - Advertised bulk limits
//!
//! ## Operations
//! - `GET /api/v1/idempotency/stats` - Idempotency table statistics
//! - `GET /healthz` - Liveness
//! - `GET /readyz` - Readiness (store round-trip)
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "Idempotency-Key: order-42" \
//!      -d '{"sku":"A-1","title":"Widget"}' \
//!      http://localhost:8080/api/v1/items
//!
//! curl "http://localhost:8080/api/v1/items?limit=2"
//! curl "http://localhost:8080/api/v1/items?limit=2&cursor=<next_cursor>"
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{ErrorCode, IntakeError};
use crate::services::item_service::parse_item_id;
use crate::services::response::{
    created, error_response, error_response_with, from_result, json_bytes_response, json_response,
    method_not_allowed, ok, route_not_found, service_unavailable,
};
use crate::services::{BeginOutcome, ItemInput, ItemPatch, ListQuery, Services};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";

const ITEMS_PATH: &str = "/api/v1/items";
const ITEM_PREFIX: &str = "/api/v1/items/";
const BULK_PATH: &str = "/api/v1/items:bulk";
const BULK_LIMITS_PATH: &str = "/api/v1/items:bulk/limits";
const IDEMPOTENCY_STATS_PATH: &str = "/api/v1/idempotency/stats";

type HttpResponse = Response<Full<Bytes>>;

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    max_body_bytes: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        let max_body_bytes = services.bulk.limits().max_size_bytes;
        Self {
            services,
            bind_addr,
            max_body_bytes,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), IntakeError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route a request and stamp the response with its request id
    pub async fn handle_request<B>(&self, req: Request<B>) -> Result<HttpResponse, Infallible>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let span = info_span!("request", method = %method, path = %path, request_id = %request_id);

        async move {
            let started = Instant::now();
            debug!("Incoming request");

            let mut response = self.route(req, method, &path).await;

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            debug!(
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            );
            Ok(response)
        }
        .instrument(span)
        .await
    }

    async fn route<B>(&self, req: Request<B>, method: Method, path: &str) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match (method, path) {
            // Probes
            (Method::GET, "/healthz") => ok(&json!({ "status": "ok" })),
            (Method::GET, "/readyz") => self.handle_ready(),

            // Items
            (Method::POST, ITEMS_PATH) => {
                let key = idempotency_key(&req);
                match self.read_body(req).await {
                    Ok(body) => {
                        self.with_idempotency(key.as_deref(), body, |body| self.handle_create(body))
                            .await
                    }
                    Err(e) => error_response(&e),
                }
            }
            (Method::GET, ITEMS_PATH) => self.handle_list(req.uri().query()),
            (_, ITEMS_PATH) => method_not_allowed(),

            // Bulk
            (Method::POST, BULK_PATH) => {
                let key = idempotency_key(&req);
                match self.read_body(req).await {
                    Ok(body) => {
                        self.with_idempotency(key.as_deref(), body, |body| self.handle_bulk(body))
                            .await
                    }
                    Err(e) => error_response(&e),
                }
            }
            (_, BULK_PATH) => method_not_allowed(),
            (Method::GET, BULK_LIMITS_PATH) => ok(&self.services.bulk.limits()),
            (_, BULK_LIMITS_PATH) => method_not_allowed(),

            // Single item
            (Method::GET, p) if p.starts_with(ITEM_PREFIX) => {
                let raw_id = p.strip_prefix(ITEM_PREFIX).unwrap_or("");
                from_result(parse_item_id(raw_id).and_then(|id| self.services.items.get(id)))
            }
            (Method::PATCH, p) if p.starts_with(ITEM_PREFIX) => {
                let raw_id = p.strip_prefix(ITEM_PREFIX).unwrap_or("").to_string();
                match self.read_body(req).await {
                    Ok(body) => self.handle_patch(&raw_id, &body),
                    Err(e) => error_response(&e),
                }
            }
            (_, p) if p.starts_with(ITEM_PREFIX) => method_not_allowed(),

            // Operations
            (Method::GET, IDEMPOTENCY_STATS_PATH) => from_result(self.services.idempotency.stats()),

            _ => route_not_found(),
        }
    }

    /// Collect the body, refusing anything over the configured cap
    async fn read_body<B>(&self, req: Request<B>) -> Result<Bytes, IntakeError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let max = self.max_body_bytes;

        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(size) = declared.filter(|size| *size > max) {
            return Err(IntakeError::PayloadTooLarge { size, max });
        }

        match Limited::new(req.into_body(), max).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(IntakeError::PayloadTooLarge { size: max + 1, max })
            }
            Err(e) => Err(IntakeError::invalid(
                ErrorCode::InvalidBody,
                format!("Failed to read body: {}", e),
            )),
        }
    }

    /// Run `op` at most once per live idempotency token
    ///
    /// Without a token the operation simply runs. With one, the first request runs it
    /// and stores the response; retries with the same body get that response back
    /// byte-for-byte. A 5xx response releases the token instead of storing it.
    async fn with_idempotency<F>(&self, key: Option<&str>, body: Bytes, op: F) -> HttpResponse
    where
        F: FnOnce(&Bytes) -> HttpResponse,
    {
        let Some(key) = key else {
            return op(&body);
        };

        let idempotency = &self.services.idempotency;

        match idempotency.begin(key, &body) {
            Ok(BeginOutcome::Proceed) => {}
            Ok(BeginOutcome::Replay(stored)) => {
                return match StatusCode::from_u16(stored.status) {
                    Ok(status) => {
                        let mut response = json_bytes_response(status, Bytes::from(stored.body));
                        response.headers_mut().insert(
                            HeaderName::from_static(IDEMPOTENCY_REPLAYED_HEADER),
                            HeaderValue::from_static("true"),
                        );
                        response
                    }
                    Err(_) => error_response(&IntakeError::Internal(format!(
                        "Stored status {} is not a valid HTTP status",
                        stored.status
                    ))),
                };
            }
            Ok(BeginOutcome::Conflict(reason)) => {
                return error_response_with(&reason.into_error(), key_extra(key));
            }
            Ok(BeginOutcome::InvalidToken) => {
                let err = IntakeError::invalid(
                    ErrorCode::InvalidIdempotencyKey,
                    "Idempotency-Key must be 1-255 characters of [A-Za-z0-9_-]",
                );
                return error_response_with(&err, key_extra(key));
            }
            Err(e) => return error_response(&e),
        }

        let response = op(&body);
        let (parts, response_body) = response.into_parts();
        let bytes = match response_body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };

        if parts.status.is_server_error() {
            if let Err(e) = idempotency.release(key) {
                error!(key = %key, error = %e, "Failed to release idempotency key");
            }
        } else if let Err(e) = idempotency.complete(key, parts.status.as_u16(), &bytes) {
            error!(key = %key, error = %e, "Failed to store idempotent response");
        }

        Response::from_parts(parts, Full::new(bytes))
    }

    fn handle_ready(&self) -> HttpResponse {
        match self.services.db.ping() {
            Ok(()) => ok(&json!({ "status": "ready" })),
            Err(e) => {
                warn!(error = %e, "Readiness check failed");
                service_unavailable("Database unavailable")
            }
        }
    }

    /// POST /api/v1/items
    fn handle_create(&self, body: &Bytes) -> HttpResponse {
        let result = parse_json(body)
            .and_then(ItemInput::from_value)
            .and_then(|input| self.services.items.create(&input));

        match result {
            Ok(row) => {
                info!(id = row.id, sku = %row.sku, "Created item");
                created(&row)
            }
            Err(e) => error_response(&e),
        }
    }

    /// GET /api/v1/items
    fn handle_list(&self, query: Option<&str>) -> HttpResponse {
        let query: ListQuery = match serde_urlencoded::from_str(query.unwrap_or("")) {
            Ok(query) => query,
            Err(e) => {
                return error_response(&IntakeError::invalid(
                    ErrorCode::InvalidQuery,
                    format!("Invalid query string: {}", e),
                ))
            }
        };
        from_result(self.services.items.list(&query))
    }

    /// PATCH /api/v1/items/{id}
    fn handle_patch(&self, raw_id: &str, body: &Bytes) -> HttpResponse {
        let result = parse_item_id(raw_id).and_then(|id| {
            let patch: ItemPatch = serde_json::from_slice(body).map_err(|e| {
                IntakeError::invalid(ErrorCode::InvalidBody, format!("Invalid update body: {}", e))
            })?;
            self.services.items.update(id, &patch)
        });
        from_result(result)
    }

    /// POST /api/v1/items:bulk
    fn handle_bulk(&self, body: &Bytes) -> HttpResponse {
        match self.services.bulk.bulk_create(body) {
            Ok(outcome) => {
                let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::OK);
                json_response(status, &outcome)
            }
            Err(e) => error_response(&e),
        }
    }
}

fn idempotency_key<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|v| v.to_str().unwrap_or_default().to_string())
}

fn key_extra(key: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("idempotency_key".to_string(), Value::String(key.to_string()));
    extra
}

fn parse_json(body: &Bytes) -> Result<Value, IntakeError> {
    serde_json::from_slice(body).map_err(|e| {
        IntakeError::invalid(ErrorCode::InvalidBody, format!("Invalid JSON body: {}", e))
    })
}
