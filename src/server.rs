// ===============================
// src/server.rs (HTTP: /price, /resolve, /metrics, /health)
// ===============================
//
//   curl -s -H 'X-Api-Key: <key>' --data-binary @inventory.txt localhost:9898/price
//   curl -s --data-binary @inventory.txt localhost:9898/resolve
//   curl -s localhost:9898/metrics
//
// Credential per request dari header X-Api-Key; tidak disimpan, tidak di-log.
//
use hyper::{
    header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::Serialize;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

use crate::domain::Credential;
use crate::metrics::encode_metrics;
use crate::pipeline::Pipeline;

pub const API_KEY_HEADER: &str = "x-api-key";
const MAX_BODY_BYTES: u64 = 1 << 20;

fn reply(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut rsp = Response::new(body.into());
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    rsp
}

fn json_reply<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => reply(status, "application/json", bytes),
        Err(e) => {
            error!(?e, "serialize response failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "serialize error")
        }
    }
}

fn error_reply(status: StatusCode, message: &str) -> Response<Body> {
    json_reply(status, &serde_json::json!({ "error": message }))
}

async fn read_text(req: Request<Body>) -> Result<String, Response<Body>> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|n| n > MAX_BODY_BYTES) {
        return Err(error_reply(StatusCode::PAYLOAD_TOO_LARGE, "body too large"));
    }
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|_| error_reply(StatusCode::BAD_REQUEST, "cannot read body"))?;
    if bytes.len() as u64 > MAX_BODY_BYTES {
        return Err(error_reply(StatusCode::PAYLOAD_TOO_LARGE, "body too large"));
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| error_reply(StatusCode::BAD_REQUEST, "body is not UTF-8"))
}

async fn price(req: Request<Body>, pipeline: Arc<Pipeline>) -> Response<Body> {
    let credential = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::new);
    let Some(credential) = credential else {
        return error_reply(StatusCode::BAD_REQUEST, "missing X-Api-Key header");
    };
    let text = match read_text(req).await {
        Ok(t) => t,
        Err(rsp) => return rsp,
    };
    let report = pipeline.run(&text, &credential).await;
    json_reply(StatusCode::OK, &report)
}

async fn resolve(req: Request<Body>, pipeline: Arc<Pipeline>) -> Response<Body> {
    let text = match read_text(req).await {
        Ok(t) => t,
        Err(rsp) => return rsp,
    };
    let res = pipeline.resolver().resolve_text(&text);
    json_reply(StatusCode::OK, &serde_json::json!({ "resolutions": res.items, "skipped_lines": res.skipped }))
}

pub async fn handle(req: Request<Body>, pipeline: Arc<Pipeline>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let rsp = match (&method, path.as_str()) {
        (&Method::GET, "/health") => reply(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, "/metrics") => reply(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", encode_metrics()),
        (&Method::POST, "/price") => price(req, pipeline).await,
        (&Method::POST, "/resolve") => resolve(req, pipeline).await,
        (_, "/price" | "/resolve" | "/metrics" | "/health") => {
            error_reply(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => error_reply(StatusCode::NOT_FOUND, "not found"),
    };
    if rsp.status().is_client_error() {
        warn!(%method, %path, status = rsp.status().as_u16(), "request rejected");
    }
    rsp
}

pub async fn serve(addr: SocketAddr, pipeline: Arc<Pipeline>) -> hyper::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let pipeline = pipeline.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let pipeline = pipeline.clone();
                async move { Ok::<_, Infallible>(handle(req, pipeline).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "price service listening (POST /price, POST /resolve, GET /metrics)");
    server
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}
