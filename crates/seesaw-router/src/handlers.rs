use std::convert::Infallible;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::HeaderMap as ReqwestHeaderMap;
use std::sync::atomic::Ordering;
use tokio_stream::wrappers::ReceiverStream;

use crate::server::AppState;
use crate::state::{Backend, ConfigPatch, Decision};

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Constant-time byte comparison so the API key check does not leak
/// prefix length through timing.
fn keys_match(presented: &str, expected: &str) -> bool {
    let a = presented.as_bytes();
    let b = expected.as_bytes();
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(v);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn to_upstream_headers(headers: &HeaderMap) -> ReqwestHeaderMap {
    let mut out = ReqwestHeaderMap::new();
    for (k, v) in headers.iter() {
        let name = k.as_str();
        // Client credentials are for the router, not the backends.
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("authorization")
            || name.eq_ignore_ascii_case("x-api-key")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("keep-alive")
            || name.eq_ignore_ascii_case("transfer-encoding")
            || name.eq_ignore_ascii_case("te")
            || name.eq_ignore_ascii_case("trailer")
            || name.eq_ignore_ascii_case("upgrade")
        {
            continue;
        }
        out.insert(k, v.clone());
    }
    out
}

fn copy_response_headers(src: &ReqwestHeaderMap, dst: &mut Response) {
    for (k, v) in src.iter() {
        let name = k.as_str();
        if name.eq_ignore_ascii_case("transfer-encoding")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("keep-alive")
            || name.eq_ignore_ascii_case("proxy-authenticate")
            || name.eq_ignore_ascii_case("proxy-authorization")
            || name.eq_ignore_ascii_case("te")
            || name.eq_ignore_ascii_case("trailer")
            || name.eq_ignore_ascii_case("upgrade")
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(v.as_bytes()),
        ) {
            dst.headers_mut().insert(name, value);
        }
    }
}

/// Build the streamed response and account the backend's busy time when
/// the body finishes draining.
fn relay_response(
    st: &AppState,
    backend: Backend,
    resp: reqwest::Response,
    request_start: Instant,
) -> Response {
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let resp_headers = resp.headers().clone();

    let mut upstream = resp.bytes_stream();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(64);
    let state = st.state.clone();
    tokio::spawn(async move {
        while let Some(item) = upstream.next().await {
            match item {
                Ok(b) => {
                    if tx.send(Ok(b)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error=%e, backend=%backend.as_str(), "upstream stream ended early");
                    break;
                }
            }
        }
        state.record_gpu_seconds(backend, request_start.elapsed().as_secs_f64());
    });

    let mut out = Response::builder()
        .status(status)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| Response::new(Body::empty()));
    copy_response_headers(&resp_headers, &mut out);
    out
}

struct Target {
    backend: Backend,
    base_url: String,
    bearer_token: Option<String>,
}

async fn send_upstream(
    st: &AppState,
    target: &Target,
    method: &reqwest::Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<reqwest::Response, reqwest::Error> {
    let url = format!("{}{}", target.base_url, path_and_query);
    let mut builder = st
        .http
        .request(method.clone(), url)
        .headers(to_upstream_headers(headers));
    if let Some(token) = target.bearer_token.as_deref() {
        if !token.is_empty() {
            builder = builder.bearer_auth(token);
        }
    }
    if !body.is_empty() {
        builder = builder.body(body.clone());
    }
    builder.send().await
}

/// Fallback handler for every non-admin path. Picks a backend from the
/// current snapshot, forwards the request, and falls back from spot to
/// serverless at most once.
pub async fn proxy(State(st): State<AppState>, req: Request<Body>) -> Response {
    let request_start = Instant::now();

    let method = match reqwest::Method::from_bytes(req.method().as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response(),
    };
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = req.headers().clone();

    if let Some(expected) = st.api_key.as_deref() {
        let ok = presented_key(&headers).is_some_and(|k| keys_match(k, expected));
        if !ok {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }

    // Buffered so the body can be replayed against serverless on fallback.
    let body = match axum::body::to_bytes(req.into_body(), st.max_request_body_bytes).await {
        Ok(b) => b,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        }
    };

    let snap = st.state.snapshot();
    let serverless_target = snap.serverless_url.clone().map(|base_url| Target {
        backend: Backend::Serverless,
        base_url,
        bearer_token: snap.serverless_auth_token.clone(),
    });

    let (target, serverless_fallback) = match snap.decide() {
        Decision::NoBackend => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "no backend available"})),
            )
                .into_response();
        }
        Decision::Spot => (
            Target {
                backend: Backend::Spot,
                base_url: snap.spot_url.clone().unwrap_or_default(),
                bearer_token: None,
            },
            serverless_target,
        ),
        Decision::Serverless => {
            // Spot is configured but not ready yet: nudge it awake and
            // get a fresh readiness reading for the next request.
            if snap.spot_url.is_some() {
                st.metrics.poke_total.fetch_add(1, Ordering::Relaxed);
                st.prober.poke();
                st.prober.trigger();
            }
            match serverless_target {
                Some(t) => (t, None),
                None => {
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(serde_json::json!({"error": "no backend available"})),
                    )
                        .into_response();
                }
            }
        }
    };

    st.state.record_route(target.backend);
    match target.backend {
        Backend::Spot => st.metrics.routed_spot_total.fetch_add(1, Ordering::Relaxed),
        Backend::Serverless => st
            .metrics
            .routed_serverless_total
            .fetch_add(1, Ordering::Relaxed),
    };

    match send_upstream(&st, &target, &method, &path_and_query, &headers, &body).await {
        Ok(resp) if target.backend == Backend::Spot && resp.status().is_server_error() => {
            tracing::warn!(status=%resp.status(), "spot returned 5xx, failing over to serverless");
            st.state
                .set_ready(false, Some(format!("status {}", resp.status().as_u16())));
            fallback_to_serverless(
                &st,
                serverless_fallback,
                &method,
                &path_and_query,
                &headers,
                &body,
                request_start,
            )
            .await
        }
        Ok(resp) => relay_response(&st, target.backend, resp, request_start),
        Err(e) if target.backend == Backend::Spot => {
            tracing::warn!(error=%e, "spot unreachable, failing over to serverless");
            st.state.set_ready(false, Some(e.to_string()));
            fallback_to_serverless(
                &st,
                serverless_fallback,
                &method,
                &path_and_query,
                &headers,
                &body,
                request_start,
            )
            .await
        }
        Err(e) => {
            tracing::error!(error=%e, "serverless upstream request failed");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}

/// Single retry against serverless after a spot failure. Serverless
/// failures here are final.
async fn fallback_to_serverless(
    st: &AppState,
    serverless_target: Option<Target>,
    method: &reqwest::Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &Bytes,
    request_start: Instant,
) -> Response {
    let Some(target) = serverless_target else {
        return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
    };

    st.metrics.fallback_total.fetch_add(1, Ordering::Relaxed);
    st.state.record_route(target.backend);
    st.metrics
        .routed_serverless_total
        .fetch_add(1, Ordering::Relaxed);

    match send_upstream(st, &target, method, path_and_query, headers, body).await {
        Ok(resp) => relay_response(st, target.backend, resp, request_start),
        Err(e) => {
            tracing::error!(error=%e, "serverless fallback failed");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}

/// `GET /router/health`: refresh spot readiness, then report the full
/// routing picture.
pub async fn router_health(State(st): State<AppState>) -> impl IntoResponse {
    st.prober.probe_once().await;
    let snap = st.state.snapshot();
    let stats = st.state.route_stats();
    Json(serde_json::json!({
        "skyserve_ready": snap.spot_ready,
        "last_probe_ts": snap.last_probe_ts.map(|t| t.timestamp_micros() as f64 / 1e6),
        "last_probe_err": snap.last_probe_err,
        "serverless_base_url": snap.serverless_url,
        "skyserve_base_url": snap.spot_url,
        "route_stats": stats,
    }))
}

/// `POST /router/config`: partial patch of backend URLs and the
/// serverless token. A new spot URL kicks off an immediate probe.
pub async fn router_config(
    State(st): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    tracing::info!(
        serverless = patch.serverless_url.as_deref().unwrap_or("-"),
        spot = patch.spot_url.as_deref().unwrap_or("-"),
        "router config updated"
    );
    let probe_now = patch.spot_url.is_some();
    st.state.apply(&patch);
    if probe_now {
        st.prober.trigger();
    }
    Json(serde_json::json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match_constant_time_shape() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secret2"));
        assert!(!keys_match("", "secret"));
        assert!(keys_match("", ""));
    }

    #[test]
    fn test_upstream_headers_strip_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("x-api-key", HeaderValue::from_static("k"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("host", HeaderValue::from_static("router.local"));
        let out = to_upstream_headers(&headers);
        assert!(out.get("authorization").is_none());
        assert!(out.get("x-api-key").is_none());
        assert!(out.get("host").is_none());
        assert_eq!(out.get("content-type").unwrap(), "application/json");
    }
}
