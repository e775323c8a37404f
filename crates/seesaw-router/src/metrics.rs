use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::server::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub routed_spot_total: AtomicU64,
    pub routed_serverless_total: AtomicU64,
    pub fallback_total: AtomicU64,
    pub poke_total: AtomicU64,
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let m = &st.metrics;
    let body = format!(
        "seesaw_router_requests_total {}\n\
         seesaw_router_requests_inflight {}\n\
         seesaw_router_responses_2xx {}\n\
         seesaw_router_responses_4xx {}\n\
         seesaw_router_responses_5xx {}\n\
         seesaw_router_routed_spot_total {}\n\
         seesaw_router_routed_serverless_total {}\n\
         seesaw_router_fallback_total {}\n\
         seesaw_router_poke_total {}\n",
        m.requests_total.load(Ordering::Relaxed),
        m.requests_inflight.load(Ordering::Relaxed),
        m.status_2xx.load(Ordering::Relaxed),
        m.status_4xx.load(Ordering::Relaxed),
        m.status_5xx.load(Ordering::Relaxed),
        m.routed_spot_total.load(Ordering::Relaxed),
        m.routed_serverless_total.load(Ordering::Relaxed),
        m.fallback_total.load(Ordering::Relaxed),
        m.poke_total.load(Ordering::Relaxed),
    );
    (axum::http::StatusCode::OK, body)
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    Ok(resp)
}
