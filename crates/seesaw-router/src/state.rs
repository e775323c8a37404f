//! Shared routing state. One coarse mutex guards everything; every
//! access is a short critical section (copy in, copy out), so a single
//! lock is plenty at proxy request rates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ROUTE_WINDOW: usize = 200;

/// Which backend a request was (or would be) sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Serverless,
    Spot,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Serverless => "serverless",
            Backend::Spot => "spot",
        }
    }
}

/// Routing decision derived from a snapshot. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Spot,
    Serverless,
    NoBackend,
}

/// Partial update pushed by the coordinator (or an operator) through
/// `POST /router/config`. Absent fields leave current values untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless_auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_url: Option<String>,
}

/// Consistent point-in-time copy of the routable fields.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub serverless_url: Option<String>,
    pub serverless_auth_token: Option<String>,
    pub spot_url: Option<String>,
    pub spot_ready: bool,
    pub last_probe_ts: Option<DateTime<Utc>>,
    pub last_probe_err: Option<String>,
}

impl StateSnapshot {
    /// The one routing rule: spot when configured and ready, otherwise
    /// serverless when configured, otherwise nothing to route to.
    pub fn decide(&self) -> Decision {
        if self.spot_url.is_some() && self.spot_ready {
            return Decision::Spot;
        }
        if self.serverless_url.is_some() {
            return Decision::Serverless;
        }
        Decision::NoBackend
    }
}

/// Aggregate routing statistics reported by `GET /router/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStats {
    pub total: u64,
    pub spot: u64,
    pub serverless: u64,
    pub pct_spot: f64,
    pub pct_serverless: f64,
    pub window_size: usize,
    pub window_spot: usize,
    pub window_serverless: usize,
    pub gpu_seconds_spot: f64,
    pub gpu_seconds_serverless: f64,
    pub uptime_seconds: f64,
    pub spot_ready_seconds: f64,
}

#[derive(Debug, Default)]
struct Inner {
    serverless_url: Option<String>,
    serverless_auth_token: Option<String>,
    spot_url: Option<String>,
    spot_ready: bool,
    ready_since: Option<Instant>,
    spot_ready_seconds: f64,
    last_probe_ts: Option<DateTime<Utc>>,
    last_probe_err: Option<String>,
    routes_total: u64,
    routes_spot: u64,
    routes_serverless: u64,
    window: VecDeque<Backend>,
    gpu_seconds_spot: f64,
    gpu_seconds_serverless: f64,
}

#[derive(Debug)]
pub struct RoutingState {
    inner: Mutex<Inner>,
    started_at: Instant,
}

impl Default for RoutingState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        StateSnapshot {
            serverless_url: inner.serverless_url.clone(),
            serverless_auth_token: inner.serverless_auth_token.clone(),
            spot_url: inner.spot_url.clone(),
            spot_ready: inner.spot_ready,
            last_probe_ts: inner.last_probe_ts,
            last_probe_err: inner.last_probe_err.clone(),
        }
    }

    /// Merge a partial patch. Field-wise: an absent field never clobbers
    /// a present value, and re-applying the same patch is a no-op.
    pub fn apply(&self, patch: &ConfigPatch) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(url) = &patch.serverless_url {
            inner.serverless_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(token) = &patch.serverless_auth_token {
            inner.serverless_auth_token = Some(token.clone());
        }
        if let Some(url) = &patch.spot_url {
            let url = url.trim_end_matches('/').to_string();
            if inner.spot_url.as_deref() != Some(url.as_str()) {
                // New spot target starts unready until a probe confirms it.
                inner.spot_ready = false;
                inner.ready_since = None;
            }
            inner.spot_url = Some(url);
        }
    }

    /// Record a probe outcome. Ready-seconds accumulate across
    /// ready→unready transitions.
    pub fn set_ready(&self, ready: bool, err: Option<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        match (inner.spot_ready, ready) {
            (false, true) => inner.ready_since = Some(now),
            (true, false) => {
                if let Some(since) = inner.ready_since.take() {
                    inner.spot_ready_seconds += now.duration_since(since).as_secs_f64();
                }
            }
            _ => {}
        }
        inner.spot_ready = ready;
        inner.last_probe_ts = Some(Utc::now());
        inner.last_probe_err = err;
    }

    pub fn record_route(&self, backend: Backend) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.routes_total += 1;
        match backend {
            Backend::Spot => inner.routes_spot += 1,
            Backend::Serverless => inner.routes_serverless += 1,
        }
        if inner.window.len() == ROUTE_WINDOW {
            inner.window.pop_front();
        }
        inner.window.push_back(backend);
    }

    pub fn record_gpu_seconds(&self, backend: Backend, seconds: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match backend {
            Backend::Spot => inner.gpu_seconds_spot += seconds,
            Backend::Serverless => inner.gpu_seconds_serverless += seconds,
        }
    }

    pub fn route_stats(&self) -> RouteStats {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let total = inner.routes_total;
        let pct = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };
        let window_spot = inner.window.iter().filter(|b| **b == Backend::Spot).count();
        let mut ready_seconds = inner.spot_ready_seconds;
        if let Some(since) = inner.ready_since {
            ready_seconds += since.elapsed().as_secs_f64();
        }
        RouteStats {
            total,
            spot: inner.routes_spot,
            serverless: inner.routes_serverless,
            pct_spot: pct(inner.routes_spot),
            pct_serverless: pct(inner.routes_serverless),
            window_size: inner.window.len(),
            window_spot,
            window_serverless: inner.window.len() - window_spot,
            gpu_seconds_spot: inner.gpu_seconds_spot,
            gpu_seconds_serverless: inner.gpu_seconds_serverless,
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            spot_ready_seconds: ready_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_ladder() {
        let state = RoutingState::new();
        assert_eq!(state.snapshot().decide(), Decision::NoBackend);

        state.apply(&ConfigPatch {
            serverless_url: Some("http://sls.example/".to_string()),
            ..Default::default()
        });
        assert_eq!(state.snapshot().decide(), Decision::Serverless);

        state.apply(&ConfigPatch {
            spot_url: Some("http://spot.example".to_string()),
            ..Default::default()
        });
        // Configured but not yet confirmed ready.
        assert_eq!(state.snapshot().decide(), Decision::Serverless);

        state.set_ready(true, None);
        assert_eq!(state.snapshot().decide(), Decision::Spot);

        state.set_ready(false, Some("connect refused".to_string()));
        assert_eq!(state.snapshot().decide(), Decision::Serverless);
    }

    #[test]
    fn test_patch_does_not_clobber() {
        let state = RoutingState::new();
        state.apply(&ConfigPatch {
            serverless_url: Some("http://sls.example".to_string()),
            serverless_auth_token: Some("tok".to_string()),
            ..Default::default()
        });
        state.apply(&ConfigPatch {
            spot_url: Some("http://spot.example".to_string()),
            ..Default::default()
        });
        let snap = state.snapshot();
        assert_eq!(snap.serverless_url.as_deref(), Some("http://sls.example"));
        assert_eq!(snap.serverless_auth_token.as_deref(), Some("tok"));
        assert_eq!(snap.spot_url.as_deref(), Some("http://spot.example"));
    }

    #[test]
    fn test_patch_idempotent_and_trims_slash() {
        let state = RoutingState::new();
        let patch = ConfigPatch {
            spot_url: Some("http://spot.example/".to_string()),
            ..Default::default()
        };
        state.apply(&patch);
        state.set_ready(true, None);
        // Re-applying the identical patch must not reset readiness.
        state.apply(&patch);
        let snap = state.snapshot();
        assert_eq!(snap.spot_url.as_deref(), Some("http://spot.example"));
        assert!(snap.spot_ready);
    }

    #[test]
    fn test_new_spot_url_resets_readiness() {
        let state = RoutingState::new();
        state.apply(&ConfigPatch {
            spot_url: Some("http://a.example".to_string()),
            ..Default::default()
        });
        state.set_ready(true, None);
        state.apply(&ConfigPatch {
            spot_url: Some("http://b.example".to_string()),
            ..Default::default()
        });
        assert!(!state.snapshot().spot_ready);
    }

    #[test]
    fn test_route_window_caps_at_200() {
        let state = RoutingState::new();
        for _ in 0..250 {
            state.record_route(Backend::Serverless);
        }
        for _ in 0..10 {
            state.record_route(Backend::Spot);
        }
        let stats = state.route_stats();
        assert_eq!(stats.total, 260);
        assert_eq!(stats.window_size, 200);
        assert_eq!(stats.window_spot, 10);
        assert_eq!(stats.window_serverless, 190);
    }

    #[test]
    fn test_gpu_seconds_accumulate() {
        let state = RoutingState::new();
        state.record_gpu_seconds(Backend::Spot, 1.5);
        state.record_gpu_seconds(Backend::Spot, 0.5);
        state.record_gpu_seconds(Backend::Serverless, 2.0);
        let stats = state.route_stats();
        assert!((stats.gpu_seconds_spot - 2.0).abs() < 1e-9);
        assert!((stats.gpu_seconds_serverless - 2.0).abs() < 1e-9);
    }
}
