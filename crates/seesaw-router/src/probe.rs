//! Spot readiness prober. A background loop ticks every `interval` and
//! GETs the spot health path; request handlers can trigger an extra
//! probe or fire a cheap poke. All triggers collapse into at most one
//! outstanding probe at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::state::RoutingState;

pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(250);
const POKE_TIMEOUT: Duration = Duration::from_millis(300);
const POKE_MIN_GAP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Background tick. Floored at 250ms to keep a misconfigured router
    /// from hammering the spot endpoint.
    pub interval: Duration,
    /// Per-probe request timeout, at most 1s so a hung endpoint cannot
    /// stall the loop.
    pub timeout: Duration,
    /// Health path appended to the spot base URL.
    pub ready_path: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            ready_path: "/health".to_string(),
        }
    }
}

impl ProbeConfig {
    fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_PROBE_INTERVAL)
    }

    fn effective_timeout(&self) -> Duration {
        self.timeout.min(Duration::from_secs(1))
    }
}

pub struct Prober {
    state: Arc<RoutingState>,
    http: reqwest::Client,
    cfg: ProbeConfig,
    cancel: CancellationToken,
    in_flight: AtomicBool,
    last_probe_at: Mutex<Option<Instant>>,
    last_poke_at: Mutex<Option<Instant>>,
}

impl Prober {
    pub fn new(state: Arc<RoutingState>, cfg: ProbeConfig) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.effective_timeout())
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            state,
            http,
            cfg,
            cancel: CancellationToken::new(),
            in_flight: AtomicBool::new(false),
            last_probe_at: Mutex::new(None),
            last_poke_at: Mutex::new(None),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Background loop. Runs until the cancellation token fires; idles
    /// (ticks without probing) while no spot URL is configured.
    pub async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.cfg.effective_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("prober stopped");
                    return;
                }
                _ = tick.tick() => {
                    self.probe_once().await;
                }
            }
        }
    }

    /// One probe attempt. Returns the readiness it observed, or `None`
    /// when the probe was skipped (no spot URL, another probe in flight,
    /// or too soon after the previous one).
    pub async fn probe_once(&self) -> Option<bool> {
        let snap = self.state.snapshot();
        let spot_url = snap.spot_url?;

        // Collapse concurrent triggers: one outstanding probe, spaced at
        // least the minimum interval apart.
        {
            let mut last = self.last_probe_at.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < MIN_PROBE_INTERVAL {
                    return None;
                }
            }
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return None;
            }
            *last = Some(Instant::now());
        }

        let url = format!("{}{}", spot_url, self.cfg.ready_path);
        let result = self.http.get(&url).send().await;
        let ready = match result {
            Ok(resp) if resp.status().is_success() => {
                self.state.set_ready(true, None);
                true
            }
            Ok(resp) => {
                self.state
                    .set_ready(false, Some(format!("status {}", resp.status().as_u16())));
                false
            }
            Err(e) => {
                tracing::debug!(url=%url, error=%e, "spot probe failed");
                self.state.set_ready(false, Some(e.to_string()));
                false
            }
        };

        self.in_flight.store(false, Ordering::Release);
        Some(ready)
    }

    /// Detached probe for request-path triggers; never blocks the caller.
    pub fn trigger(self: &Arc<Self>) {
        let prober = Arc::clone(self);
        tokio::spawn(async move {
            prober.probe_once().await;
        });
    }

    /// Fire-and-forget wake-up GET at the spot endpoint, used when a
    /// request falls back to serverless while spot is still warming.
    /// Rate-limited; the response is ignored entirely.
    pub fn poke(&self) {
        let snap = self.state.snapshot();
        let Some(spot_url) = snap.spot_url else {
            return;
        };
        {
            let mut last = self.last_poke_at.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < POKE_MIN_GAP {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        let url = format!("{}{}", spot_url, self.cfg.ready_path);
        let http = self.http.clone();
        tokio::spawn(async move {
            let _ = http.get(&url).timeout(POKE_TIMEOUT).send().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_floor_and_timeout_cap() {
        let cfg = ProbeConfig {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(30),
            ready_path: "/health".to_string(),
        };
        assert_eq!(cfg.effective_interval(), MIN_PROBE_INTERVAL);
        assert_eq!(cfg.effective_timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_probe_skips_without_spot_url() {
        let state = Arc::new(RoutingState::new());
        let prober = Prober::new(state, ProbeConfig::default());
        assert_eq!(prober.probe_once().await, None);
    }
}
