//! Adaptive routing proxy: one public endpoint in front of a fast
//! serverless backend and a cheap spot backend, preferring spot
//! whenever its health probe says it is up.

pub mod handlers;
pub mod metrics;
pub mod probe;
pub mod server;
pub mod state;

pub use probe::{ProbeConfig, Prober};
pub use server::{build, serve, AppState, RouterConfig};
pub use state::{Backend, ConfigPatch, Decision, RouteStats, RoutingState, StateSnapshot};
