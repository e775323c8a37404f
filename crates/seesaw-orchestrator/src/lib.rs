//! Deployment orchestration: validation and planning, the parallel
//! two-backend launch, the embedded routing proxy, and the persistent
//! deployment record store.

pub mod coordinator;
pub mod launch;
pub mod planner;
pub mod store;

pub use coordinator::{ActiveDeployment, Coordinator, DeployOptions};
pub use launch::{launch_backends, teardown, LaunchOutcome, SpotHandle};
pub use planner::LaunchPlan;
pub use store::{DeploymentRecord, Store};
