pub mod catalog;
pub mod error;
pub mod model;
pub mod telemetry;
pub mod template;

pub use error::Error;
pub use model::{
    ColdStartMode, DeployRequest, DeployStatus, DeploymentResult, HybridDeployment, ProviderPlan,
    ScalingPolicy, ServerlessScaling, SpotScaling,
};
