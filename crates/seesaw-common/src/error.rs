use thiserror::Error;

/// Error taxonomy for the whole workspace.
///
/// The split matters for propagation: `Config` and `Validation` are caught
/// before any deploy and surfaced immediately; `ProviderDeploy` is recovered
/// locally (the other backend keeps the deployment alive); `Probe` never
/// escalates past the routing state; `Teardown` is an aggregate that never
/// aborts remaining cleanup steps.
#[derive(Debug, Error)]
pub enum Error {
    /// Request is incompatible with a provider's capabilities.
    #[error("config error: {0}")]
    Config(String),

    /// Request failed catalog/shape validation before any provider was invoked.
    #[error("validation error: {0}")]
    Validation(String),

    /// One backend's deploy failed. Isolated per backend.
    #[error("{provider} deploy failed: {reason}")]
    ProviderDeploy { provider: String, reason: String },

    /// A health probe failed. Transient and expected.
    #[error("probe failed: {0}")]
    Probe(String),

    /// The chosen upstream was unreachable mid-request.
    #[error("upstream request failed: {0}")]
    ProxyUpstream(String),

    /// Partial teardown failures, collected across components.
    #[error("teardown errors: {}", format_teardown(.0))]
    Teardown(Vec<(String, String)>),

    /// A template placeholder could not be resolved.
    #[error("template error: {0}")]
    Template(String),

    /// Deployment record store failure.
    #[error("state store error: {0}")]
    Store(String),
}

fn format_teardown(errors: &[(String, String)]) -> String {
    errors
        .iter()
        .map(|(component, msg)| format!("{component}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_error_formats_all_components() {
        let err = Error::Teardown(vec![
            ("spot".to_string(), "sky serve down failed".to_string()),
            ("serverless".to_string(), "app not found".to_string()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("spot: sky serve down failed"));
        assert!(msg.contains("serverless: app not found"));
    }
}
