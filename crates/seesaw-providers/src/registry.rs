//! Name-keyed provider lookup. Adding a provider means adding one arm
//! here; the orchestrator, prober, and proxy never change.

use std::sync::Arc;

use seesaw_common::Error;

use crate::modal::ModalProvider;
use crate::runpod::RunPodProvider;
use crate::skyserve::SkyServeProvider;

pub const PROVIDER_NAMES: &[&str] = &["modal", "runpod", "skyserve"];

/// Instantiate a provider by name.
pub fn get(name: &str) -> Result<Arc<dyn crate::Provider>, Error> {
    match name {
        "modal" => Ok(Arc::new(ModalProvider)),
        "runpod" => Ok(Arc::new(RunPodProvider::from_env())),
        "skyserve" => Ok(Arc::new(SkyServeProvider)),
        other => Err(Error::Config(format!(
            "unknown provider '{}', available: {}",
            other,
            PROVIDER_NAMES.join(", ")
        ))),
    }
}

pub fn names() -> &'static [&'static str] {
    PROVIDER_NAMES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers_resolve() {
        for name in PROVIDER_NAMES {
            let provider = get(name).unwrap();
            assert_eq!(provider.name(), *name);
        }
    }

    #[test]
    fn test_unknown_provider_lists_available() {
        let Err(err) = get("lambda") else {
            panic!("unknown provider resolved");
        };
        assert!(err.to_string().contains("modal, runpod, skyserve"));
    }
}
