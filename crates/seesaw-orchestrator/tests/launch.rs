//! Launch executor behavior with scripted in-test providers: failure
//! isolation between the two legs and teardown error aggregation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use seesaw_common::{DeployRequest, DeploymentResult, Error, ProviderPlan};
use seesaw_orchestrator::launch::{launch_backends, teardown};
use seesaw_providers::Provider;

/// Provider whose deploy outcome and latency are fixed up front.
struct ScriptedProvider {
    name: &'static str,
    delay: Duration,
    fail_deploy: Option<&'static str>,
    fail_destroy: Option<&'static str>,
    destroy_calls: Arc<AtomicU64>,
}

impl ScriptedProvider {
    fn ok(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            fail_deploy: None,
            fail_destroy: None,
            destroy_calls: Arc::new(AtomicU64::new(0)),
        })
    }

    fn failing(name: &'static str, reason: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: Duration::ZERO,
            fail_deploy: Some(reason),
            fail_destroy: None,
            destroy_calls: Arc::new(AtomicU64::new(0)),
        })
    }

    fn failing_destroy(name: &'static str, reason: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay: Duration::ZERO,
            fail_deploy: None,
            fail_destroy: Some(reason),
            destroy_calls: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn plan(&self, _request: &DeployRequest, _vllm_cmd: &str) -> Result<ProviderPlan, Error> {
        Ok(ProviderPlan {
            provider: self.name.to_string(),
            rendered_script: String::new(),
            env: HashMap::new(),
            metadata: HashMap::new(),
        })
    }

    async fn deploy(&self, _plan: &ProviderPlan) -> DeploymentResult {
        tokio::time::sleep(self.delay).await;
        match self.fail_deploy {
            Some(reason) => DeploymentResult::failed(self.name, reason),
            None => DeploymentResult {
                provider: self.name.to_string(),
                endpoint_url: Some(format!("http://{}.example", self.name)),
                health_url: Some(format!("http://{}.example/health", self.name)),
                ..Default::default()
            },
        }
    }

    async fn status(&self, _service_name: &str) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn destroy(&self, _result: &DeploymentResult) -> Result<(), Error> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_destroy {
            Some(reason) => Err(Error::Teardown(vec![(
                self.name.to_string(),
                reason.to_string(),
            )])),
            None => Ok(()),
        }
    }
}

fn empty_plan(name: &str) -> ProviderPlan {
    ProviderPlan {
        provider: name.to_string(),
        rendered_script: String::new(),
        env: HashMap::new(),
        metadata: HashMap::new(),
    }
}

#[tokio::test]
async fn test_both_legs_launch_in_parallel() {
    // Sequential execution would take 400ms; parallel stays near 200ms.
    let serverless = ScriptedProvider::ok("modal", Duration::from_millis(200));
    let spot = ScriptedProvider::ok("skyserve", Duration::from_millis(200));

    let start = std::time::Instant::now();
    let outcome = launch_backends(
        serverless,
        empty_plan("modal"),
        Some((spot as Arc<dyn Provider>, empty_plan("skyserve"))),
        Duration::from_secs(5),
    )
    .await;
    assert!(outcome.serverless.ok());
    let spot_result = outcome.spot.unwrap().wait().await;
    assert!(spot_result.ok());
    assert!(start.elapsed() < Duration::from_millis(390));
}

#[tokio::test]
async fn test_serverless_failure_does_not_stop_spot() {
    let serverless = ScriptedProvider::failing("modal", "quota exceeded");
    let spot = ScriptedProvider::ok("skyserve", Duration::from_millis(100));

    let outcome = launch_backends(
        serverless,
        empty_plan("modal"),
        Some((spot as Arc<dyn Provider>, empty_plan("skyserve"))),
        Duration::from_secs(5),
    )
    .await;
    assert!(!outcome.serverless.ok());
    assert_eq!(outcome.serverless.error.as_deref(), Some("quota exceeded"));

    let spot_result = outcome.spot.unwrap().wait().await;
    assert!(spot_result.ok());
    assert_eq!(
        spot_result.endpoint_url.as_deref(),
        Some("http://skyserve.example")
    );
}

#[tokio::test]
async fn test_serverless_timeout_degrades_without_aborting_spot() {
    let serverless = ScriptedProvider::ok("modal", Duration::from_secs(30));
    let spot = ScriptedProvider::ok("skyserve", Duration::from_millis(50));

    let outcome = launch_backends(
        serverless,
        empty_plan("modal"),
        Some((spot as Arc<dyn Provider>, empty_plan("skyserve"))),
        Duration::from_millis(200),
    )
    .await;
    assert!(!outcome.serverless.ok());
    assert!(outcome
        .serverless
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));

    let spot_result = outcome.spot.unwrap().wait().await;
    assert!(spot_result.ok());
}

#[tokio::test]
async fn test_teardown_collects_all_failures() {
    let a = ScriptedProvider::failing_destroy("modal", "app not found");
    let b = ScriptedProvider::ok("skyserve", Duration::ZERO);
    let c = ScriptedProvider::failing_destroy("runpod", "endpoint busy");

    let a_calls = a.destroy_calls.clone();
    let b_calls = b.destroy_calls.clone();
    let c_calls = c.destroy_calls.clone();

    let result = teardown(vec![
        (a as Arc<dyn Provider>, DeploymentResult::default()),
        (b as Arc<dyn Provider>, DeploymentResult::default()),
        (c as Arc<dyn Provider>, DeploymentResult::default()),
    ])
    .await;

    // Every backend was attempted despite the failures.
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(c_calls.load(Ordering::SeqCst), 1);

    let err = result.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("modal: app not found"));
    assert!(msg.contains("runpod: endpoint busy"));
    assert!(!msg.contains("skyserve"));
}
