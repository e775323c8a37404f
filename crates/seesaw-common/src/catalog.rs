//! GPU pricing catalog: single source of truth for GPU specs, provider
//! mappings, and serverless/spot pricing used by provider selection.

use crate::error::Error;

/// Hardware facts for a GPU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuSpec {
    pub short_name: &'static str,
    pub full_name: &'static str,
    pub vram_gb: u32,
    pub arch: &'static str,
}

/// One GPU offering from one serverless provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderGpu {
    pub gpu: &'static str,
    pub provider: &'static str,
    /// Provider-specific ID (e.g. "NVIDIA L4" for RunPod).
    pub provider_gpu_id: &'static str,
    /// USD per GPU-hour; 0.0 means unknown/not listed.
    pub price_per_gpu_hour: f64,
    /// Empty slice = available in all regions.
    pub regions: &'static [&'static str],
}

/// Reference spot price per GPU-hour, used for the savings view.
#[derive(Debug, Clone, Copy)]
pub struct SpotPrice {
    pub gpu: &'static str,
    pub cloud: &'static str,
    pub price_per_gpu_hour: f64,
    pub instance_type: &'static str,
}

pub const GPU_SPECS: &[GpuSpec] = &[
    GpuSpec { short_name: "T4", full_name: "NVIDIA T4", vram_gb: 16, arch: "turing" },
    GpuSpec { short_name: "A10G", full_name: "NVIDIA A10G", vram_gb: 24, arch: "ampere" },
    GpuSpec { short_name: "L4", full_name: "NVIDIA L4", vram_gb: 24, arch: "ada" },
    GpuSpec { short_name: "A40", full_name: "NVIDIA A40", vram_gb: 48, arch: "ampere" },
    GpuSpec { short_name: "L40S", full_name: "NVIDIA L40S", vram_gb: 48, arch: "ada" },
    GpuSpec { short_name: "RTX4090", full_name: "NVIDIA GeForce RTX 4090", vram_gb: 24, arch: "ada" },
    GpuSpec { short_name: "A100_40GB", full_name: "NVIDIA A100 40GB", vram_gb: 40, arch: "ampere" },
    GpuSpec { short_name: "A100_80GB", full_name: "NVIDIA A100 80GB SXM", vram_gb: 80, arch: "ampere" },
    GpuSpec { short_name: "H100", full_name: "NVIDIA H100 80GB HBM3", vram_gb: 80, arch: "hopper" },
    GpuSpec { short_name: "H200", full_name: "NVIDIA H200", vram_gb: 141, arch: "hopper" },
    GpuSpec { short_name: "B200", full_name: "NVIDIA B200", vram_gb: 192, arch: "blackwell" },
];

const GPU_ALIASES: &[(&str, &str)] = &[
    // RunPod's "A100" is the 80GB variant.
    ("A100", "A100_80GB"),
    ("4090", "RTX4090"),
];

const PROVIDER_GPUS: &[ProviderGpu] = &[
    // Modal
    ProviderGpu { gpu: "T4", provider: "modal", provider_gpu_id: "T4", price_per_gpu_hour: 0.59, regions: &[] },
    ProviderGpu { gpu: "A10G", provider: "modal", provider_gpu_id: "A10G", price_per_gpu_hour: 1.10, regions: &[] },
    ProviderGpu { gpu: "L4", provider: "modal", provider_gpu_id: "L4", price_per_gpu_hour: 0.80, regions: &[] },
    ProviderGpu { gpu: "A40", provider: "modal", provider_gpu_id: "A40", price_per_gpu_hour: 1.10, regions: &[] },
    ProviderGpu { gpu: "L40S", provider: "modal", provider_gpu_id: "L40S", price_per_gpu_hour: 1.60, regions: &[] },
    ProviderGpu { gpu: "A100_40GB", provider: "modal", provider_gpu_id: "A100_40GB", price_per_gpu_hour: 1.82, regions: &[] },
    ProviderGpu { gpu: "A100_80GB", provider: "modal", provider_gpu_id: "A100_80GB", price_per_gpu_hour: 2.78, regions: &[] },
    ProviderGpu { gpu: "H100", provider: "modal", provider_gpu_id: "H100", price_per_gpu_hour: 3.95, regions: &[] },
    ProviderGpu { gpu: "B200", provider: "modal", provider_gpu_id: "B200", price_per_gpu_hour: 5.49, regions: &[] },
    // RunPod serverless, prices converted from per-second to per-hour.
    ProviderGpu { gpu: "L4", provider: "runpod", provider_gpu_id: "NVIDIA L4", price_per_gpu_hour: 2.74, regions: &[] },
    ProviderGpu { gpu: "RTX4090", provider: "runpod", provider_gpu_id: "NVIDIA GeForce RTX 4090", price_per_gpu_hour: 1.01, regions: &[] },
    ProviderGpu { gpu: "L40S", provider: "runpod", provider_gpu_id: "NVIDIA L40S", price_per_gpu_hour: 1.58, regions: &[] },
    ProviderGpu { gpu: "A40", provider: "runpod", provider_gpu_id: "NVIDIA A40", price_per_gpu_hour: 0.79, regions: &[] },
    ProviderGpu { gpu: "A100_80GB", provider: "runpod", provider_gpu_id: "NVIDIA A100-SXM4-80GB", price_per_gpu_hour: 1.12, regions: &[] },
    ProviderGpu { gpu: "H100", provider: "runpod", provider_gpu_id: "NVIDIA H100 80GB HBM3", price_per_gpu_hour: 4.97, regions: &[] },
    ProviderGpu { gpu: "H200", provider: "runpod", provider_gpu_id: "NVIDIA H200", price_per_gpu_hour: 0.0, regions: &[] },
    ProviderGpu { gpu: "B200", provider: "runpod", provider_gpu_id: "NVIDIA B200", price_per_gpu_hour: 0.0, regions: &[] },
];

/// Cheapest single-GPU spot offerings, snapshotted from the SkyPilot catalog.
const SPOT_PRICES: &[SpotPrice] = &[
    SpotPrice { gpu: "T4", cloud: "aws", price_per_gpu_hour: 0.16, instance_type: "g4dn.xlarge" },
    SpotPrice { gpu: "A10G", cloud: "aws", price_per_gpu_hour: 0.34, instance_type: "g5.xlarge" },
    SpotPrice { gpu: "L4", cloud: "aws", price_per_gpu_hour: 0.28, instance_type: "g6.xlarge" },
    SpotPrice { gpu: "L40S", cloud: "aws", price_per_gpu_hour: 0.63, instance_type: "g6e.xlarge" },
    SpotPrice { gpu: "A100_80GB", cloud: "aws", price_per_gpu_hour: 1.22, instance_type: "p4de.24xlarge" },
    SpotPrice { gpu: "H100", cloud: "aws", price_per_gpu_hour: 2.11, instance_type: "p5.4xlarge" },
];

/// Resolve aliases to the canonical short name.
pub fn normalize_gpu_name(name: &str) -> Result<String, Error> {
    if GPU_SPECS.iter().any(|s| s.short_name == name) {
        return Ok(name.to_string());
    }
    if let Some((_, canonical)) = GPU_ALIASES.iter().find(|(alias, _)| *alias == name) {
        return Ok(canonical.to_string());
    }
    Err(Error::Validation(format!(
        "unknown GPU type '{name}', known: {}",
        GPU_SPECS.iter().map(|s| s.short_name).collect::<Vec<_>>().join(", ")
    )))
}

pub fn get_gpu_spec(name: &str) -> Option<&'static GpuSpec> {
    GPU_SPECS.iter().find(|s| s.short_name == name)
}

/// Provider-specific GPU identifier, or a `Config` error naming the
/// supported GPUs when this provider has no such offering.
pub fn provider_gpu_id(gpu: &str, provider: &str) -> Result<&'static str, Error> {
    PROVIDER_GPUS
        .iter()
        .find(|e| e.gpu == gpu && e.provider == provider)
        .map(|e| e.provider_gpu_id)
        .ok_or_else(|| {
            let mut supported: Vec<&str> = PROVIDER_GPUS
                .iter()
                .filter(|e| e.provider == provider)
                .map(|e| e.gpu)
                .collect();
            supported.sort_unstable();
            Error::Config(format!(
                "no {provider} offering for GPU '{gpu}', supported: {}",
                supported.join(", ")
            ))
        })
}

/// Region availability for a GPU on a provider. Empty = all regions.
pub fn provider_regions(gpu: &str, provider: &str) -> &'static [&'static str] {
    PROVIDER_GPUS
        .iter()
        .find(|e| e.gpu == gpu && e.provider == provider)
        .map(|e| e.regions)
        .unwrap_or(&[])
}

/// Static serverless price for a GPU+provider combo. 0.0 if not found.
pub fn get_provider_price(gpu: &str, provider: &str) -> f64 {
    PROVIDER_GPUS
        .iter()
        .find(|e| e.gpu == gpu && e.provider == provider)
        .map(|e| e.price_per_gpu_hour)
        .unwrap_or(0.0)
}

pub fn spot_price(gpu: &str, cloud: &str) -> Option<&'static SpotPrice> {
    SPOT_PRICES.iter().find(|p| p.gpu == gpu && p.cloud == cloud)
}

/// Query the catalog with optional filters.
pub fn query(
    gpu: Option<&str>,
    provider: Option<&str>,
    min_vram_gb: Option<u32>,
    max_price: Option<f64>,
) -> Vec<ProviderGpu> {
    PROVIDER_GPUS
        .iter()
        .filter(|e| gpu.is_none_or(|g| e.gpu == g))
        .filter(|e| provider.is_none_or(|p| e.provider == p))
        .filter(|e| {
            min_vram_gb.is_none_or(|min| {
                get_gpu_spec(e.gpu).map(|s| s.vram_gb >= min).unwrap_or(false)
            })
        })
        .filter(|e| {
            max_price.is_none_or(|max| e.price_per_gpu_hour > 0.0 && e.price_per_gpu_hour <= max)
        })
        .copied()
        .collect()
}

/// Cheapest priced offering among the query results. Entries with no
/// listed price are skipped.
pub fn cheapest(results: &[ProviderGpu]) -> Option<&ProviderGpu> {
    results
        .iter()
        .filter(|e| e.price_per_gpu_hour > 0.0)
        .min_by(|a, b| a.price_per_gpu_hour.total_cmp(&b.price_per_gpu_hour))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_canonical_and_alias() {
        assert_eq!(normalize_gpu_name("L4").unwrap(), "L4");
        assert_eq!(normalize_gpu_name("A100").unwrap(), "A100_80GB");
        assert_eq!(normalize_gpu_name("4090").unwrap(), "RTX4090");
        assert!(normalize_gpu_name("V100").is_err());
    }

    #[test]
    fn test_provider_gpu_id_lookup() {
        assert_eq!(provider_gpu_id("L4", "runpod").unwrap(), "NVIDIA L4");
        let err = provider_gpu_id("T4", "runpod").unwrap_err();
        assert!(err.to_string().contains("no runpod offering"));
    }

    #[test]
    fn test_cheapest_skips_unpriced() {
        let results = query(Some("H200"), None, None, None);
        // Only RunPod lists H200, at price 0.0 (unknown), so nothing is selectable.
        assert!(cheapest(&results).is_none());

        let results = query(Some("L4"), None, None, None);
        let best = cheapest(&results).unwrap();
        assert_eq!(best.provider, "modal");
    }

    #[test]
    fn test_query_filters() {
        let big = query(None, Some("modal"), Some(80), None);
        assert!(big.iter().all(|e| get_gpu_spec(e.gpu).unwrap().vram_gb >= 80));
        assert!(!big.is_empty());

        let cheap = query(None, None, None, Some(1.0));
        assert!(cheap.iter().all(|e| e.price_per_gpu_hour <= 1.0));
    }
}
