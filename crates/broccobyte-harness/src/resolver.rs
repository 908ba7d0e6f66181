//! Device discovery.
//!
//! Probes the execution tiers in priority order and reports what this host
//! can offer for one job. A missing driver, library or GPU is a normal
//! outcome and maps to an absent capability; nothing in here fails.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broccobyte_core::{DeviceCapability, DeviceKind};
use tokio::process::Command;
use tracing::{debug, info};

/// Source of hardware facts for the resolver.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// Name of the preferred accelerator, if one is usable.
    async fn probe_accelerator(&self) -> Option<String>;

    /// Name of the general-purpose compute pool, if one is usable.
    async fn probe_general_compute(&self) -> Option<String>;
}

/// Probes the real host: NVIDIA then AMD tooling, then the CPU core count.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    /// Create a probe whose commands are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a probe command, returning its stdout on a zero exit.
    async fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(program, error = %e, "Probe command unavailable");
                return None;
            }
            Err(_) => {
                debug!(program, timeout_secs = self.timeout.as_secs(), "Probe command timed out");
                return None;
            }
        };

        if !output.status.success() {
            debug!(program, status = ?output.status.code(), "Probe command failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl DeviceProbe for SystemProbe {
    async fn probe_accelerator(&self) -> Option<String> {
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            if accelerators_hidden(&visible) {
                debug!(visible = %visible, "Accelerators hidden by CUDA_VISIBLE_DEVICES");
                return None;
            }
        }

        if let Some(stdout) = self
            .query("nvidia-smi", &["--query-gpu=name", "--format=csv,noheader"])
            .await
        {
            if let Some(name) = parse_nvidia_name(&stdout) {
                return Some(name);
            }
        }

        let stdout = self.query("rocm-smi", &["--showproductname"]).await?;
        parse_rocm_name(&stdout)
    }

    async fn probe_general_compute(&self) -> Option<String> {
        let threads = num_cpus::get();
        if threads > 1 {
            Some(format!("cpu-pool ({} threads)", threads))
        } else {
            None
        }
    }
}

fn accelerators_hidden(visible: &str) -> bool {
    let visible = visible.trim();
    visible.is_empty() || visible == "-1" || visible.eq_ignore_ascii_case("none")
}

/// First GPU name from `nvidia-smi --query-gpu=name --format=csv,noheader`.
fn parse_nvidia_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// First card name from `rocm-smi --showproductname`.
///
/// Lines look like `GPU[0]		: Card series:		Radeon Instinct MI100`.
fn parse_rocm_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter(|line| line.contains("Card series") || line.contains("Card model"))
        .filter_map(|line| line.rsplit(':').next())
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Produces the ordered capability list for one job.
#[derive(Clone)]
pub struct DeviceResolver {
    probe: Arc<dyn DeviceProbe>,
    forced: Option<DeviceKind>,
}

impl DeviceResolver {
    /// Create a resolver over the given probe.
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self {
            probe,
            forced: None,
        }
    }

    /// Restrict the chain to a single tier.
    pub fn with_forced(mut self, forced: Option<DeviceKind>) -> Self {
        self.forced = forced;
        self
    }

    /// Probe every tier once, highest priority first.
    ///
    /// Always returns one entry per tier in [`DeviceKind::CHAIN`] order.
    /// Tiers excluded by a forced selection are reported absent without
    /// being probed.
    pub async fn resolve(&self) -> Vec<DeviceCapability> {
        let mut devices = Vec::with_capacity(DeviceKind::CHAIN.len());

        for kind in DeviceKind::CHAIN {
            if self.forced.is_some_and(|forced| forced != kind) {
                devices.push(DeviceCapability::absent(kind));
                continue;
            }

            let name = match kind {
                DeviceKind::Accelerator => self.probe.probe_accelerator().await,
                DeviceKind::GeneralCompute => self.probe.probe_general_compute().await,
                DeviceKind::SoftwareOnly => Some("software".to_string()),
            };

            let capability = match name {
                Some(name) => DeviceCapability::available(kind, name),
                None => DeviceCapability::absent(kind),
            };
            debug!(
                tier = %kind,
                available = capability.available,
                name = %capability.name,
                "Probed device tier"
            );
            devices.push(capability);
        }

        info!(
            available = %devices
                .iter()
                .filter(|d| d.available)
                .map(|d| d.kind.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "Resolved device tiers"
        );
        devices
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe with fixed answers that counts how often it is asked.
    pub(crate) struct StaticProbe {
        pub accelerator: Option<String>,
        pub general: Option<String>,
        pub calls: AtomicUsize,
    }

    impl StaticProbe {
        pub(crate) fn new(accelerator: Option<&str>, general: Option<&str>) -> Self {
            Self {
                accelerator: accelerator.map(str::to_string),
                general: general.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceProbe for StaticProbe {
        async fn probe_accelerator(&self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.accelerator.clone()
        }

        async fn probe_general_compute(&self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.general.clone()
        }
    }

    #[tokio::test]
    async fn test_resolve_returns_chain_order() {
        let probe = Arc::new(StaticProbe::new(Some("Tesla T4"), Some("cpu-pool (8 threads)")));
        let devices = DeviceResolver::new(probe.clone()).resolve().await;

        let kinds: Vec<_> = devices.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, DeviceKind::CHAIN.to_vec());
        assert!(devices.iter().all(|d| d.available));
        assert_eq!(devices[0].name, "Tesla T4");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_accelerator_is_absent_not_error() {
        let probe = Arc::new(StaticProbe::new(None, None));
        let devices = DeviceResolver::new(probe).resolve().await;

        assert!(!devices[0].available);
        assert!(!devices[1].available);
        assert_eq!(devices[2], DeviceCapability::software());
    }

    #[tokio::test]
    async fn test_forced_tier_skips_other_probes() {
        let probe = Arc::new(StaticProbe::new(Some("Tesla T4"), Some("pool")));
        let devices = DeviceResolver::new(probe.clone())
            .with_forced(Some(DeviceKind::SoftwareOnly))
            .resolve()
            .await;

        let available: Vec<_> = devices.iter().filter(|d| d.available).collect();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].kind, DeviceKind::SoftwareOnly);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_system_probe_never_fails() {
        // Whatever the host has, probing must come back with an answer.
        let probe = SystemProbe::new(Duration::from_millis(500));
        let _ = probe.probe_accelerator().await;
        let _ = probe.probe_general_compute().await;
    }

    #[test]
    fn test_parse_nvidia_name() {
        assert_eq!(
            parse_nvidia_name("\nNVIDIA A100-SXM4-40GB\nNVIDIA A100-SXM4-40GB\n"),
            Some("NVIDIA A100-SXM4-40GB".to_string())
        );
        assert_eq!(parse_nvidia_name("  \n"), None);
    }

    #[test]
    fn test_parse_rocm_name() {
        let stdout = "\
============================ ROCm System Management Interface ============================
GPU[0]\t\t: Card series:\t\tRadeon Instinct MI100
GPU[0]\t\t: Card vendor:\t\tAdvanced Micro Devices, Inc. [AMD/ATI]
";
        assert_eq!(
            parse_rocm_name(stdout),
            Some("Radeon Instinct MI100".to_string())
        );
        assert_eq!(parse_rocm_name("no gpus"), None);
    }

    #[test]
    fn test_accelerators_hidden() {
        assert!(accelerators_hidden(""));
        assert!(accelerators_hidden("-1"));
        assert!(accelerators_hidden("NoNe"));
        assert!(!accelerators_hidden("0,1"));
    }
}
