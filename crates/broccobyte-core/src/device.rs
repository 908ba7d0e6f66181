//! Execution tiers and probed device capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Execution tier, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Dedicated accelerator (CUDA or ROCm GPU).
    Accelerator,
    /// Multi-threaded general-purpose compute pool.
    GeneralCompute,
    /// Single-threaded software execution. Always available.
    SoftwareOnly,
}

impl DeviceKind {
    /// The fixed fallback chain, highest priority first.
    pub const CHAIN: [DeviceKind; 3] = [
        DeviceKind::Accelerator,
        DeviceKind::GeneralCompute,
        DeviceKind::SoftwareOnly,
    ];

    /// Wire name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerator => "accelerator",
            Self::GeneralCompute => "general_compute",
            Self::SoftwareOnly => "software_only",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accelerator" | "gpu" => Ok(Self::Accelerator),
            "general_compute" | "general" | "cpu" => Ok(Self::GeneralCompute),
            "software_only" | "software" => Ok(Self::SoftwareOnly),
            _ => Err(CoreError::UnknownDevice(s.to_string())),
        }
    }
}

/// Result of probing one execution tier.
///
/// Produced fresh for every job; hardware can change between container
/// invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapability {
    /// Tier this capability describes.
    pub kind: DeviceKind,
    /// Human-readable device name (GPU model, pool size, "software").
    pub name: String,
    /// Whether the tier can be used for this job.
    pub available: bool,
}

impl DeviceCapability {
    /// An available device.
    pub fn available(kind: DeviceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            available: true,
        }
    }

    /// A tier that was probed and found absent.
    pub fn absent(kind: DeviceKind) -> Self {
        Self {
            kind,
            name: "none".to_string(),
            available: false,
        }
    }

    /// The software tier, which needs nothing external.
    pub fn software() -> Self {
        Self::available(DeviceKind::SoftwareOnly, "software")
    }
}

impl fmt::Display for DeviceCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.name)
    }
}
