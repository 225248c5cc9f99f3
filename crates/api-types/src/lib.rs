//! Shared type definitions
//!
//! This crate contains the vendor profiles and shared constants used by the
//! gpu-sim components: the names of the fake GPU resources, the node labels
//! and taints that gate scheduling onto simulated GPU nodes, and the outcome
//! type of the device plugin readiness wait.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Number of fake accelerator units advertised on every worker node.
pub const FAKE_GPU_COUNT: u32 = 2;

/// Label applied to every simulated GPU node.
pub const HARDWARE_LABEL: (&str, &str) = ("hardware-type", "gpu");

/// Taint keeping ordinary workloads off simulated GPU nodes.
pub const GPU_TAINT: NodeTaint = NodeTaint {
    key: "gpu",
    value: "true",
    effect: TaintEffect::NoSchedule,
};

/// Label carried by control-plane nodes; those nodes are never faked.
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Namespace the device plugin DaemonSets are deployed into.
pub const PLUGIN_NAMESPACE: &str = "kube-system";

/// Effect of a node taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node taint in `key=value:effect` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTaint {
    pub key: &'static str,
    pub value: &'static str,
    pub effect: TaintEffect,
}

impl fmt::Display for NodeTaint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.key, self.value, self.effect)
    }
}

/// A host directory mounted into the device plugin container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMount {
    pub name: &'static str,
    pub path: &'static str,
}

/// Simulated accelerator vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Amd,
    Nvidia,
}

/// Returned when a vendor token is not one of the supported ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported vendor `{token}`, expected one of: rocm, nvidia")]
pub struct UnknownVendor {
    pub token: String,
}

impl Vendor {
    pub const ALL: [Vendor; 2] = [Vendor::Amd, Vendor::Nvidia];

    /// The command line token selecting this vendor.
    pub fn token(self) -> &'static str {
        self.profile().token
    }

    pub fn profile(self) -> &'static VendorProfile {
        match self {
            Vendor::Amd => &AMD_PROFILE,
            Vendor::Nvidia => &NVIDIA_PROFILE,
        }
    }
}

impl FromStr for Vendor {
    type Err = UnknownVendor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vendor::ALL
            .into_iter()
            .find(|vendor| vendor.token() == s)
            .ok_or_else(|| UnknownVendor {
                token: s.to_string(),
            })
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Everything that differs between the simulated vendors.
#[derive(Debug, PartialEq, Eq)]
pub struct VendorProfile {
    pub vendor: Vendor,
    /// Command line token
    pub token: &'static str,
    /// Extended resource name advertised in node capacity
    pub resource_name: &'static str,
    /// Label marking a node as carrying this vendor's devices
    pub presence_label: (&'static str, &'static str),
    /// Upstream device plugin image
    pub plugin_image: &'static str,
    pub daemonset_name: &'static str,
    /// Label selecting the DaemonSet pods
    pub selector_label: (&'static str, &'static str),
    pub host_mounts: &'static [HostMount],
}

const DEVICE_PLUGIN_MOUNT: HostMount = HostMount {
    name: "device-plugin",
    path: "/var/lib/kubelet/device-plugins",
};

static AMD_PROFILE: VendorProfile = VendorProfile {
    vendor: Vendor::Amd,
    token: "rocm",
    resource_name: "amd.com/gpu",
    presence_label: ("amd.com/gpu.present", "true"),
    plugin_image: "docker.io/rocm/k8s-device-plugin:latest",
    daemonset_name: "amdgpu-device-plugin-daemonset",
    selector_label: ("name", "amdgpu-dp-ds"),
    host_mounts: &[
        DEVICE_PLUGIN_MOUNT,
        HostMount {
            name: "sys",
            path: "/sys",
        },
    ],
};

static NVIDIA_PROFILE: VendorProfile = VendorProfile {
    vendor: Vendor::Nvidia,
    token: "nvidia",
    resource_name: "nvidia.com/gpu",
    presence_label: ("nvidia.com/gpu.present", "true"),
    plugin_image: "nvcr.io/nvidia/k8s-device-plugin:v0.17.0",
    daemonset_name: "nvidia-device-plugin-daemonset",
    selector_label: ("name", "nvidia-device-plugin-ds"),
    host_mounts: &[DEVICE_PLUGIN_MOUNT],
};

impl VendorProfile {
    /// Label selector string matching the DaemonSet pods, e.g. `name=nvidia-device-plugin-ds`.
    pub fn pod_selector(&self) -> String {
        format!("{}={}", self.selector_label.0, self.selector_label.1)
    }

    /// JSON pointer to the vendor resource inside a node object.
    ///
    /// `/` in the resource name is escaped as `~1` per RFC 6901.
    pub fn capacity_path(&self) -> String {
        let escaped = self.resource_name.replace('~', "~0").replace('/', "~1");
        format!("/status/capacity/{escaped}")
    }
}

/// Terminal result of waiting for pods to become Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { elapsed: Duration },
    TimedOut { elapsed: Duration },
}

impl ReadinessOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessOutcome::Ready { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            ReadinessOutcome::Ready { elapsed } | ReadinessOutcome::TimedOut { elapsed } => {
                *elapsed
            }
        }
    }
}
