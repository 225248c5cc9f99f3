use std::path::Path;

use serde::Serialize;

/// Points containerd at per-registry host configs, which the registry
/// mirror setup writes into every node.
const CONTAINERD_REGISTRY_PATCH: &str = r#"[plugins."io.containerd.grpc.v1.cri".registry]
  config_path = "/etc/containerd/certs.d""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum NodeRole {
    ControlPlane,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct KindNode {
    pub(crate) role: NodeRole,
}

/// A kind `Cluster` configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KindCluster {
    kind: &'static str,
    api_version: &'static str,
    pub(crate) nodes: Vec<KindNode>,
    pub(crate) containerd_config_patches: Vec<String>,
}

impl KindCluster {
    /// One control-plane node and `workers` worker nodes, with the containerd
    /// registry patch applied.
    pub(crate) fn with_workers(workers: usize) -> Self {
        let mut nodes = vec![KindNode {
            role: NodeRole::ControlPlane,
        }];
        nodes.extend((0..workers).map(|_| KindNode {
            role: NodeRole::Worker,
        }));

        Self {
            kind: "Cluster",
            api_version: "kind.x-k8s.io/v1alpha4",
            nodes,
            containerd_config_patches: vec![CONTAINERD_REGISTRY_PATCH.to_string()],
        }
    }

    pub(crate) fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Writes the document to `path`, creating parent directories and
    /// overwriting any previous file.
    pub(crate) fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let yaml = self.to_yaml().map_err(std::io::Error::other)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, yaml)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn renders_kind_document() {
        let yaml = KindCluster::with_workers(2).to_yaml().expect("yaml");
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("parse back");

        assert_eq!(doc["kind"].as_str(), Some("Cluster"));
        assert_eq!(doc["apiVersion"].as_str(), Some("kind.x-k8s.io/v1alpha4"));

        let roles: Vec<&str> = doc["nodes"]
            .as_sequence()
            .expect("nodes")
            .iter()
            .map(|n| n["role"].as_str().expect("role"))
            .collect();
        assert_eq!(roles, vec!["control-plane", "worker", "worker"]);

        let patch = doc["containerdConfigPatches"][0].as_str().expect("patch");
        assert!(patch.contains(r#"config_path = "/etc/containerd/certs.d""#));
    }

    #[test]
    fn write_overwrites_scratch_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cluster.yaml");

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale").unwrap();

        KindCluster::with_workers(1).write_to(&path).expect("write");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("kind: Cluster"));
    }
}
