//! In-memory [`ClusterApi`] used by the test suites.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use api_types::NodeTaint;
use api_types::CONTROL_PLANE_LABEL;
use error_stack::Report;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeSpec;
use k8s_openapi::api::core::v1::NodeStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodCondition;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::k8s::api::upsert_taint;
use crate::k8s::api::ClusterApi;
use crate::k8s::api::KubeResult;
use crate::k8s::types::KubernetesError;

pub(crate) fn test_node(name: &str, control_plane: bool) -> Node {
    let mut labels = BTreeMap::new();
    labels.insert("kubernetes.io/hostname".to_string(), name.to_string());
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }

    let mut capacity = BTreeMap::new();
    capacity.insert("cpu".to_string(), Quantity("8".to_string()));
    capacity.insert("memory".to_string(), Quantity("16Gi".to_string()));

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            capacity: Some(capacity),
            ..Default::default()
        }),
    }
}

pub(crate) fn test_pod(name: &str, labels: &[(&str, &str)], ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// A cluster held in memory.
///
/// Pod listings are scripted: each `list_pods` call pops the next queued
/// response, and the last one keeps being returned once the queue runs dry.
#[derive(Default)]
pub(crate) struct FakeClusterApi {
    nodes: Mutex<BTreeMap<String, Node>>,
    pod_responses: Mutex<VecDeque<Vec<Pod>>>,
    last_pods: Mutex<Vec<Pod>>,
    list_calls: Mutex<u32>,
    failing_nodes: Mutex<HashSet<String>>,
    mutations: Mutex<Vec<String>>,
    pub(crate) config_maps: Mutex<Vec<ConfigMap>>,
    pub(crate) daemonsets: Mutex<Vec<DaemonSet>>,
    pub(crate) deployments: Mutex<Vec<Deployment>>,
    pub(crate) services: Mutex<Vec<Service>>,
}

impl FakeClusterApi {
    /// One control-plane node plus the given workers, like the kind topology.
    pub(crate) fn with_workers(workers: &[&str]) -> Self {
        let api = Self::default();
        api.insert_node(test_node("gpu-sim-control-plane", true));
        for worker in workers {
            api.insert_node(test_node(worker, false));
        }
        api
    }

    pub(crate) fn insert_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
    }

    pub(crate) fn node(&self, name: &str) -> Node {
        self.nodes.lock().unwrap()[name].clone()
    }

    /// Make every mutation of `name` fail as if the node vanished.
    pub(crate) fn fail_node(&self, name: &str) {
        self.failing_nodes.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn push_pods(&self, pods: Vec<Pod>) {
        self.pod_responses.lock().unwrap().push_back(pods);
    }

    pub(crate) fn list_calls(&self) -> u32 {
        *self.list_calls.lock().unwrap()
    }

    /// Ordered log of node mutations, e.g. `taint worker-1 gpu=true:NoSchedule`.
    pub(crate) fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn mutate_node(
        &self,
        name: &str,
        record: String,
        f: impl FnOnce(&mut Node) -> KubeResult<()>,
    ) -> KubeResult<()> {
        if self.failing_nodes.lock().unwrap().contains(name) {
            return Err(Report::new(KubernetesError::NodeNotFound {
                node: name.to_string(),
            }));
        }
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(name).ok_or_else(|| {
            Report::new(KubernetesError::NodeNotFound {
                node: name.to_string(),
            })
        })?;
        f(node)?;
        self.mutations.lock().unwrap().push(record);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeClusterApi {
    async fn worker_nodes(&self) -> KubeResult<Vec<String>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, node)| {
                !node
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.contains_key(CONTROL_PLANE_LABEL))
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> KubeResult<()> {
        self.mutate_node(node, format!("label {node} {key}={value}"), |n| {
            n.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn taint_node(&self, node: &str, taint: &NodeTaint) -> KubeResult<()> {
        self.mutate_node(node, format!("taint {node} {taint}"), |n| {
            let spec = n.spec.get_or_insert_with(NodeSpec::default);
            spec.taints = Some(upsert_taint(spec.taints.take().unwrap_or_default(), taint));
            Ok(())
        })
    }

    async fn patch_node_status(&self, node: &str, patch: json_patch::Patch) -> KubeResult<()> {
        let record = format!("status {node} {}", serde_json::to_string(&patch).unwrap());
        self.mutate_node(node, record, |n| {
            let mut doc = serde_json::to_value(&*n).unwrap();
            json_patch::patch(&mut doc, &patch.0).map_err(|e| {
                Report::new(KubernetesError::RequestFailed {
                    message: format!("invalid patch: {e}"),
                })
            })?;
            *n = serde_json::from_value(doc).unwrap();
            Ok(())
        })
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> KubeResult<()> {
        self.config_maps.lock().unwrap().push(config_map.clone());
        Ok(())
    }

    async fn apply_daemonset(&self, daemonset: &DaemonSet) -> KubeResult<()> {
        self.daemonsets.lock().unwrap().push(daemonset.clone());
        Ok(())
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> KubeResult<()> {
        self.deployments.lock().unwrap().push(deployment.clone());
        Ok(())
    }

    async fn apply_service(&self, service: &Service) -> KubeResult<()> {
        self.services.lock().unwrap().push(service.clone());
        Ok(())
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> KubeResult<Vec<Pod>> {
        *self.list_calls.lock().unwrap() += 1;

        let mut last = self.last_pods.lock().unwrap();
        if let Some(next) = self.pod_responses.lock().unwrap().pop_front() {
            *last = next;
        }

        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
        Ok(last
            .iter()
            .filter(|pod| {
                pod.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect())
    }

    async fn delete_deployment(&self, _namespace: &str, name: &str) -> KubeResult<bool> {
        let mut deployments = self.deployments.lock().unwrap();
        let before = deployments.len();
        deployments.retain(|d| d.metadata.name.as_deref() != Some(name));
        Ok(deployments.len() != before)
    }

    async fn delete_service(&self, _namespace: &str, name: &str) -> KubeResult<bool> {
        let mut services = self.services.lock().unwrap();
        let before = services.len();
        services.retain(|s| s.metadata.name.as_deref() != Some(name));
        Ok(services.len() != before)
    }
}
