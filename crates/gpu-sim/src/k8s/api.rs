use std::fmt::Debug;

use api_types::NodeTaint;
use api_types::CONTROL_PLANE_LABEL;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::Taint;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::k8s::types::KubernetesError;

/// Field manager used for every server-side apply.
pub(crate) const FIELD_MANAGER: &str = "gpu-sim";

pub(crate) type KubeResult<T> = Result<T, Report<KubernetesError>>;

/// The subset of the Kubernetes API the provisioning flow consumes.
///
/// Implemented by [`KubeClusterApi`] against a live cluster; tests use an
/// in-memory fake.
#[async_trait::async_trait]
pub(crate) trait ClusterApi: Send + Sync {
    /// Names of all nodes not carrying the control-plane role label, sorted.
    async fn worker_nodes(&self) -> KubeResult<Vec<String>>;

    /// Add or overwrite a node label.
    async fn label_node(&self, node: &str, key: &str, value: &str) -> KubeResult<()>;

    /// Add or overwrite a node taint, matched by key and effect.
    async fn taint_node(&self, node: &str, taint: &NodeTaint) -> KubeResult<()>;

    /// Apply a JSON patch to the node's status subresource.
    async fn patch_node_status(&self, node: &str, patch: json_patch::Patch) -> KubeResult<()>;

    async fn apply_config_map(&self, config_map: &ConfigMap) -> KubeResult<()>;

    async fn apply_daemonset(&self, daemonset: &DaemonSet) -> KubeResult<()>;

    async fn apply_deployment(&self, deployment: &Deployment) -> KubeResult<()>;

    async fn apply_service(&self, service: &Service) -> KubeResult<()>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> KubeResult<Vec<Pod>>;

    /// Returns whether the Deployment existed.
    async fn delete_deployment(&self, namespace: &str, name: &str) -> KubeResult<bool>;

    /// Returns whether the Service existed.
    async fn delete_service(&self, namespace: &str, name: &str) -> KubeResult<bool>;
}

/// Returns `taints` with `taint` added, replacing an entry with the same key
/// and effect.
pub(crate) fn upsert_taint(mut taints: Vec<Taint>, taint: &NodeTaint) -> Vec<Taint> {
    taints.retain(|existing| !(existing.key == taint.key && existing.effect == taint.effect.as_str()));
    taints.push(Taint {
        key: taint.key.to_string(),
        value: Some(taint.value.to_string()),
        effect: taint.effect.as_str().to_string(),
        time_added: None,
    });
    taints
}

/// [`ClusterApi`] backed by a kube client.
pub(crate) struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    async fn apply<K>(&self, api: Api<K>, object: &K) -> KubeResult<()>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).to_string();
        let name = object.meta().name.clone().ok_or_else(|| {
            Report::new(KubernetesError::RequestFailed {
                message: format!("{kind} object has no name"),
            })
        })?;

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(object),
        )
        .await
        .change_context(KubernetesError::RequestFailed {
            message: format!("Failed to apply {kind} {name}"),
        })?;

        debug!(kind = %kind, name = %name, "applied");
        Ok(())
    }

    async fn delete<K>(&self, api: Api<K>, name: &str) -> KubeResult<bool>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).to_string();
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(Report::new(e).change_context(KubernetesError::RequestFailed {
                message: format!("Failed to delete {kind} {name}"),
            })),
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    async fn worker_nodes(&self) -> KubeResult<Vec<String>> {
        let params = ListParams::default().labels(&format!("!{CONTROL_PLANE_LABEL}"));
        let nodes = self
            .nodes()
            .list(&params)
            .await
            .change_context(KubernetesError::RequestFailed {
                message: "Failed to list nodes".to_string(),
            })?;

        let mut names: Vec<String> = nodes
            .items
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> KubeResult<()> {
        let patch = json!({ "metadata": { "labels": { key: value } } });
        self.nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to label node {node} with {key}={value}"),
            })?;
        Ok(())
    }

    async fn taint_node(&self, node: &str, taint: &NodeTaint) -> KubeResult<()> {
        let current = self
            .nodes()
            .get_opt(node)
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to get node {node}"),
            })?
            .ok_or_else(|| {
                Report::new(KubernetesError::NodeNotFound {
                    node: node.to_string(),
                })
            })?;

        let taints = upsert_taint(
            current.spec.and_then(|spec| spec.taints).unwrap_or_default(),
            taint,
        );
        // merge patch replaces the list as a whole
        let patch = json!({ "spec": { "taints": taints } });
        self.nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to taint node {node} with {taint}"),
            })?;
        Ok(())
    }

    async fn patch_node_status(&self, node: &str, patch: json_patch::Patch) -> KubeResult<()> {
        self.nodes()
            .patch_status(node, &PatchParams::default(), &Patch::<()>::Json(patch))
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to patch status of node {node}"),
            })?;
        Ok(())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> KubeResult<()> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or("default");
        self.apply(Api::namespaced(self.client.clone(), namespace), config_map)
            .await
    }

    async fn apply_daemonset(&self, daemonset: &DaemonSet) -> KubeResult<()> {
        let namespace = daemonset.metadata.namespace.as_deref().unwrap_or("default");
        self.apply(Api::namespaced(self.client.clone(), namespace), daemonset)
            .await
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> KubeResult<()> {
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or("default");
        self.apply(Api::namespaced(self.client.clone(), namespace), deployment)
            .await
    }

    async fn apply_service(&self, service: &Service) -> KubeResult<()> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or("default");
        self.apply(Api::namespaced(self.client.clone(), namespace), service)
            .await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> KubeResult<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(selector))
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to list pods matching {selector} in {namespace}"),
            })?;
        Ok(pods.items)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> KubeResult<bool> {
        self.delete::<Deployment>(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> KubeResult<bool> {
        self.delete::<Service>(Api::namespaced(self.client.clone(), namespace), name)
            .await
    }
}
