use api_types::VendorProfile;
use api_types::GPU_TAINT;
use api_types::HARDWARE_LABEL;
use error_stack::Report;
use error_stack::ResultExt;
use json_patch::AddOperation;
use json_patch::PatchOperation;
use serde_json::Value;
use tracing::info;
use tracing::warn;

use crate::k8s::ClusterApi;
use crate::k8s::KubernetesError;

/// Status patch setting `resource_name` capacity to `count`.
///
/// `add` on an existing map key replaces it, so the patch is an upsert.
pub(crate) fn capacity_patch(profile: &VendorProfile, count: u32) -> json_patch::Patch {
    json_patch::Patch(vec![PatchOperation::Add(AddOperation {
        path: profile.capacity_path(),
        value: Value::String(count.to_string()),
    })])
}

/// Makes worker nodes advertise fake accelerators of one vendor.
pub(crate) struct CapacityFaker<'a> {
    api: &'a dyn ClusterApi,
    profile: &'static VendorProfile,
    count: u32,
}

impl<'a> CapacityFaker<'a> {
    pub(crate) fn new(api: &'a dyn ClusterApi, profile: &'static VendorProfile, count: u32) -> Self {
        Self {
            api,
            profile,
            count,
        }
    }

    /// Fakes every node in `nodes`, one at a time, stopping at the first
    /// failure. Returns the number of nodes faked.
    pub(crate) async fn fake_nodes(&self, nodes: &[String]) -> Result<usize, Report<KubernetesError>> {
        if nodes.is_empty() {
            warn!("no worker nodes to fake");
            return Ok(0);
        }

        for node in nodes {
            self.fake_node(node)
                .await
                .attach_printable_lazy(|| format!("while faking GPU capacity on node {node}"))?;
        }
        Ok(nodes.len())
    }

    /// Labels, taints and capacity-patches a single node.
    ///
    /// The taint lands before the capacity so the node never advertises the
    /// resource while still accepting untolerating pods.
    #[tracing::instrument(skip(self), fields(resource = self.profile.resource_name))]
    pub(crate) async fn fake_node(&self, node: &str) -> Result<(), Report<KubernetesError>> {
        self.api
            .label_node(node, HARDWARE_LABEL.0, HARDWARE_LABEL.1)
            .await?;
        self.api.taint_node(node, &GPU_TAINT).await?;
        self.api
            .label_node(node, self.profile.presence_label.0, self.profile.presence_label.1)
            .await?;
        self.api
            .patch_node_status(node, capacity_patch(self.profile, self.count))
            .await?;

        info!(
            node,
            count = self.count,
            "advertising fake {}",
            self.profile.resource_name
        );
        Ok(())
    }
}
