use std::collections::BTreeMap;

use api_types::VendorProfile;
use api_types::GPU_TAINT;
use api_types::HARDWARE_LABEL;
use api_types::PLUGIN_NAMESPACE;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::DaemonSetSpec;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::HostPathVolumeSource;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::SecurityContext;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Tolerations every simulated GPU workload needs: the `gpu` taint put on
/// the nodes plus the vendor resource key device plugins conventionally
/// tolerate.
pub(crate) fn gpu_tolerations(profile: &VendorProfile) -> Vec<Toleration> {
    vec![
        Toleration {
            key: Some(GPU_TAINT.key.to_string()),
            operator: Some("Equal".to_string()),
            value: Some(GPU_TAINT.value.to_string()),
            effect: Some(GPU_TAINT.effect.as_str().to_string()),
            ..Default::default()
        },
        Toleration {
            key: Some(profile.resource_name.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some(GPU_TAINT.effect.as_str().to_string()),
            ..Default::default()
        },
    ]
}

/// Node selector matching nodes faked for `profile`.
pub(crate) fn gpu_node_selector(profile: &VendorProfile) -> BTreeMap<String, String> {
    BTreeMap::from([
        (HARDWARE_LABEL.0.to_string(), HARDWARE_LABEL.1.to_string()),
        (
            profile.presence_label.0.to_string(),
            profile.presence_label.1.to_string(),
        ),
    ])
}

/// The vendor device plugin DaemonSet, pinned to the faked nodes.
pub(crate) fn device_plugin_daemonset(profile: &VendorProfile, image: &str) -> DaemonSet {
    let labels = BTreeMap::from([(
        profile.selector_label.0.to_string(),
        profile.selector_label.1.to_string(),
    )]);

    let volumes = profile
        .host_mounts
        .iter()
        .map(|mount| Volume {
            name: mount.name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: mount.path.to_string(),
                type_: None,
            }),
            ..Default::default()
        })
        .collect();

    let volume_mounts = profile
        .host_mounts
        .iter()
        .map(|mount| VolumeMount {
            name: mount.name.to_string(),
            mount_path: mount.path.to_string(),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: format!("{}-device-plugin", profile.token),
        image: Some(image.to_string()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(profile.daemonset_name.to_string()),
            namespace: Some(PLUGIN_NAMESPACE.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: Some(gpu_node_selector(profile)),
                    tolerations: Some(gpu_tolerations(profile)),
                    priority_class_name: Some("system-node-critical".to_string()),
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use api_types::Vendor;
    use similar_asserts::assert_eq;

    use super::*;

    fn pod_spec(ds: &DaemonSet) -> &PodSpec {
        ds.spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .expect("pod spec")
    }

    #[test]
    fn toleration_matches_node_taint_for_every_vendor() {
        for vendor in Vendor::ALL {
            let ds = device_plugin_daemonset(vendor.profile(), "localhost:5001/plugin:1");
            let tolerations = pod_spec(&ds).tolerations.as_ref().expect("tolerations");

            assert!(tolerations.iter().any(|t| {
                t.key.as_deref() == Some(GPU_TAINT.key)
                    && t.value.as_deref() == Some(GPU_TAINT.value)
                    && t.effect.as_deref() == Some("NoSchedule")
            }));
        }
    }

    #[test]
    fn selector_matches_template_labels() {
        let profile = Vendor::Nvidia.profile();
        let ds = device_plugin_daemonset(profile, "localhost:5001/nvidia/k8s-device-plugin:v0.17.0");
        let spec = ds.spec.as_ref().unwrap();

        let selector = spec.selector.match_labels.as_ref().unwrap();
        let template_labels = spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.as_ref())
            .unwrap();
        assert_eq!(selector, template_labels);
        assert_eq!(
            selector.get("name").map(String::as_str),
            Some("nvidia-device-plugin-ds")
        );
        assert_eq!(ds.metadata.namespace.as_deref(), Some("kube-system"));
    }

    #[test]
    fn container_is_privileged_with_host_mounts() {
        let ds = device_plugin_daemonset(Vendor::Amd.profile(), "localhost:5001/rocm/k8s-device-plugin:latest");
        let pod = pod_spec(&ds);
        let container = &pod.containers[0];

        assert_eq!(
            container.image.as_deref(),
            Some("localhost:5001/rocm/k8s-device-plugin:latest")
        );
        assert_eq!(
            container
                .security_context
                .as_ref()
                .and_then(|sc| sc.privileged),
            Some(true)
        );

        let mounts: Vec<&str> = container
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(mounts, vec!["/var/lib/kubelet/device-plugins", "/sys"]);
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn node_selector_requires_hardware_and_presence_labels() {
        let selector = gpu_node_selector(Vendor::Amd.profile());
        assert_eq!(selector.get("hardware-type").map(String::as_str), Some("gpu"));
        assert_eq!(
            selector.get("amd.com/gpu.present").map(String::as_str),
            Some("true")
        );
    }
}
