use std::collections::BTreeMap;

use api_types::VendorProfile;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EmptyDirVolumeSource;
use k8s_openapi::api::core::v1::HTTPGetAction;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::model::image::MODEL_ROOT;
use crate::simulation::plugin::gpu_node_selector;
use crate::simulation::plugin::gpu_tolerations;

const CACHE_VOLUME: &str = "model-cache";
const CACHE_MOUNT: &str = "/model-cache";
/// Label key tying the Deployment, its pods and the Service together.
pub(crate) const APP_LABEL: &str = "app";

/// A model served on a simulated GPU.
#[derive(Debug, Clone)]
pub(crate) struct ModelWorkload {
    pub(crate) name: String,
    pub(crate) model_id: String,
    pub(crate) namespace: String,
    pub(crate) model_image: String,
    pub(crate) serving_image: String,
    pub(crate) port: u16,
    pub(crate) profile: &'static VendorProfile,
}

impl ModelWorkload {
    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(APP_LABEL.to_string(), self.name.clone())])
    }

    fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    /// Label selector of the workload pods.
    pub(crate) fn pod_selector(&self) -> String {
        format!("{APP_LABEL}={}", self.name)
    }

    pub(crate) fn deployment(&self) -> Deployment {
        let cache_mount = |mount_path: &str| VolumeMount {
            name: CACHE_VOLUME.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        };

        // copies the weights out of the model image before the server starts
        let loader = Container {
            name: "model-loader".to_string(),
            image: Some(self.model_image.clone()),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cp -r {MODEL_ROOT}/. {CACHE_MOUNT}/"),
            ]),
            volume_mounts: Some(vec![cache_mount(CACHE_MOUNT)]),
            ..Default::default()
        };

        let gpu = BTreeMap::from([(
            self.profile.resource_name.to_string(),
            Quantity("1".to_string()),
        )]);
        let port = i32::from(self.port);

        let server = Container {
            name: "server".to_string(),
            image: Some(self.serving_image.clone()),
            args: Some(vec![
                "--model".to_string(),
                format!("{MODEL_ROOT}/{}", self.name),
                "--served-model-name".to_string(),
                self.model_id.clone(),
                "--port".to_string(),
                self.port.to_string(),
            ]),
            ports: Some(vec![ContainerPort {
                name: Some("http".to_string()),
                container_port: port,
                ..Default::default()
            }]),
            resources: Some(ResourceRequirements {
                requests: Some(gpu.clone()),
                limits: Some(gpu),
                ..Default::default()
            }),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/health".to_string()),
                    port: IntOrString::Int(port),
                    ..Default::default()
                }),
                period_seconds: Some(10),
                ..Default::default()
            }),
            volume_mounts: Some(vec![cache_mount(MODEL_ROOT)]),
            ..Default::default()
        };

        Deployment {
            metadata: self.metadata(),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(self.labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        init_containers: Some(vec![loader]),
                        containers: vec![server],
                        node_selector: Some(gpu_node_selector(self.profile)),
                        tolerations: Some(gpu_tolerations(self.profile)),
                        volumes: Some(vec![Volume {
                            name: CACHE_VOLUME.to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub(crate) fn service(&self) -> Service {
        let port = i32::from(self.port);
        Service {
            metadata: self.metadata(),
            spec: Some(ServiceSpec {
                selector: Some(self.labels()),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Both objects as one multi-document YAML stream.
    pub(crate) fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        Ok(format!(
            "{}---\n{}",
            serde_yaml::to_string(&self.deployment())?,
            serde_yaml::to_string(&self.service())?
        ))
    }
}
