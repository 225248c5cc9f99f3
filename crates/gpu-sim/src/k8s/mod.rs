//! Kubernetes integration module.
//!
//! The provisioning flow talks to the cluster only through [`ClusterApi`],
//! so the capacity faker and the readiness waiter can run against the
//! in-memory fake in tests and against a kube client otherwise.

pub(crate) mod api;
pub(crate) mod kube_client;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod types;

pub(crate) use api::ClusterApi;
pub(crate) use api::KubeClusterApi;
pub(crate) use kube_client::init_kube_client;
pub(crate) use types::KubernetesError;
