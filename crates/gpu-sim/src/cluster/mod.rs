//! Cluster bootstrap: the kind CLI, its topology file and the local
//! registry the nodes pull from.

pub(crate) mod kind;
pub(crate) mod registry;
pub(crate) mod topology;

pub(crate) use kind::kube_context;
pub(crate) use kind::KindCli;
pub(crate) use registry::LocalRegistry;
pub(crate) use topology::KindCluster;

/// Worker nodes in the simulated cluster.
pub(crate) const WORKER_COUNT: usize = 2;
