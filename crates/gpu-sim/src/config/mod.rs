pub(crate) mod cli;
pub(crate) mod cluster;

pub(crate) use cli::*;
pub(crate) use cluster::ClusterConfig;
