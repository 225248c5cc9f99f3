//! Fake GPU capacity on worker nodes and the device plugin readiness
//! handshake.

pub(crate) mod faker;
pub(crate) mod plugin;
pub(crate) mod readiness;

pub(crate) use faker::CapacityFaker;
pub(crate) use readiness::ReadinessSettings;
pub(crate) use readiness::ReadinessWaiter;
pub(crate) use readiness::WaitError;
