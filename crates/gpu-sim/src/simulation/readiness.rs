use std::time::Duration;

use api_types::ReadinessOutcome;
use api_types::VendorProfile;
use api_types::PLUGIN_NAMESPACE;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tokio::select;
use tokio::time::sleep;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::k8s::ClusterApi;
use crate::simulation::plugin::device_plugin_daemonset;

#[derive(Debug, Error)]
pub(crate) enum WaitError {
    #[error("Failed to submit {kind} {name}")]
    Submit { kind: &'static str, name: String },
    #[error("Failed to query pods matching {selector}")]
    Query { selector: String },
    #[error("Wait cancelled")]
    Cancelled,
}

/// Timing of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadinessSettings {
    /// Budget for the polling phase
    pub(crate) timeout: Duration,
    /// Pause between submitting and the first poll, giving the controller
    /// time to create pods
    pub(crate) grace_delay: Duration,
    pub(crate) poll_interval: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            grace_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Whether the pod carries the condition `Ready=True`.
pub(crate) fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Polls pods matching `selector` until at least `expected` of them exist and
/// all of them are Ready, the deadline passes, or `cancel` fires.
///
/// An empty pod set never counts as Ready, whatever `expected` is. The last
/// poll happens at the deadline, so the call returns no later than
/// `deadline` plus the duration of one pod listing.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn wait_for_pods_ready(
    api: &dyn ClusterApi,
    namespace: &str,
    selector: &str,
    expected: usize,
    started: Instant,
    deadline: Instant,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<ReadinessOutcome, Report<WaitError>> {
    loop {
        let pods = api
            .list_pods(namespace, selector)
            .await
            .change_context(WaitError::Query {
                selector: selector.to_string(),
            })?;
        let ready = pods.iter().filter(|pod| pod_is_ready(pod)).count();

        if ready >= expected.max(1) && ready == pods.len() {
            return Ok(ReadinessOutcome::Ready {
                elapsed: started.elapsed(),
            });
        }
        debug!(selector, ready, expected, total = pods.len(), "pods not ready yet");

        let now = Instant::now();
        if now >= deadline {
            return Ok(ReadinessOutcome::TimedOut {
                elapsed: started.elapsed(),
            });
        }

        select! {
            _ = cancel.cancelled() => return Err(Report::new(WaitError::Cancelled)),
            _ = sleep_until((now + poll_interval).min(deadline)) => {}
        }
    }
}

/// Deploys a vendor device plugin and waits for it to converge.
///
/// `Submitted → grace delay → Polling → {Ready | TimedOut}`; both outcomes
/// are terminal and nothing is retried.
pub(crate) struct ReadinessWaiter<'a> {
    api: &'a dyn ClusterApi,
    settings: ReadinessSettings,
    cancel: CancellationToken,
}

impl<'a> ReadinessWaiter<'a> {
    pub(crate) fn new(
        api: &'a dyn ClusterApi,
        settings: ReadinessSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            settings,
            cancel,
        }
    }

    /// Ready means one Ready plugin pod for each of the `nodes` faked nodes.
    #[tracing::instrument(skip(self, profile), fields(daemonset = profile.daemonset_name))]
    pub(crate) async fn deploy_and_wait(
        &self,
        profile: &VendorProfile,
        image: &str,
        nodes: usize,
    ) -> Result<ReadinessOutcome, Report<WaitError>> {
        let daemonset = device_plugin_daemonset(profile, image);
        self.api
            .apply_daemonset(&daemonset)
            .await
            .change_context(WaitError::Submit {
                kind: "DaemonSet",
                name: profile.daemonset_name.to_string(),
            })?;

        let started = Instant::now();
        info!(
            grace = ?self.settings.grace_delay,
            timeout = ?self.settings.timeout,
            "device plugin submitted"
        );

        self.grace().await?;

        let deadline = started + self.settings.grace_delay + self.settings.timeout;
        let outcome = wait_for_pods_ready(
            self.api,
            PLUGIN_NAMESPACE,
            &profile.pod_selector(),
            nodes,
            started,
            deadline,
            self.settings.poll_interval,
            &self.cancel,
        )
        .await?;

        match outcome {
            ReadinessOutcome::Ready { elapsed } => {
                info!(?elapsed, "device plugin ready");
            }
            ReadinessOutcome::TimedOut { elapsed } => {
                warn!(?elapsed, "device plugin not ready in time");
            }
        }
        Ok(outcome)
    }

    /// Submits a workload elsewhere and waits for its pods, with the same
    /// grace and deadline rules as the device plugin.
    pub(crate) async fn wait_for_selector(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<ReadinessOutcome, Report<WaitError>> {
        let started = Instant::now();
        self.grace().await?;
        let deadline = started + self.settings.grace_delay + self.settings.timeout;
        wait_for_pods_ready(
            self.api,
            namespace,
            selector,
            1,
            started,
            deadline,
            self.settings.poll_interval,
            &self.cancel,
        )
        .await
    }

    async fn grace(&self) -> Result<(), Report<WaitError>> {
        select! {
            _ = self.cancel.cancelled() => Err(Report::new(WaitError::Cancelled)),
            _ = sleep(self.settings.grace_delay) => Ok(()),
        }
    }
}
