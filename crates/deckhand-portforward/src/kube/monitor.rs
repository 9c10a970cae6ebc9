use std::io;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use tracing::{
    debug,
    error,
    warn,
};

use crate::models::{
    SessionStatus,
    StopHandle,
};
use crate::registry::SessionRegistry;

/// Cadence of the per-session pod liveness probe.
pub const POD_AVAILABILITY_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Watches one session's pod and stops the session when the pod stops
/// being `Running`.
///
/// Spawned only after a session reaches readiness; exits within one tick
/// of the stop handle closing.
pub(crate) struct PodMonitor {
    pub(crate) pods: Api<Pod>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) scoped_cluster: String,
    pub(crate) session_id: String,
    pub(crate) namespace: String,
    pub(crate) pod_name: String,
}

impl PodMonitor {
    pub(crate) fn spawn(self, stop: StopHandle, period: Duration) {
        tokio::spawn(self.watch(stop, period));
    }

    async fn watch(self, stop: StopHandle, period: Duration) {
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = stop.closed() => {
                    debug!(id = %self.session_id, "pod monitor exiting");
                    return;
                }
                _ = ticker.tick() => {
                    let read = tokio::select! {
                        _ = stop.closed() => {
                            debug!(id = %self.session_id, "pod monitor exiting");
                            return;
                        }
                        read = self.pods.get(&self.pod_name) => read,
                    };
                    match read {
                        Ok(pod) if pod_is_running(&pod) => {}
                        Ok(pod) => {
                            let phase = pod
                                .status
                                .and_then(|status| status.phase)
                                .unwrap_or_else(|| "Unknown".to_string());
                            self.fail(&stop, format!("pod phase is {phase}"));
                            return;
                        }
                        Err(e) if is_connection_refused(&e) => {
                            // Transient control-plane unavailability.
                            warn!(error = %e, pod = %self.pod_name, "pod check skipped");
                        }
                        Err(e) => {
                            self.fail(&stop, e.to_string());
                            return;
                        }
                    }
                }
            }
        }
    }

    fn fail(&self, stop: &StopHandle, cause: String) {
        let message = format!(
            "Pod {}/{} check failed: {cause}",
            self.namespace, self.pod_name
        );
        error!(id = %self.session_id, "{message}");

        if let Ok(mut session) = self.registry.get(&self.scoped_cluster, &self.session_id)
            && session.status == SessionStatus::Running
        {
            session.mark_stopped(&message);
            self.registry.store(&self.scoped_cluster, &session);
        }
        stop.close();
    }
}

fn pod_is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

/// An ECONNREFUSED anywhere in the error's source chain.
fn is_connection_refused(err: &kube::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        source = current.source();
    }
    false
}
