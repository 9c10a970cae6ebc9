use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube::api::Api;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{
    error,
    info,
};
use uuid::Uuid;

use crate::error::{
    Error,
    Result,
};
use crate::kube::client::KubeconfigStore;
use crate::kube::forwarder::{
    ForwarderHandles,
    PortForwarder,
};
use crate::kube::monitor::{
    POD_AVAILABILITY_CHECK_INTERVAL,
    PodMonitor,
};
use crate::kube::preflight;
use crate::models::{
    PortForwardRequest,
    Session,
    SessionStatus,
    TargetPort,
    scoped_cluster,
};
use crate::portalloc;
use crate::registry::SessionRegistry;

/// How long a session may take to come up before it is stopped.
pub const PORT_FORWARD_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

const PORT_FORWARD_STOPPED: &str = "Port forward stopped.";

/// Owns every port-forward session of the process: starts them, arbitrates
/// their readiness, watches their pods, and serves stop/list/get.
pub struct PortForwardManager {
    store: KubeconfigStore,
    registry: Arc<SessionRegistry>,
    readiness_timeout: Duration,
    check_interval: Duration,
}

impl PortForwardManager {
    pub fn new(store: KubeconfigStore) -> Self {
        Self::with_registry(store, Arc::new(SessionRegistry::new()))
    }

    /// Builds a manager over an externally owned registry.
    pub fn with_registry(store: KubeconfigStore, registry: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            registry,
            readiness_timeout: PORT_FORWARD_READINESS_TIMEOUT,
            check_interval: POD_AVAILABILITY_CHECK_INTERVAL,
        }
    }

    /// Starts a session and returns its record once the tunnel is ready.
    ///
    /// Failures before the record exists (validation, config, permission,
    /// allocation, forwarder init) leave the registry untouched; failures
    /// after are persisted as a `Stopped` record before this returns.
    pub async fn start(
        &self, cluster: &str, user_id: Option<&str>, token: Option<&str>,
        req: PortForwardRequest,
    ) -> Result<Session> {
        req.validate()?;
        let client = self.store.client_for_context(cluster, token).await?;
        self.start_session(client, cluster, user_id, req).await
    }

    async fn start_session(
        &self, client: Client, cluster: &str, user_id: Option<&str>,
        mut req: PortForwardRequest,
    ) -> Result<Session> {
        req.validate()?;
        let scoped = scoped_cluster(cluster, user_id);

        if req.id.is_empty() {
            req.id = Uuid::new_v4().to_string();
        }

        preflight::check_portforward_permission(client.clone(), &req.namespace, &req.pod)
            .await?;

        let local_port = match req.port.as_str() {
            "" => portalloc::allocate_local_port().await?,
            raw => raw
                .parse::<u16>()
                .map_err(|_| Error::Validation(format!("invalid local port '{raw}'")))?,
        };

        let target_port = TargetPort::parse(&req.target_port);
        let (forwarder, handles) =
            PortForwarder::new(client.clone(), &req.namespace, &req.pod, local_port, target_port);

        let session = Session {
            id: req.id.clone(),
            pod: req.pod.clone(),
            namespace: req.namespace.clone(),
            service: req.service.clone(),
            service_namespace: req.service_namespace.clone(),
            cluster: cluster.to_string(),
            port: local_port.to_string(),
            target_port: req.target_port.clone(),
            status: SessionStatus::Running,
            error: String::new(),
            stop: handles.stop.clone(),
        };
        // Optimistic: overwritten with a terminal state before this method
        // returns if readiness fails.
        self.registry.store(&scoped, &session);

        let (error_tx, error_rx) = mpsc::channel::<String>(1);
        self.spawn_forwarder(forwarder, &scoped, &session, error_tx);

        self.await_ready(&scoped, &session, &handles, error_rx).await?;

        info!(
            id = %session.id,
            cluster,
            pod = %session.pod,
            port = %session.port,
            target_port = %session.target_port,
            "portforward started"
        );
        PodMonitor {
            pods: Api::namespaced(client, &req.namespace),
            registry: self.registry.clone(),
            scoped_cluster: scoped,
            session_id: session.id.clone(),
            namespace: req.namespace.clone(),
            pod_name: req.pod.clone(),
        }
        .spawn(handles.stop, self.check_interval);

        Ok(session)
    }

    /// Runs the forwarder to completion in the background and stamps the
    /// session when it ends while still `Running`.
    fn spawn_forwarder(
        &self, forwarder: PortForwarder, scoped: &str, session: &Session,
        error_tx: mpsc::Sender<String>,
    ) {
        let registry = self.registry.clone();
        let scoped = scoped.to_string();
        let id = session.id.clone();
        let stop = session.stop.clone();

        tokio::spawn(async move {
            let message = match forwarder.run().await {
                Ok(()) => PORT_FORWARD_STOPPED.to_string(),
                Err(e) => {
                    error!(error = %e, id = %id, "portforward task failed");
                    e.to_string()
                }
            };

            if let Ok(mut session) = registry.get(&scoped, &id)
                && session.status == SessionStatus::Running
            {
                session.mark_stopped(&message);
                registry.store(&scoped, &session);
            }
            let _ = error_tx.try_send(message);
            stop.close();
        });
    }

    /// First event wins: readiness, a forwarder error, the timeout, or a
    /// premature stop.
    async fn await_ready(
        &self, scoped: &str, session: &Session, handles: &ForwarderHandles,
        mut error_rx: mpsc::Receiver<String>,
    ) -> Result<()> {
        let failure = tokio::select! {
            biased;
            _ = handles.ready.cancelled() => {
                let stderr = handles
                    .stderr
                    .lock()
                    .map(|buf| buf.clone())
                    .unwrap_or_default();
                if stderr.is_empty() {
                    // Re-persist the running record unless the forwarder
                    // already died and stamped a terminal state.
                    if let Ok(current) = self.registry.get(scoped, &session.id)
                        && current.status == SessionStatus::Running
                    {
                        self.registry.store(scoped, session);
                    }
                    return Ok(());
                }
                format!("portforward failed to start, stderr: {stderr}")
            }
            message = error_rx.recv() => {
                message.unwrap_or_else(|| PORT_FORWARD_STOPPED.to_string())
            }
            _ = time::sleep(self.readiness_timeout) => {
                "timeout waiting for portforward to become ready".to_string()
            }
            _ = session.stop.closed() => {
                // Whoever closed the handle has already persisted the
                // terminal record; report without overwriting it.
                return Err(Error::Readiness(
                    "portforward stopped before becoming ready".to_string(),
                ));
            }
        };

        let mut stopped = session.clone();
        stopped.mark_stopped(&failure);
        self.registry.store(scoped, &stopped);
        session.stop.close();
        Err(Error::Readiness(failure))
    }

    /// Stops the session; with `delete` it is also removed from the
    /// registry, otherwise the terminal record stays observable.
    pub fn stop_or_delete(
        &self, cluster: &str, user_id: Option<&str>, id: &str, delete: bool,
    ) -> Result<()> {
        let scoped = scoped_cluster(cluster, user_id);
        let mut session = self.registry.get(&scoped, id)?;

        if session.status == SessionStatus::Running {
            session.mark_stopped("");
            self.registry.store(&scoped, &session);
        }
        session.stop.close();

        if delete {
            self.registry.delete(&scoped, id);
        }
        info!(id, cluster, delete, "portforward stopped");
        Ok(())
    }

    pub fn list(&self, cluster: &str, user_id: Option<&str>) -> Vec<Session> {
        self.registry.list(&scoped_cluster(cluster, user_id))
    }

    pub fn get(&self, cluster: &str, user_id: Option<&str>, id: &str) -> Result<Session> {
        self.registry.get(&scoped_cluster(cluster, user_id), id)
    }

    /// Closes every session's stop handle; the process is going away, so
    /// forwarders and monitors must exit now.
    pub fn stop_all(&self) {
        for session in self.registry.all() {
            session.stop.close();
        }
    }
}
