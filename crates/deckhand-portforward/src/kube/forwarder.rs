use std::sync::{
    Arc,
    Mutex,
};

use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::Api;
use tokio::net::{
    TcpListener,
    TcpStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    trace,
};

use crate::error::{
    Error,
    Result,
};
use crate::models::{
    StopHandle,
    TargetPort,
};

/// Signals and buffers the readiness arbiter observes for one forwarder.
pub struct ForwarderHandles {
    /// Closed once the tunnel is live.
    pub ready: CancellationToken,
    /// Setup diagnostics; read once when `ready` closes, write-only after.
    pub stderr: Arc<Mutex<String>>,
    /// Closing stops the forwarder and every other task of the session.
    pub stop: StopHandle,
}

/// One session's tunnel: a loopback listener whose connections are each
/// relayed to the pod's portforward subresource.
pub struct PortForwarder {
    pods: Api<Pod>,
    namespace: String,
    pod_name: String,
    local_port: u16,
    target_port: TargetPort,
    ready: CancellationToken,
    stop: StopHandle,
    stderr: Arc<Mutex<String>>,
}

impl PortForwarder {
    /// Builds the forwarder plus the handles its owner arbitrates on.
    pub fn new(
        client: Client, namespace: &str, pod_name: &str, local_port: u16,
        target_port: TargetPort,
    ) -> (Self, ForwarderHandles) {
        let ready = CancellationToken::new();
        let stop = StopHandle::new();
        let stderr = Arc::new(Mutex::new(String::new()));

        let handles = ForwarderHandles {
            ready: ready.clone(),
            stderr: stderr.clone(),
            stop: stop.clone(),
        };
        let forwarder = Self {
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            local_port,
            target_port,
            ready,
            stop,
            stderr,
        };
        (forwarder, handles)
    }

    /// Drives the tunnel until the stop handle closes or setup fails.
    ///
    /// Readiness is signalled only after the local listener is bound and
    /// one probe connection to the pod has been answered, so a dead target
    /// fails the session instead of its first client connection.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", self.local_port))
            .await
            .map_err(|e| {
                Error::ForwarderInit(format!(
                    "failed to bind 127.0.0.1:{}: {e}",
                    self.local_port
                ))
            })?;

        let pod_port = tokio::select! {
            _ = self.stop.closed() => {
                debug!(pod = %self.pod_name, "portforward stopped during setup");
                return Ok(());
            }
            resolved = self.setup() => resolved?,
        };
        self.ready.cancel();
        info!(
            local_port = self.local_port,
            pod_port,
            pod = %self.pod_name,
            "portforward ready"
        );

        loop {
            tokio::select! {
                _ = self.stop.closed() => {
                    debug!(pod = %self.pod_name, local_port = self.local_port, "portforward stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (conn, peer_addr) = accepted?;
                    trace!(%peer_addr, "new connection");

                    let pods = self.pods.clone();
                    let pod_name = self.pod_name.clone();
                    let stderr = self.stderr.clone();
                    tokio::spawn(async move {
                        if let Err(e) = forward_connection(&pods, &pod_name, pod_port, conn).await {
                            error!(error = %e, pod = %pod_name, "failed to forward connection");
                            if let Ok(mut buf) = stderr.lock() {
                                buf.push_str(&e.to_string());
                                buf.push('\n');
                            }
                        }
                    });
                }
            }
        }
    }

    /// Resolves the concrete pod port and answers one probe connection.
    async fn setup(&self) -> Result<u16> {
        let pod_port = self.resolve_target_port().await?;
        self.probe(pod_port).await?;
        Ok(pod_port)
    }

    async fn resolve_target_port(&self) -> Result<u16> {
        match &self.target_port {
            TargetPort::Number(port) => Ok(*port),
            TargetPort::Name(_) => {
                let pod = self.pods.get(&self.pod_name).await.map_err(|e| {
                    Error::ForwarderInit(format!(
                        "failed to read pod {}/{}: {e}",
                        self.namespace, self.pod_name
                    ))
                })?;
                self.target_port.number_in(&pod)
            }
        }
    }

    /// Opens and drops one upstream stream before readiness is reported.
    async fn probe(&self, pod_port: u16) -> Result<()> {
        let mut forwarder = self
            .pods
            .portforward(&self.pod_name, &[pod_port])
            .await
            .map_err(|e| {
                Error::ForwarderInit(format!(
                    "portforward to pod {}/{} failed: {e}",
                    self.namespace, self.pod_name
                ))
            })?;

        match forwarder.take_stream(pod_port) {
            Some(stream) => drop(stream),
            None => {
                // Upgrade accepted but the stream for the port is missing;
                // the arbiter reads this when ready closes.
                if let Ok(mut buf) = self.stderr.lock() {
                    buf.push_str(&format!("port {pod_port} not found in forwarder"));
                }
            }
        }
        Ok(())
    }
}

async fn forward_connection(
    pods: &Api<Pod>, pod_name: &str, pod_port: u16, mut client_conn: TcpStream,
) -> Result<()> {
    let mut forwarder = pods.portforward(pod_name, &[pod_port]).await?;
    let mut upstream_conn = forwarder
        .take_stream(pod_port)
        .ok_or_else(|| Error::ForwarderInit("port not found in forwarder".to_string()))?;

    if let Err(error) = tokio::io::copy_bidirectional(&mut client_conn, &mut upstream_conn).await {
        trace!(pod_port, pod_name, ?error, "connection error");
    }

    drop(upstream_conn);
    if let Err(e) = forwarder.join().await {
        debug!(pod_port, pod_name, error = %e, "forwarder closed with error");
    }
    debug!(pod_port, pod_name, "connection closed");
    Ok(())
}
