use k8s_openapi::api::core::v1::Pod;
use serde::{
    Deserialize,
    Serialize,
};
use tokio_util::sync::CancellationToken;

use crate::error::{
    Error,
    Result,
};

/// Registry scope for one caller: the cluster name suffixed with the
/// caller's user id when the request carries one.
pub fn scoped_cluster(cluster: &str, user_id: Option<&str>) -> String {
    match user_id {
        Some(user_id) if !user_id.is_empty() => format!("{cluster}{user_id}"),
        _ => cluster.to_string(),
    }
}

/// Close-once broadcast handle shared by every task of one session.
///
/// Closing is idempotent; clones observe the same signal.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Signals every task of the session to exit. Safe to call any number
    /// of times, from any task.
    pub fn close(&self) {
        self.0.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn closed(&self) {
        self.0.cancelled().await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Stopped,
}

/// One port-forward, live or terminal, as stored in the registry and served
/// to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub pod: String,
    pub namespace: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub service_namespace: String,
    pub cluster: String,
    pub port: String,
    pub target_port: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub error: String,
    #[serde(skip, default)]
    pub stop: StopHandle,
}

impl Session {
    /// Moves the record to its terminal state. Status never leaves
    /// `Stopped` once set.
    pub fn mark_stopped(&mut self, error: impl Into<String>) {
        self.status = SessionStatus::Stopped;
        self.error = error.into();
    }

    pub fn projection(&self) -> SessionProjection {
        SessionProjection {
            id: self.id.clone(),
            pod: self.pod.clone(),
            service: self.service.clone(),
            cluster: self.cluster.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// The reduced view served by the get-by-id endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProjection {
    pub id: String,
    pub pod: String,
    pub service: String,
    pub cluster: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortForwardRequest {
    pub id: String,
    pub namespace: String,
    pub pod: String,
    pub service: String,
    pub service_namespace: String,
    pub target_port: String,
    pub port: String,
}

impl PortForwardRequest {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Validation("namespace is required".to_string()));
        }
        if self.pod.is_empty() {
            return Err(Error::Validation("pod name is required".to_string()));
        }
        if self.target_port.is_empty() {
            return Err(Error::Validation("targetPort is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopOrDeleteRequest {
    pub id: String,
    pub stop_or_delete: bool,
}

impl StopOrDeleteRequest {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("id is required".to_string()));
        }
        Ok(())
    }
}

/// A container port as requested by the client: numeric, or named and
/// resolved against the pod spec.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

impl TargetPort {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<u16>() {
            Ok(port) => Self::Number(port),
            Err(_) => Self::Name(raw.to_string()),
        }
    }

    pub fn number_in(&self, pod: &Pod) -> Result<u16> {
        match self {
            Self::Number(port) => Ok(*port),
            Self::Name(name) => pod
                .spec
                .as_ref()
                .and_then(|spec| {
                    spec.containers
                        .iter()
                        .filter_map(|container| container.ports.as_ref())
                        .flatten()
                        .find(|p| p.name.as_deref() == Some(name))
                        .map(|p| p.container_port as u16)
                })
                .ok_or_else(|| {
                    Error::ForwarderInit(format!("port '{name}' not found in pod"))
                }),
        }
    }
}
