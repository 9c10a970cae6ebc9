pub mod error;
pub mod kube;
pub mod manager;
pub mod models;
pub mod portalloc;
pub mod registry;

pub use error::Error;
pub use manager::{
    PORT_FORWARD_READINESS_TIMEOUT,
    PortForwardManager,
};
pub use models::{
    PortForwardRequest,
    Session,
    SessionProjection,
    SessionStatus,
    StopHandle,
    StopOrDeleteRequest,
    scoped_cluster,
};
pub use self::kube::client::KubeconfigStore;
pub use self::kube::monitor::POD_AVAILABILITY_CHECK_INTERVAL;
