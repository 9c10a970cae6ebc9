use tokio::net::TcpListener;
use tracing::debug;

use crate::error::{
    Error,
    Result,
};

/// Asks the OS for a free TCP port on loopback and releases it again.
///
/// The number is advisory: another process can grab it between release and
/// the forwarder's own bind, which then surfaces as a forwarder start
/// error rather than a retry here.
pub async fn allocate_local_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(Error::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(Error::PortAllocation)?
        .port();
    drop(listener);

    debug!(port, "allocated local port");
    Ok(port)
}
