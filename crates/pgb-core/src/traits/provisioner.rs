//! Tunnel provisioner trait

use crate::config::Target;
use crate::error::BrokerError;
use crate::types::TunnelHandle;

/// Creates and tears down credential-brokered tunnels
pub trait TunnelProvisioner {
    /// Authenticate against the target's controller and start a tunnel
    fn start(
        &self,
        target: &Target,
        auth_scope: &str,
        target_scope: &str,
        auth_method: &str,
    ) -> Result<TunnelHandle, BrokerError>;

    /// Terminate every tunnel process on the host
    ///
    /// Returns the number of processes found. This deliberately ignores
    /// fragment bookkeeping so tunnels whose fragment was lost are caught too.
    fn shutdown_all(&self) -> Result<usize, BrokerError>;
}
