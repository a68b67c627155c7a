//! Sub-service handles and the offline mailbox service.

use crate::error::{ManagerError, NodeError};
use crate::manager::NodeManager;
use crate::traits::NodeService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Handle to the node's message relay protocol.
#[derive(Debug)]
pub struct RelayService {
    protocol_version: u32,
}

impl RelayService {
    pub const PROTOCOL_VERSION: u32 = 5;

    pub fn new() -> Self {
        Self {
            protocol_version: Self::PROTOCOL_VERSION,
        }
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }
}

impl Default for RelayService {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the node's light-client sync protocol.
#[derive(Debug)]
pub struct LightSyncService {
    network_id: u64,
}

impl LightSyncService {
    pub fn new(network_id: u64) -> Self {
        Self { network_id }
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }
}

/// Offline mailbox service.
///
/// Registered with every node before it starts so it is present from the
/// node's first moment. Reaches the relay protocol through the manager;
/// holds only a weak reference so the manager and node do not keep each
/// other alive.
#[derive(Debug)]
pub struct MailService {
    manager: Weak<NodeManager>,
    running: AtomicBool,
}

impl MailService {
    pub const NAME: &'static str = "mailservice";

    pub fn new(manager: Weak<NodeManager>) -> Self {
        Self {
            manager,
            running: AtomicBool::new(false),
        }
    }

    /// Whether the owning node has started this service.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Relay service of the running node.
    pub fn relay(&self) -> Result<Arc<RelayService>, ManagerError> {
        let manager = self.manager.upgrade().ok_or(ManagerError::NotRunning)?;
        manager.relay_service()
    }
}

impl NodeService for MailService {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn start(&self) -> Result<(), NodeError> {
        self.running.store(true, Ordering::Release);
        info!("Mail service started");
        Ok(())
    }

    fn stop(&self) -> Result<(), NodeError> {
        self.running.store(false, Ordering::Release);
        debug!("Mail service stopped");
        Ok(())
    }
}
