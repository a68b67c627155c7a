//! Boundary traits for the embedded node.
//!
//! The manager never talks to a concrete node implementation. A
//! [`NodeFactory`] builds a [`Node`] from configuration; the node exposes
//! start/stop, a local RPC attachment, its peer server and a lookup of the
//! sub-services it runs.

use crate::error::{NodeError, RpcError};
use std::any::{Any, TypeId};
use std::sync::Arc;
use walletd_types::{NodeConfig, PeerAddress};

/// Builds runnable node instances.
pub trait NodeFactory: Send + Sync {
    /// Construct a node from `config`. The node is not started.
    fn make_node(&self, config: &NodeConfig) -> Result<Box<dyn Node>, NodeError>;
}

/// A runnable node instance.
///
/// # Lifecycle
///
/// ```text
/// make_node ─► register* ─► start ─► (attach | server | service)* ─► stop
/// ```
///
/// A stopped node is not restarted; the manager builds a fresh one.
pub trait Node: Send + Sync {
    /// Register an auxiliary service. Only valid before `start`.
    fn register(&mut self, service: Arc<dyn NodeService>) -> Result<(), NodeError>;

    /// Start the node and every registered service.
    fn start(&mut self) -> Result<(), NodeError>;

    /// Stop the node and every registered service.
    fn stop(&mut self) -> Result<(), NodeError>;

    /// Open an in-process RPC connection.
    fn attach(&self) -> Result<Arc<dyn RpcTransport>, NodeError>;

    /// The P2P server, present only while the node is running.
    fn server(&self) -> Option<Arc<dyn PeerServer>>;

    /// Look up a running sub-service by type.
    ///
    /// `Ok(None)` means the node does not run a service of that type.
    fn service(&self, type_id: TypeId) -> Result<Option<Arc<dyn Any + Send + Sync>>, NodeError>;
}

/// Resolve a sub-service by its concrete type.
pub fn resolve_service<S>(node: &dyn Node) -> Result<Option<Arc<S>>, NodeError>
where
    S: Any + Send + Sync,
{
    match node.service(TypeId::of::<S>())? {
        Some(service) => Ok(service.downcast::<S>().ok()),
        None => Ok(None),
    }
}

/// Peer table of a running node. Internally synchronised.
pub trait PeerServer: Send + Sync {
    /// Add a static peer.
    fn add_peer(&self, peer: PeerAddress);

    /// Number of connected peers.
    fn peer_count(&self) -> usize;
}

/// In-process JSON-RPC connection.
pub trait RpcTransport: Send + Sync {
    fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError>;
}

/// Auxiliary service run by the node alongside its built-in protocols.
pub trait NodeService: Send + Sync {
    /// Short service name for logs.
    fn name(&self) -> &'static str;

    /// Called when the node starts.
    fn start(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Called when the node stops.
    fn stop(&self) -> Result<(), NodeError> {
        Ok(())
    }
}
