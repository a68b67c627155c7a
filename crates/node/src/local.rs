//! In-process node backend.
//!
//! [`LocalNode`] implements every collaborator trait without networking:
//! peers are recorded in a bounded table, sub-services live in a registry
//! keyed by type and RPC is answered by an in-memory dispatcher.

use crate::error::{NodeError, RpcError};
use crate::services::{LightSyncService, RelayService};
use crate::traits::{Node, NodeFactory, NodeService, PeerServer, RpcTransport};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walletd_types::{Hash, NodeConfig, PeerAddress, SendTxArgs};

/// Builds [`LocalNode`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalNodeFactory;

impl NodeFactory for LocalNodeFactory {
    fn make_node(&self, config: &NodeConfig) -> Result<Box<dyn Node>, NodeError> {
        config
            .validate()
            .map_err(|e| NodeError::Backend(e.to_string()))?;
        Ok(Box::new(LocalNode::new(config.clone())))
    }
}

/// Bounded static peer table.
#[derive(Debug)]
pub struct PeerTable {
    peers: RwLock<HashMap<[u8; 64], PeerAddress>>,
    max_peers: usize,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    /// Snapshot of the known peers.
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.peers.read().values().cloned().collect()
    }
}

impl PeerServer for PeerTable {
    fn add_peer(&self, peer: PeerAddress) {
        let mut peers = self.peers.write();
        if !peers.contains_key(peer.node_id()) && peers.len() >= self.max_peers {
            warn!(peer = %peer, max_peers = self.max_peers, "Peer table full, dropping peer");
            return;
        }
        debug!(peer = %peer, "Static peer added");
        peers.insert(*peer.node_id(), peer);
    }

    fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

/// JSON-RPC dispatcher of a running [`LocalNode`].
pub struct LocalRpc {
    network_id: u64,
    peers: Arc<PeerTable>,
    sent: AtomicU64,
}

impl LocalRpc {
    fn send_transaction(&self, params: Value) -> Result<Value, RpcError> {
        let args = match params {
            Value::Array(mut items) if items.len() == 1 => items.remove(0),
            _ => {
                return Err(RpcError::InvalidParams(
                    "expected a single transaction object".into(),
                ))
            }
        };
        let args: SendTxArgs =
            serde_json::from_value(args).map_err(|e| RpcError::InvalidParams(e.to_string()))?;

        if args.from.0 == [0u8; 20] {
            return Err(RpcError::Rejected("unknown account".into()));
        }

        let seq = self.sent.fetch_add(1, Ordering::Relaxed);
        let mut preimage = serde_json::to_vec(&args)?;
        preimage.extend_from_slice(&seq.to_le_bytes());
        let hash = Hash::from_bytes(&preimage);

        info!(hash = %hash, from = %args.from, value = args.value, "Transaction sent");
        Ok(serde_json::to_value(hash)?)
    }
}

impl RpcTransport for LocalRpc {
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "web3_clientVersion" => Ok(json!(format!(
                "walletd/v{}",
                env!("CARGO_PKG_VERSION")
            ))),
            "net_version" => Ok(json!(self.network_id.to_string())),
            "net_peerCount" => Ok(json!(format!("{:#x}", self.peers.peer_count()))),
            "eth_sendTransaction" => self.send_transaction(params),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

struct Running {
    peers: Arc<PeerTable>,
    rpc: Arc<LocalRpc>,
    registry: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// In-process node.
pub struct LocalNode {
    config: NodeConfig,
    services: Vec<Arc<dyn NodeService>>,
    running: Option<Running>,
}

impl LocalNode {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            services: Vec::new(),
            running: None,
        }
    }

    /// Names of registered auxiliary services, in registration order.
    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    fn stop_services(services: &[Arc<dyn NodeService>]) -> Result<(), NodeError> {
        let mut first_err = None;
        for service in services.iter().rev() {
            if let Err(e) = service.stop() {
                warn!(service = service.name(), error = %e, "Service failed to stop");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Node for LocalNode {
    fn register(&mut self, service: Arc<dyn NodeService>) -> Result<(), NodeError> {
        if self.running.is_some() {
            return Err(NodeError::RegistrationClosed);
        }
        debug!(service = service.name(), "Service registered");
        self.services.push(service);
        Ok(())
    }

    fn start(&mut self) -> Result<(), NodeError> {
        if self.running.is_some() {
            return Err(NodeError::AlreadyStarted);
        }

        for (started, service) in self.services.iter().enumerate() {
            if let Err(e) = service.start() {
                if let Err(rollback) = Self::stop_services(&self.services[..started]) {
                    warn!(
                        service = service.name(),
                        error = %e,
                        rollback_error = %rollback,
                        "Service start failed and rollback did not complete"
                    );
                }
                return Err(e);
            }
        }

        let mut registry: HashMap<TypeId, Arc<dyn Any + Send + Sync>> = HashMap::new();
        if self.config.relay.enabled {
            registry.insert(TypeId::of::<RelayService>(), Arc::new(RelayService::new()));
        }
        if self.config.light_sync.enabled {
            registry.insert(
                TypeId::of::<LightSyncService>(),
                Arc::new(LightSyncService::new(self.config.network_id)),
            );
        }

        let peers = Arc::new(PeerTable::new(self.config.max_peers));
        let rpc = Arc::new(LocalRpc {
            network_id: self.config.network_id,
            peers: Arc::clone(&peers),
            sent: AtomicU64::new(0),
        });

        info!(
            network_id = self.config.network_id,
            listen_addr = %self.config.listen_addr,
            services = self.services.len(),
            "Local node started"
        );
        self.running = Some(Running {
            peers,
            rpc,
            registry,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        if self.running.is_none() {
            return Err(NodeError::NotStarted);
        }
        Self::stop_services(&self.services)?;
        self.running = None;
        info!("Local node stopped");
        Ok(())
    }

    fn attach(&self) -> Result<Arc<dyn RpcTransport>, NodeError> {
        let running = self.running.as_ref().ok_or(NodeError::NotStarted)?;
        Ok(running.rpc.clone())
    }

    fn server(&self) -> Option<Arc<dyn PeerServer>> {
        self.running
            .as_ref()
            .map(|running| running.peers.clone() as Arc<dyn PeerServer>)
    }

    fn service(&self, type_id: TypeId) -> Result<Option<Arc<dyn Any + Send + Sync>>, NodeError> {
        let running = self.running.as_ref().ok_or(NodeError::NotStarted)?;
        Ok(running.registry.get(&type_id).cloned())
    }
}
