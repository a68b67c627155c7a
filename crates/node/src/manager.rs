//! Node lifecycle manager.
//!
//! [`NodeManager`] owns at most one running node. All of its state sits
//! behind a single reader/writer lock:
//!
//! - `start`, `stop`, `add_peer` and `populate_static_peers` take the lock
//!   exclusively, since they change manager state or write into the node.
//! - `is_running`, `peer_count`, `node_config`, `rpc_client` and the
//!   sub-service accessors take it shared.
//!
//! Sub-service handles are resolved lazily and cached in
//! [`ArcSwapOption`]s, so a shared-mode accessor can fill the cache. The
//! caches are cleared in the same exclusive section that stops the node.
//!
//! ```text
//!            start ok
//! Stopped ───────────► Running
//!    ▲                    │
//!    └────────────────────┘
//!            stop ok
//! ```

use crate::error::{ManagerError, NodeError, RpcError};
use crate::events::{EventSink, NodeEvent, NullEventSink};
use crate::logging::LogControl;
use crate::rpc::RpcClient;
use crate::services::{LightSyncService, MailService, RelayService};
use crate::traits::{resolve_service, Node, NodeFactory};
use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info, warn};
use walletd_types::{NodeConfig, PeerAddress};

/// Outcome of a static peer population pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct ManagerState {
    node: Option<Box<dyn Node>>,
    config: Option<Arc<NodeConfig>>,
    rpc_client: Option<Arc<RpcClient>>,
    mail: Option<Arc<MailService>>,
    relay: ArcSwapOption<RelayService>,
    light_sync: ArcSwapOption<LightSyncService>,
    /// Bumped on every successful start.
    generation: u64,
}

impl ManagerState {
    /// The node, if it is running and its peer server is up.
    fn available(&self) -> Result<&dyn Node, ManagerError> {
        match &self.node {
            Some(node) if node.server().is_some() => Ok(node.as_ref()),
            _ => Err(ManagerError::NotRunning),
        }
    }

    fn clear(&mut self) {
        self.node = None;
        self.config = None;
        self.rpc_client = None;
        self.mail = None;
        self.relay.store(None);
        self.light_sync.store(None);
    }
}

/// Builder for [`NodeManager`].
pub struct NodeManagerBuilder {
    factory: Arc<dyn NodeFactory>,
    events: Arc<dyn EventSink>,
    log_control: Option<Arc<LogControl>>,
}

impl NodeManagerBuilder {
    /// Sink for lifecycle events. Defaults to [`NullEventSink`].
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Logging control re-applied on every start.
    pub fn log_control(mut self, log_control: Arc<LogControl>) -> Self {
        self.log_control = Some(log_control);
        self
    }

    pub fn build(self) -> Arc<NodeManager> {
        Arc::new_cyclic(|self_ref| NodeManager {
            factory: self.factory,
            events: self.events,
            log_control: self.log_control,
            state: RwLock::new(ManagerState::default()),
            self_ref: self_ref.clone(),
        })
    }
}

/// Manages the lifecycle of a single embedded node.
pub struct NodeManager {
    factory: Arc<dyn NodeFactory>,
    events: Arc<dyn EventSink>,
    log_control: Option<Arc<LogControl>>,
    state: RwLock<ManagerState>,
    self_ref: Weak<NodeManager>,
}

impl NodeManager {
    pub fn builder(factory: Arc<dyn NodeFactory>) -> NodeManagerBuilder {
        NodeManagerBuilder {
            factory,
            events: Arc::new(NullEventSink),
            log_control: None,
        }
    }

    /// Manager with no event sink and no logging control.
    pub fn new(factory: Arc<dyn NodeFactory>) -> Arc<Self> {
        Self::builder(factory).build()
    }

    /// Start a node from `config`.
    ///
    /// On success the node is running, an RPC client is attached and, if
    /// the boot cluster is enabled, static peers are populated on a
    /// background thread. Start and RPC client failures leave the manager
    /// stopped and emit [`NodeEvent::Crashed`].
    pub fn start(&self, config: NodeConfig) -> Result<(), ManagerError> {
        let result = {
            let mut state = self.state.write();
            self.start_locked(&mut state, config)
        };

        match result {
            Ok((generation, config)) => {
                info!(
                    network_id = config.network_id,
                    generation,
                    "Node started"
                );
                self.events.send(NodeEvent::Started);
                if config.boot_cluster.enabled {
                    self.spawn_bootstrap(generation);
                }
                Ok(())
            }
            Err(err) => {
                if matches!(
                    err,
                    ManagerError::StartFailure(_) | ManagerError::ClientInitFailure(_)
                ) {
                    error!(error = %err, "Node failed to start");
                    self.events.send(NodeEvent::Crashed {
                        error: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    fn start_locked(
        &self,
        state: &mut ManagerState,
        config: NodeConfig,
    ) -> Result<(u64, Arc<NodeConfig>), ManagerError> {
        if state.node.is_some() {
            return Err(ManagerError::AlreadyRunning);
        }

        if let Some(log_control) = &self.log_control {
            if let Err(e) = log_control.apply(&config.log) {
                warn!(error = %e, "Failed to apply logging configuration");
            }
        }

        let mut node = self
            .factory
            .make_node(&config)
            .map_err(ManagerError::StartFailure)?;

        let mail = Arc::new(MailService::new(self.self_ref.clone()));
        node.register(mail.clone())
            .map_err(ManagerError::StartFailure)?;
        node.start().map_err(ManagerError::StartFailure)?;

        let client = node
            .attach()
            .map_err(RpcError::Attach)
            .and_then(|transport| RpcClient::new(transport, &config.upstream));
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                if let Err(stop_err) = node.stop() {
                    error!(error = %stop_err, "Failed to stop node after RPC client failure");
                }
                return Err(ManagerError::ClientInitFailure(e));
            }
        };

        let config = Arc::new(config);
        state.clear();
        state.generation += 1;
        state.node = Some(node);
        state.config = Some(Arc::clone(&config));
        state.rpc_client = Some(Arc::new(client));
        state.mail = Some(mail);
        Ok((state.generation, config))
    }

    /// Stop the running node.
    ///
    /// A node stop failure is returned as is and the node stays registered,
    /// so the call can be retried.
    pub fn stop(&self) -> Result<(), ManagerError> {
        {
            let mut state = self.state.write();
            let node = state.node.as_mut().ok_or(ManagerError::NotRunning)?;
            if let Err(e) = node.stop() {
                error!(error = %e, "Node failed to stop");
                return Err(ManagerError::StopFailure(e));
            }
            state.clear();
        }

        info!("Node stopped");
        self.events.send(NodeEvent::Stopped);
        Ok(())
    }

    /// Whether a node is running with its peer server up.
    pub fn is_running(&self) -> bool {
        self.state.read().available().is_ok()
    }

    /// Configuration of the running node.
    pub fn node_config(&self) -> Result<Arc<NodeConfig>, ManagerError> {
        let state = self.state.read();
        state.available()?;
        state.config.clone().ok_or(ManagerError::NotRunning)
    }

    /// Counter of successful starts.
    pub fn run_generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Add a static peer to the running node.
    ///
    /// The address is parsed before anything else, so a malformed address
    /// fails with [`ManagerError::ParseError`] whether or not a node runs.
    pub fn add_peer(&self, url: &str) -> Result<(), ManagerError> {
        let peer: PeerAddress = url.parse()?;

        let state = self.state.write();
        let node = state.available()?;
        let server = node.server().ok_or(ManagerError::NotRunning)?;
        server.add_peer(peer);
        debug!(peer = %peer, "Peer added");
        Ok(())
    }

    /// Number of connected peers; zero when no node is running.
    pub fn peer_count(&self) -> usize {
        let state = self.state.read();
        match state.available() {
            Ok(node) => node.server().map_or(0, |server| server.peer_count()),
            Err(_) => 0,
        }
    }

    /// Message relay service of the running node.
    pub fn relay_service(&self) -> Result<Arc<RelayService>, ManagerError> {
        self.cached_service(|state| &state.relay, ManagerError::RelayUnavailable)
    }

    /// Light sync service of the running node.
    pub fn light_sync_service(&self) -> Result<Arc<LightSyncService>, ManagerError> {
        self.cached_service(|state| &state.light_sync, ManagerError::LightSyncUnavailable)
    }

    fn cached_service<S>(
        &self,
        slot: fn(&ManagerState) -> &ArcSwapOption<S>,
        unavailable: ManagerError,
    ) -> Result<Arc<S>, ManagerError>
    where
        S: Any + Send + Sync,
    {
        let state = self.state.read();
        let node = state.available()?;

        let cache = slot(&state);
        if let Some(service) = cache.load_full() {
            return Ok(service);
        }

        match resolve_service::<S>(node) {
            Ok(Some(service)) => {
                cache.store(Some(Arc::clone(&service)));
                Ok(service)
            }
            Ok(None) => {
                warn!(service = std::any::type_name::<S>(), "Service not provided by node");
                Err(unavailable)
            }
            Err(e) => {
                warn!(service = std::any::type_name::<S>(), error = %e, "Service lookup failed");
                Err(unavailable)
            }
        }
    }

    /// RPC client attached to the running node.
    pub fn rpc_client(&self) -> Result<Arc<RpcClient>, ManagerError> {
        let state = self.state.read();
        state.available()?;
        state.rpc_client.clone().ok_or(ManagerError::NotRunning)
    }

    /// Connect the running node to the configured boot nodes.
    ///
    /// Malformed addresses are logged and skipped; they never fail the pass.
    pub fn populate_static_peers(&self) -> Result<BootstrapReport, ManagerError> {
        let state = self.state.write();
        Self::populate_locked(&state)
    }

    fn populate_locked(state: &ManagerState) -> Result<BootstrapReport, ManagerError> {
        let node = state.available()?;
        let server = node.server().ok_or(ManagerError::NotRunning)?;
        let config = state.config.as_ref().ok_or(ManagerError::NotRunning)?;

        let mut report = BootstrapReport::default();
        if !config.boot_cluster.enabled {
            info!("Boot cluster is disabled");
            return Ok(report);
        }

        for enode in &config.boot_cluster.boot_nodes {
            match enode.parse::<PeerAddress>() {
                Ok(peer) => {
                    server.add_peer(peer);
                    report.added += 1;
                    info!(enode = %peer, "Boot node added");
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(enode = %enode, error = %e, "Boot node addition failed");
                }
            }
        }
        Ok(report)
    }

    fn spawn_bootstrap(&self, generation: u64) {
        let manager = self.self_ref.clone();
        let spawned = thread::Builder::new()
            .name("walletd-bootstrap".into())
            .spawn(move || {
                if let Some(manager) = manager.upgrade() {
                    manager.run_bootstrap(generation);
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn bootstrap thread");
        }
    }

    fn run_bootstrap(&self, generation: u64) {
        let report = {
            let state = self.state.write();
            if state.generation != generation {
                debug!(generation, current = state.generation, "Skipping stale bootstrap");
                return;
            }
            match Self::populate_locked(&state) {
                Ok(report) => report,
                Err(e) => {
                    debug!(error = %e, "Node gone before bootstrap");
                    return;
                }
            }
        };

        info!(
            added = report.added,
            skipped = report.skipped,
            "Bootstrap completed"
        );
        self.events.send(NodeEvent::BootstrapCompleted {
            added: report.added,
            skipped: report.skipped,
        });
    }
}

impl fmt::Debug for NodeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("NodeManager")
            .field("running", &state.node.is_some())
            .field("generation", &state.generation)
            .finish_non_exhaustive()
    }
}
