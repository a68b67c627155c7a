//! Embedded node lifecycle management.
//!
//! [`NodeManager`] starts and stops a single node built by a
//! [`NodeFactory`], exposes its peer table, RPC client and sub-services,
//! and reports lifecycle events to an [`EventSink`]. [`TxDispatcher`]
//! connects queued transaction tickets to the running node.
//!
//! # Components
//!
//! - [`traits`] - collaborator boundaries (factory, node, peer server, RPC)
//! - [`NodeManager`] - lifecycle state machine under one reader/writer lock
//! - [`RelayService`], [`LightSyncService`], [`MailService`] - sub-services
//! - [`RpcClient`] - calls into the attached node
//! - [`LogControl`] - level and output switching applied on every start
//! - [`LocalNode`] - in-process backend used by the daemon and tests

mod dispatch;
mod error;
mod events;
mod local;
mod logging;
mod manager;
mod rpc;
mod services;
pub mod traits;

pub use dispatch::TxDispatcher;
pub use error::{DispatchError, LogError, ManagerError, NodeError, RpcError};
pub use events::{ChannelEventSink, EventSink, LogEventSink, NodeEvent, NullEventSink};
pub use local::{LocalNode, LocalNodeFactory, LocalRpc, PeerTable};
pub use logging::{LogControl, LogOutput, LogWriter};
pub use manager::{BootstrapReport, NodeManager, NodeManagerBuilder};
pub use rpc::RpcClient;
pub use services::{LightSyncService, MailService, RelayService};
pub use traits::{Node, NodeFactory, NodeService, PeerServer, RpcTransport};
