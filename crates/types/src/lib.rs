//! Value types shared across walletd crates.

mod config;
mod hash;
mod identifiers;
mod peer;
mod transaction;

pub use config::{
    BootClusterConfig, ConfigError, LightSyncConfig, LogConfig, NodeConfig, RelayConfig,
    UpstreamConfig,
};
pub use hash::{Hash, HexError};
pub use identifiers::{Address, TicketId};
pub use peer::{PeerAddress, PeerAddressError};
pub use transaction::SendTxArgs;
