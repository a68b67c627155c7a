//! RPC client bound to a running node.

use crate::error::RpcError;
use crate::traits::RpcTransport;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use walletd_types::UpstreamConfig;

/// Client for issuing RPC calls into the running node.
///
/// Calls go through the node's in-process transport. When an upstream
/// endpoint is configured it is validated here and exposed for the
/// transport layer that forwards remote-only methods.
pub struct RpcClient {
    local: Arc<dyn RpcTransport>,
    upstream: Option<String>,
}

impl RpcClient {
    /// Bind a client to an attached transport.
    pub fn new(local: Arc<dyn RpcTransport>, upstream: &UpstreamConfig) -> Result<Self, RpcError> {
        let upstream = if upstream.enabled {
            let url = upstream.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) || url.len() < 8 {
                return Err(RpcError::InvalidUpstream(upstream.url.clone()));
            }
            Some(url.to_string())
        } else {
            None
        };
        Ok(Self { local, upstream })
    }

    /// Configured upstream endpoint, if any.
    pub fn upstream_url(&self) -> Option<&str> {
        self.upstream.as_deref()
    }

    /// Raw JSON-RPC call.
    pub fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        debug!(method, "RPC call");
        self.local.call(method, params)
    }

    /// JSON-RPC call with a typed result.
    pub fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}
