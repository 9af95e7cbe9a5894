//! marketrpc: resilient JSON RPC client for the market-data backend.
//!
//! Calls go out as `POST { "method": ..., "params": [...] }` to the
//! active endpoint. Transient failures rotate to the next endpoint
//! under a fixed attempt budget, and admissible results are kept in a
//! TTL cache.
//!
//! ```text
//! marketrpc/
//! ├── src/
//! │   ├── lib.rs          # Re-exports and backend command types
//! │   ├── error.rs        # Error taxonomy and numeric codes
//! │   ├── request.rs      # Wire envelopes and cache keys
//! │   ├── policy.rs       # Cache admission
//! │   ├── cache.rs        # TTL cache
//! │   ├── failover.rs     # Endpoint registry, retry policy, budget
//! │   ├── transport.rs    # One HTTP attempt (reqwest)
//! │   ├── classify.rs     # Success / retryable / fatal
//! │   ├── singleflight.rs # Coalescing of identical calls
//! │   ├── client.rs       # Call orchestrator
//! │   ├── config.rs       # RpcConfig and config providers
//! │   ├── backend.rs      # Actor owning the client lifecycle
//! │   └── service.rs      # Data-service cache tier
//! └── tests/
//! ```

pub mod error;
pub mod request;
pub mod policy;
pub mod cache;
pub mod failover;
pub mod transport;
pub mod classify;
pub mod singleflight;
pub mod client;
pub mod config;
pub mod backend;
pub mod service;

pub use backend::RpcBackend;
pub use cache::TtlCache;
pub use client::RpcClient;
pub use config::{ConfigProvider, JsonFileConfig, RpcConfig, StaticConfig};
pub use error::{ApplicationCode, Error, TransportKind};
pub use failover::{EndpointRegistry, FailoverPolicy, SharedEndpoints};
pub use policy::CachePolicy;
pub use request::RequestEnvelope;
pub use service::DataService;
pub use transport::{HttpReply, HttpTransport, Transport, TransportFailure};

/// Install `env_logger` (honours `RUST_LOG`). Safe to call twice.
pub fn init_logger()
{   let _ = env_logger::try_init();
}

/// RPC BACKEND INTERFACE:

// ===== Call =====

pub type CallReply = Result<serde_json::Value, crate::error::Error>;
pub type CallReplySender
  = tokio::sync::mpsc::UnboundedSender<CallReply>;

pub struct CallArgs
{   pub method: String
  , pub params: Vec<serde_json::Value>
  , pub reply: CallReplySender
}

// ===== ClearCache =====

pub type ClearCacheReply = Result<(), crate::error::Error>;
pub type ClearCacheReplySender
  = tokio::sync::mpsc::UnboundedSender<ClearCacheReply>;

pub struct ClearCacheArgs
{   pub reply: ClearCacheReplySender
}

// ===== RefreshConfig =====

pub type RefreshConfigReply = Result<(), crate::error::Error>;
pub type RefreshConfigReplySender
  = tokio::sync::mpsc::UnboundedSender<RefreshConfigReply>;

pub struct RefreshConfigArgs
{   pub reply: RefreshConfigReplySender
}

// ===== KillProcess =====

pub type KillProcessReply = Result<(), crate::error::Error>;
pub type KillProcessReplySender
  = tokio::sync::mpsc::UnboundedSender<KillProcessReply>;

pub struct KillProcessArgs
{   pub reply: KillProcessReplySender
}

// ===== RpcHand (sender side) =====

pub struct RpcHand
{   pub call_tx
      : tokio::sync::mpsc::UnboundedSender<CallArgs>
  , pub clear_cache_tx
      : tokio::sync::mpsc::UnboundedSender<ClearCacheArgs>
  , pub refresh_config_tx
      : tokio::sync::mpsc::UnboundedSender<RefreshConfigArgs>
  , pub kill_process_tx
      : tokio::sync::mpsc::UnboundedSender<KillProcessArgs>
}

// ===== RpcFoot (receiver side) =====

pub struct RpcFoot
{   pub call_rx
      : tokio::sync::mpsc::UnboundedReceiver<CallArgs>
  , pub clear_cache_rx
      : tokio::sync::mpsc::UnboundedReceiver<ClearCacheArgs>
  , pub refresh_config_rx
      : tokio::sync::mpsc::UnboundedReceiver<RefreshConfigArgs>
  , pub kill_process_rx
      : tokio::sync::mpsc::UnboundedReceiver<KillProcessArgs>
}
