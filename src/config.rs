//! Configuration for the RPC client and its config provider

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::{debug, info, warn};

use crate::error::Error;
use crate::failover::{FailoverPolicy, RetryPolicy};
use crate::policy::CachePolicy;

/// Comma separated base URLs
pub const KEY_ENDPOINTS: &str = "rpc_endpoints";
/// Per-attempt timeout in milliseconds
pub const KEY_TIMEOUT_MS: &str = "rpc_timeout_ms";
pub const KEY_MAX_RETRIES: &str = "rpc_max_retries";
pub const KEY_CACHE_TTL_SECS: &str = "rpc_cache_ttl_secs";

/// RPC client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig
{   /// Candidate base URLs, in failover order
    pub endpoints: Vec<String>
  , /// Per-attempt timeout
    pub timeout_ms: u64
  , /// Retries after the first attempt
    pub max_retries: usize
  , /// Pause before the first retry; 0 retries immediately
    pub retry_backoff_ms: u64
  , pub backoff_multiplier: f32
  , /// Cursor behaviour after the last endpoint
    pub failover: FailoverPolicy
  , /// Lifetime of raw RPC cache entries
    pub cache_ttl_secs: u64
  , /// Lifetime of data-service cache entries
    pub service_cache_ttl_secs: u64
  , /// Minimum time between cache sweeps
    pub sweep_interval_secs: u64
  , /// How often the backend re-reads its config provider
    pub refresh_interval_secs: u64
  , /// Share one network call between identical concurrent calls
    pub single_flight: bool
  , /// Cache admission rule
    pub cache_policy: CachePolicy
}

impl Default for RpcConfig
{   fn default() -> Self
    {   RpcConfig
        {   endpoints: vec![]
          , timeout_ms: 10_000
          , max_retries: 3
          , retry_backoff_ms: 0
          , backoff_multiplier: 2.0
          , failover: FailoverPolicy::Wrap
          , cache_ttl_secs: 120
          , service_cache_ttl_secs: 60
          , sweep_interval_secs: 60
          , refresh_interval_secs: 300
          , single_flight: true
          , cache_policy: CachePolicy::default()
        }
    }
}

impl RpcConfig
{   pub fn with_endpoints(endpoints: Vec<String>) -> Self
    {   RpcConfig
        {   endpoints
          , ..RpcConfig::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error>
    {   serde_json::from_str(json).map_err(|e| {
          Error::InvalidConfiguration(format!("config JSON: {}", e))
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error>
    {   let path = path.as_ref();
        debug!("Loading RPC config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
          Error::InvalidConfiguration(
            format!("{}: {}", path.display(), e)
          )
        })?;
        RpcConfig::from_json_str(&text)
    }

    pub fn timeout(&self) -> Duration
    {   Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration
    {   Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn service_cache_ttl(&self) -> Duration
    {   Duration::from_secs(self.service_cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration
    {   Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration
    {   Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy
    {   RetryPolicy::new(
          self.max_retries,
          self.backoff_multiplier,
          self.retry_backoff_ms
        )
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> Result<(), Error>
    {   if self.endpoints.is_empty()
        {   return Err(Error::InvalidConfiguration(
              "at least one endpoint is required".to_string()
            ));
        }
        if let Some(bad) = self.endpoints.iter().find(|url| {
          !(url.starts_with("http://") || url.starts_with("https://"))
        })
        {   return Err(Error::InvalidConfiguration(
              format!("endpoint is not an http(s) URL: {}", bad)
            ));
        }
        if self.timeout_ms == 0
        {   return Err(Error::InvalidConfiguration(
              "timeout_ms must be greater than zero".to_string()
            ));
        }
        if self.sweep_interval_secs == 0 || self.refresh_interval_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "sweep and refresh intervals must be greater than zero"
                .to_string()
            ));
        }
        Ok(())
    }

    /// Overlay provider values onto this config. Missing or
    /// unparseable keys keep the current value.
    pub fn apply_provider(
      &self
    , provider: &dyn ConfigProvider
    ) -> RpcConfig
    {   let mut config = self.apply_endpoints(provider);
        config.max_retries
          = parse_or(provider, KEY_MAX_RETRIES, config.max_retries);
        config.cache_ttl_secs
          = parse_or(provider, KEY_CACHE_TTL_SECS, config.cache_ttl_secs);
        config
    }

    /// Overlay only the keys a running backend can change: the
    /// endpoint list and the per-attempt timeout.
    pub fn apply_endpoints(
      &self
    , provider: &dyn ConfigProvider
    ) -> RpcConfig
    {   let mut config = self.clone();

        let endpoints = provider.get(KEY_ENDPOINTS, "");
        let endpoints: Vec<String> = endpoints
          .split(',')
          .map(str::trim)
          .filter(|url| !url.is_empty())
          .map(str::to_string)
          .collect();
        if !endpoints.is_empty()
        {   config.endpoints = endpoints;
        }

        config.timeout_ms
          = parse_or(provider, KEY_TIMEOUT_MS, config.timeout_ms);
        config
    }
}

fn parse_or<V>(
  provider: &dyn ConfigProvider
, key: &str
, current: V
) -> V
where
  V: std::str::FromStr + ToString
{   let raw = provider.get(key, &current.to_string());
    match raw.trim().parse()
    {   Ok(value) => value
      , Err(_) => {
          warn!("Ignoring unparseable {} = {:?}", key, raw);
          current
        }
    }
}

/// Remote or local key/value settings with an explicit refresh.
///
/// All keys are read once at startup. Later refreshes only move the
/// endpoint list and the per-attempt timeout; retry count and cache
/// lifetime stay as the client was built. `refresh` runs on the
/// blocking pool and may do I/O.
pub trait ConfigProvider: Send + Sync
{   /// Value for `key`, or `default` when unset
    fn get(&self, key: &str, default: &str) -> String;

    /// Reload values from the source
    fn refresh(&self) -> Result<(), Error>;

    /// First load, before the backend starts
    fn init(&self) -> Result<(), Error>
    {   self.refresh()
    }
}

/// In-memory provider; `set` changes what the next refresh reports
#[derive(Debug, Default)]
pub struct StaticConfig
{   values: RwLock<HashMap<String, String>>
}

impl StaticConfig
{   pub fn new() -> Self
    {   StaticConfig::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
      I: IntoIterator<Item = (K, V)>
    , K: Into<String>
    , V: Into<String>
    {   let values = pairs.into_iter()
          .map(|(k, v)| (k.into(), v.into()))
          .collect();
        StaticConfig
        {   values: RwLock::new(values)
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>)
    {   self.values
          .write()
          .unwrap_or_else(|poisoned| poisoned.into_inner())
          .insert(key.into(), value.into());
    }
}

impl ConfigProvider for StaticConfig
{   fn get(&self, key: &str, default: &str) -> String
    {   self.values
          .read()
          .unwrap_or_else(|poisoned| poisoned.into_inner())
          .get(key)
          .cloned()
          .unwrap_or_else(|| default.to_string())
    }

    fn refresh(&self) -> Result<(), Error>
    {   Ok(())
    }
}

/// Flat JSON object of settings, re-read from disk on `refresh`.
/// Non-string values are kept in their JSON text form.
#[derive(Debug)]
pub struct JsonFileConfig
{   path: PathBuf
  , values: RwLock<HashMap<String, String>>
}

impl JsonFileConfig
{   /// Load `path` once; fails if it is unreadable
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error>
    {   let provider = JsonFileConfig
        {   path: path.into()
          , values: RwLock::new(HashMap::new())
        };
        provider.refresh()?;
        Ok(provider)
    }

    fn load(&self) -> Result<HashMap<String, String>, Error>
    {   let text = std::fs::read_to_string(&self.path).map_err(|e| {
          Error::InvalidConfiguration(
            format!("{}: {}", self.path.display(), e)
          )
        })?;
        let map: HashMap<String, serde_json::Value>
          = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidConfiguration(
              format!("{}: {}", self.path.display(), e)
            )
          })?;
        Ok(map.into_iter()
          .map(|(k, v)| {
            let v = match v
            {   serde_json::Value::String(s) => s
              , other => other.to_string()
            };
            (k, v)
          })
          .collect())
    }
}

impl ConfigProvider for JsonFileConfig
{   fn get(&self, key: &str, default: &str) -> String
    {   self.values
          .read()
          .unwrap_or_else(|poisoned| poisoned.into_inner())
          .get(key)
          .cloned()
          .unwrap_or_else(|| default.to_string())
    }

    fn refresh(&self) -> Result<(), Error>
    {   let values = self.load()?;
        info!("Loaded {} settings from {}",
          values.len(), self.path.display()
        );
        *self.values
          .write()
          .unwrap_or_else(|poisoned| poisoned.into_inner()) = values;
        Ok(())
    }
}
