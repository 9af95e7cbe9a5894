use std::sync::Arc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use log::{debug, error, info, warn};

use crate::client::RpcClient;
use crate::config::{ConfigProvider, RpcConfig};
use crate::failover::SharedEndpoints;
use crate::transport::{HttpTransport, Transport};
use crate::RpcFoot;

/// Owns an `RpcClient` for the life of the process.
///
/// Each call runs on its own task. The loop also sweeps the cache and
/// re-reads the config provider on their own cadences.
pub struct RpcBackend<T: Transport = HttpTransport>
{   hand: crate::RpcHand
  , client: Arc<RpcClient<T, SharedEndpoints>>
  , _task_handle: tokio::task::JoinHandle<()>
}

impl RpcBackend<HttpTransport>
{   /// Create and spawn a backend using reqwest.
    /// Returns immediately; must be called inside a tokio runtime.
    pub fn new(
      config: RpcConfig
    , provider: Option<Arc<dyn ConfigProvider>>
    ) -> Result<Self, crate::error::Error>
    {   RpcBackend::with_transport(HttpTransport::new(), config, provider)
    }
}

impl<T: Transport> RpcBackend<T>
{   pub fn with_transport(
      transport: T
    , base_config: RpcConfig
    , provider: Option<Arc<dyn ConfigProvider>>
    ) -> Result<Self, crate::error::Error>
    {   debug!("Creating RpcBackend with task ownership");

        let config = match &provider
        {   Some(provider) => {
              if let Err(e) = provider.init()
              {   warn!("Config provider init failed: {}", e);
              }
              base_config.apply_provider(&**provider)
            }
          , None => base_config.clone()
        };
        config.validate()?;

        let endpoints = Arc::new(SharedEndpoints::new(
          config.endpoints.clone(),
          config.failover,
          config.timeout()
        ));
        let client = Arc::new(
          RpcClient::with_parts(transport, endpoints, &config)
        );

        let (call_tx, call_rx)
          = mpsc::unbounded_channel();
        let (clear_cache_tx, clear_cache_rx)
          = mpsc::unbounded_channel();
        let (refresh_config_tx, refresh_config_rx)
          = mpsc::unbounded_channel();
        let (kill_process_tx, kill_process_rx)
          = mpsc::unbounded_channel();

        let hand = crate::RpcHand
        {   call_tx
          , clear_cache_tx
          , refresh_config_tx
          , kill_process_tx
        };

        let foot = crate::RpcFoot
        {   call_rx
          , clear_cache_rx
          , refresh_config_rx
          , kill_process_rx
        };

        let loop_client = client.clone();
        let _task_handle = tokio::spawn(async move {
          run_backend_loop(foot, loop_client, base_config, provider).await
        });

        Ok(RpcBackend
        {   hand
          , client
          , _task_handle
        })
    }

    /// Direct access to the client, bypassing the command queue
    pub fn client(&self) -> &Arc<RpcClient<T, SharedEndpoints>>
    {   &self.client
    }

    /// Queue a call - returns almost immediately
    pub async fn call(
      &self
    , method: impl Into<String>
    , params: Vec<Value>
    ) -> Result<
        mpsc::UnboundedReceiver<crate::CallReply>,
        crate::error::Error
      >
    {   let method = method.into();
        debug!("call queuing command for method: {}", method);
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::CallArgs
        {   method
          , params
          , reply: reply_tx
        };

        self.hand.call_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Disconnected
          })?;

        Ok(reply_rx)
    }

    /// Queue a call and wait for its reply
    pub async fn call_and_wait(
      &self
    , method: impl Into<String>
    , params: Vec<Value>
    ) -> crate::CallReply
    {   let mut reply_rx = self.call(method, params).await?;
        reply_rx.recv()
          .await
          .unwrap_or(Err(crate::error::Error::Disconnected))
    }

    /// Drop every raw cache entry - returns almost immediately
    pub async fn clear_cache(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::ClearCacheReply>,
        crate::error::Error
      >
    {   debug!("clear_cache queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        self.hand.clear_cache_tx
          .send(crate::ClearCacheArgs { reply: reply_tx })
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Disconnected
          })?;

        Ok(reply_rx)
    }

    /// Re-read the config provider now - returns almost immediately
    pub async fn refresh_config(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::RefreshConfigReply>,
        crate::error::Error
      >
    {   debug!("refresh_config queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        self.hand.refresh_config_tx
          .send(crate::RefreshConfigArgs { reply: reply_tx })
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Disconnected
          })?;

        Ok(reply_rx)
    }

    /// Gracefully shutdown the backend.
    /// Calls already running finish on their own tasks.
    pub async fn shutdown(self)
      -> Result<(), crate::error::Error>
    {   debug!("Shutting down RpcBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::KillProcessArgs
        {   reply: reply_tx
        };

        self.hand.kill_process_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel already closed");
            crate::error::Error::Disconnected
          })?;

        if let Some(result) = reply_rx.recv().await
        {   debug!("Backend shutdown confirmed");
            result
        } else
        {   error!("Backend exited without confirming shutdown");
            Err(crate::error::Error::Disconnected)
        }
    }
}

/// Push the provider's current endpoints and timeout into the registry
fn refresh_endpoints<T: Transport>(
  client: &RpcClient<T, SharedEndpoints>
, base_config: &RpcConfig
, provider: Option<&dyn ConfigProvider>
) -> Result<(), crate::error::Error>
{   let Some(provider) = provider else
    {   debug!("No config provider, nothing to refresh");
        return Ok(());
    };
    provider.refresh()?;
    let config = base_config.apply_endpoints(provider);
    config.validate()?;
    let timeout = config.timeout();
    client.endpoints().replace(config.endpoints, timeout);
    Ok(())
}

/// Run `refresh_endpoints` on the blocking pool; providers may do file
/// or network I/O in `refresh`.
fn spawn_refresh<T: Transport>(
  client: &Arc<RpcClient<T, SharedEndpoints>>
, base_config: &RpcConfig
, provider: &Option<Arc<dyn ConfigProvider>>
) -> tokio::task::JoinHandle<Result<(), crate::error::Error>>
{   let client = client.clone();
    let base_config = base_config.clone();
    let provider = provider.clone();
    tokio::task::spawn_blocking(move || {
      refresh_endpoints(&client, &base_config, provider.as_deref())
    })
}

fn joined(
  outcome: Result<Result<(), crate::error::Error>, tokio::task::JoinError>
) -> Result<(), crate::error::Error>
{   outcome.unwrap_or_else(|e| {
      Err(crate::error::Error::Other(format!("config refresh task failed: {}", e)))
    })
}

/// Main backend event loop
///
/// The select arms only route: calls are spawned, everything else is
/// a quick synchronous operation on the client.
async fn run_backend_loop<T: Transport>(
  foot: RpcFoot
, client: Arc<RpcClient<T, SharedEndpoints>>
, base_config: RpcConfig
, provider: Option<Arc<dyn ConfigProvider>>
)
{   debug!("Starting RpcBackend event loop");
    let RpcFoot
    {   mut call_rx
      , mut clear_cache_rx
      , mut refresh_config_rx
      , mut kill_process_rx
    } = foot;

    let sweep_every = base_config.sweep_interval();
    let mut sweep_tick
      = interval_at(Instant::now() + sweep_every, sweep_every);
    sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let refresh_every = base_config.refresh_interval();
    let mut refresh_tick
      = interval_at(Instant::now() + refresh_every, refresh_every);
    refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop
    { tokio::select!
      { cmd = call_rx.recv() => {
          let Some(cmd) = cmd else
          {   debug!("Command channel closed");
              break;
          };
          debug!("Received Call for method: {}", cmd.method);
          let client = client.clone();
          tokio::spawn(async move {
            let result = client.call(&cmd.method, cmd.params).await;
            let _ = cmd.reply.send(result);
          });
        }
      , Some(cmd) = clear_cache_rx.recv() => {
          debug!("Received ClearCache");
          client.clear_cache();
          let _ = cmd.reply.send(Ok(()));
        }
      , Some(cmd) = refresh_config_rx.recv() => {
          debug!("Received RefreshConfig");
          let refresh = spawn_refresh(&client, &base_config, &provider);
          tokio::spawn(async move {
            let _ = cmd.reply.send(joined(refresh.await));
          });
        }
      , Some(cmd) = kill_process_rx.recv() => {
          debug!("Received KillProcess");
          let _ = cmd.reply.send(Ok(()));
          info!("RpcBackend shutting down");
          break;
        }
      , _ = sweep_tick.tick() => {
          client.sweep_cache();
        }
      , _ = refresh_tick.tick() => {
          let refresh = spawn_refresh(&client, &base_config, &provider);
          tokio::spawn(async move {
            if let Err(e) = joined(refresh.await)
            {   warn!("Config refresh failed, keeping endpoints: {}", e);
            }
          });
        }
      }
    }
}
