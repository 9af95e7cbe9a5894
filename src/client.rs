//! RPC call orchestrator: cache, send, classify, fail over, retry

use std::sync::Arc;
use serde_json::Value;
use log::{debug, error, trace, warn};

use crate::cache::TtlCache;
use crate::classify::{classify, AttemptOutcome};
use crate::config::RpcConfig;
use crate::error::Error;
use crate::failover::{AttemptBudget, EndpointRegistry, RetryPolicy, SharedEndpoints};
use crate::policy::CachePolicy;
use crate::request::RequestEnvelope;
use crate::singleflight::{InFlight, Join};
use crate::transport::{HttpTransport, Transport, TransportFailure};

/// Public entry point for backend calls.
///
/// The cache and the endpoint registry are the only shared mutable
/// state; both are owned here (the registry behind an `Arc` so a
/// config refresher can update it).
pub struct RpcClient<T = HttpTransport, R = SharedEndpoints>
{   transport: T
  , endpoints: Arc<R>
  , cache: TtlCache<Value>
  , policy: CachePolicy
  , retry: RetryPolicy
  , inflight: InFlight
  , single_flight: bool
}

impl RpcClient<HttpTransport, SharedEndpoints>
{   /// reqwest transport plus a registry built from `config`
    pub fn from_config(
      config: &RpcConfig
    ) -> Result<Self, Error>
    {   config.validate()?;
        let endpoints = Arc::new(SharedEndpoints::new(
          config.endpoints.clone(),
          config.failover,
          config.timeout()
        ));
        Ok(RpcClient::with_parts(HttpTransport::new(), endpoints, config))
    }
}

impl<T: Transport, R: EndpointRegistry> RpcClient<T, R>
{   pub fn with_parts(
      transport: T
    , endpoints: Arc<R>
    , config: &RpcConfig
    ) -> Self
    {   debug!("Creating RpcClient (single_flight: {})",
          config.single_flight
        );
        RpcClient
        {   transport
          , endpoints
          , cache: TtlCache::with_sweep_interval(
              config.cache_ttl(),
              config.sweep_interval()
            )
          , policy: config.cache_policy.clone()
          , retry: config.retry_policy()
          , inflight: InFlight::new()
          , single_flight: config.single_flight
        }
    }

    pub fn endpoints(&self) -> &Arc<R>
    {   &self.endpoints
    }

    pub fn cache(&self) -> &TtlCache<Value>
    {   &self.cache
    }

    pub fn policy(&self) -> &CachePolicy
    {   &self.policy
    }

    pub fn clear_cache(&self)
    {   self.cache.clear();
    }

    pub fn sweep_cache(&self) -> usize
    {   self.cache.sweep()
    }

    /// Invoke `method` with positional `params` and return the
    /// unwrapped `result`.
    pub async fn call(
      &self
    , method: &str
    , params: Vec<Value>
    ) -> Result<Value, Error>
    {   let envelope = RequestEnvelope::new(method, params);
        let admissible = self.policy
          .should_cache(method, &envelope.params);
        if !admissible
        {   trace!("{} bypasses the cache", method);
            return self.fetch(&envelope, None).await;
        }

        let key = envelope.cache_key();
        loop
        {   if let Some(hit) = self.cache.get(&key)
            {   debug!("Cache hit for {}", method);
                return Ok(hit);
            }
            if !self.single_flight
            {   return self.fetch(&envelope, Some(&key)).await;
            }

            match self.inflight.join(&key)
            {   Join::Leader(guard) => {
                  // A leader may have finished between the lookup and the join
                  let result = match self.cache.get(&key)
                  {   Some(hit) => Ok(hit)
                    , None => self.fetch(&envelope, Some(&key)).await
                  };
                  guard.complete(&result);
                  return result;
                }
              , Join::Follower(rx) => {
                  debug!("Waiting on in-flight {}", method);
                  match rx.await
                  {   Ok(result) => return result
                    , Err(_) => {
                        debug!("In-flight {} was abandoned, retrying", method);
                      }
                  }
                }
            }
        }
    }

    /// Network path: attempt loop over the registry's endpoints
    async fn fetch(
      &self
    , envelope: &RequestEnvelope
    , cache_key: Option<&str>
    ) -> Result<Value, Error>
    {   let mut budget = AttemptBudget::new(self.retry.max_attempts());
        let mut retries = 0;

        loop
        {   let url = self.endpoints.active_endpoint()
              .ok_or_else(|| {
                error!("No endpoint available for {}", envelope.method);
                Error::NoEndpoints
              })?;
            let timeout = self.endpoints.current_timeout();
            budget.record_attempt(&url);
            debug!("Attempt {} for {} -> {} (timeout {:?})",
              budget.attempts(), envelope.method, url, timeout
            );

            let sent = tokio::time::timeout(
              timeout,
              self.transport.post_json(&url, envelope, timeout)
            ).await;
            let outcome = classify(sent.unwrap_or_else(|_| {
              debug!("Attempt on {} dropped after {:?}", url, timeout);
              Err(TransportFailure::Timeout(timeout))
            }));

            let failure = match outcome
            {   AttemptOutcome::Success(value) => {
                  if let Some(key) = cache_key
                  {   self.cache.put(key, value.clone());
                      self.cache.maybe_sweep();
                  }
                  return Ok(value);
                }
              , AttemptOutcome::Fatal(err) => {
                  error!("{} failed on {}: {}", envelope.method, url, err);
                  return Err(err);
                }
              , AttemptOutcome::Retryable(err) => err
            };

            warn!("Attempt {} for {} on {} failed: {}",
              budget.attempts(), envelope.method, url, failure
            );

            if budget.is_spent()
            {   return Err(exhausted(&budget, failure));
            }
            let rotated = self.endpoints.on_request_failure();
            let next = self.endpoints.active_endpoint();
            if !budget.allow_retry(rotated, next.as_deref())
            {   return Err(exhausted(&budget, failure));
            }

            let delay = self.retry.backoff_for_retry(retries);
            retries += 1;
            if !delay.is_zero()
            {   trace!("Backing off {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn exhausted(budget: &AttemptBudget, last: Error) -> Error
{   error!("Giving up after {} attempts: {}", budget.attempts(), last);
    Error::AllEndpointsFailed
    {   attempts: budget.attempts()
      , last: Box::new(last)
    }
}
