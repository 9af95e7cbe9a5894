//! Endpoint failover and retry policy

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::{debug, info, warn};

/// Retry policy for failed attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   pub max_retries: usize
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      max_retries: usize
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_retries
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    /// Total sends allowed for one call
    pub fn max_attempts(&self) -> usize
    {   self.max_retries + 1
    }

    /// Pause before retry number `retry` (0-based)
    pub fn backoff_for_retry(
      &self
    , retry: usize
    ) -> Duration
    {   if self.initial_backoff.is_zero()
        {   return Duration::ZERO;
        }
        let multiplier
          = self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(
          (self.initial_backoff.as_millis() as f32
            * multiplier) as u64
        )
    }
}

impl Default for RetryPolicy
{   /// Three immediate retries, four attempts in total
    fn default() -> Self
    {   RetryPolicy::new(3, 2.0, 0)
    }
}

/// What the cursor does after the last endpoint fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverPolicy
{   /// Cycle back to the first endpoint
    #[default]
    Wrap
  , /// Stay on the last endpoint
    Stop
}

/// Ordered endpoint list with a cursor.
/// `current_index` is always a valid index unless the list is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSet
{   pub endpoints: Vec<String>
  , pub current_index: usize
  , pub policy: FailoverPolicy
}

impl EndpointSet
{   pub fn new(
      endpoints: Vec<String>
    , policy: FailoverPolicy
    ) -> Self
    {   debug!(
          "Creating endpoint set with {} endpoints",
          endpoints.len()
        );
        EndpointSet
        {   endpoints
          , current_index: 0
          , policy
        }
    }

    /// Get the current endpoint
    pub fn current(&self) -> Option<&String>
    {   self.endpoints.get(self.current_index)
    }

    /// Advance the cursor; true when it now points somewhere else
    pub fn advance(&mut self) -> bool
    {   let len = self.endpoints.len();
        if len <= 1
        {   return false;
        }
        if self.current_index + 1 < len
        {   self.current_index += 1;
            return true;
        }
        match self.policy
        {   FailoverPolicy::Wrap => {
              self.current_index = 0;
              true
            }
          , FailoverPolicy::Stop => false
        }
    }

    /// Reset to the first endpoint
    pub fn reset(&mut self)
    {   debug!("Resetting endpoint cursor");
        self.current_index = 0;
    }
}

/// What the orchestrator needs from whoever owns the endpoint list.
///
/// `active_endpoint` and `current_timeout` are queried on every attempt
/// since a concurrent call may have moved the cursor.
pub trait EndpointRegistry: Send + Sync + 'static
{   /// Base URL to send the next attempt to
    fn active_endpoint(&self) -> Option<String>;

    /// Record a failed attempt and advance the cursor.
    /// Returns true when a different endpoint is now active.
    fn on_request_failure(&self) -> bool;

    /// Per-attempt timeout
    fn current_timeout(&self) -> Duration;
}

/// Mutex-guarded endpoint set shared by all calls
pub struct SharedEndpoints
{   state: Mutex<(EndpointSet, Duration)>
}

impl SharedEndpoints
{   pub fn new(
      endpoints: Vec<String>
    , policy: FailoverPolicy
    , timeout: Duration
    ) -> Self
    {   SharedEndpoints
        {   state: Mutex::new((EndpointSet::new(endpoints, policy), timeout))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (EndpointSet, Duration)>
    {   self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swap in a refreshed endpoint list and timeout.
    /// The cursor only resets when the list actually changed.
    pub fn replace(
      &self
    , endpoints: Vec<String>
    , timeout: Duration
    )
    {   let mut state = self.lock();
        if state.0.endpoints != endpoints
        {   info!("Endpoint list changed: {:?}", endpoints);
            state.0.endpoints = endpoints;
            state.0.reset();
        }
        state.1 = timeout;
    }

    /// Snapshot of the endpoint set
    pub fn snapshot(&self) -> EndpointSet
    {   self.lock().0.clone()
    }
}

impl EndpointRegistry for SharedEndpoints
{   fn active_endpoint(&self) -> Option<String>
    {   self.lock().0.current().cloned()
    }

    fn on_request_failure(&self) -> bool
    {   let mut state = self.lock();
        let failed = state.0.current().cloned();
        let rotated = state.0.advance();
        if rotated
        {   warn!("Endpoint {:?} failed, switching to {:?}",
              failed,
              state.0.current()
            );
        } else
        {   warn!("Endpoint {:?} failed, no other endpoint to switch to",
              failed
            );
        }
        rotated
    }

    fn current_timeout(&self) -> Duration
    {   self.lock().1
    }
}

/// Per-call attempt accounting. Discarded when the call resolves.
#[derive(Debug)]
pub struct AttemptBudget
{   max_attempts: usize
  , attempts: usize
  , tried: HashSet<String>
  , final_retry_used: bool
}

impl AttemptBudget
{   pub fn new(max_attempts: usize) -> Self
    {   AttemptBudget
        {   max_attempts: max_attempts.max(1)
          , attempts: 0
          , tried: HashSet::new()
          , final_retry_used: false
        }
    }

    /// Count a send to `endpoint`
    pub fn record_attempt(&mut self, endpoint: &str)
    {   self.attempts += 1;
        self.tried.insert(endpoint.to_string());
    }

    pub fn attempts(&self) -> usize
    {   self.attempts
    }

    pub fn is_spent(&self) -> bool
    {   self.attempts >= self.max_attempts
    }

    /// Decide whether to retry after a failover request.
    ///
    /// Once no untried endpoint is on offer, one final retry is
    /// granted; after that the call gives up.
    pub fn allow_retry(
      &mut self
    , rotated: bool
    , next: Option<&str>
    ) -> bool
    {   if self.is_spent()
        {   return false;
        }
        let fresh = rotated
          && next.map(|url| !self.tried.contains(url)).unwrap_or(false);
        if fresh
        {   return true;
        }
        if self.final_retry_used
        {   return false;
        }
        self.final_retry_used = true;
        true
    }
}
