//! In-memory TTL cache with lazy expiry

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use log::{debug, trace};

/// Stored value plus its lifetime.
/// `expires_at == created_at + ttl` always holds.
#[derive(Debug, Clone)]
pub struct CacheEntry<V>
{   pub data: V
  , pub created_at: Instant
  , pub expires_at: Instant
}

struct CacheState<V>
{   entries: HashMap<String, CacheEntry<V>>
  , last_sweep: Instant
}

/// Key/value store whose entries expire a fixed duration after insertion.
///
/// Uses tokio's clock so tests can pause and advance time.
pub struct TtlCache<V>
{   ttl: Duration
  , sweep_interval: Duration
  , state: Mutex<CacheState<V>>
}

impl<V: Clone> TtlCache<V>
{   pub fn new(ttl: Duration) -> Self
    {   TtlCache::with_sweep_interval(ttl, ttl)
    }

    /// `sweep_interval` bounds how often `maybe_sweep` actually sweeps
    pub fn with_sweep_interval(
      ttl: Duration
    , sweep_interval: Duration
    ) -> Self
    {   debug!("Creating TtlCache with ttl {:?}", ttl);
        TtlCache
        {   ttl
          , sweep_interval
          , state: Mutex::new(CacheState
            {   entries: HashMap::new()
              , last_sweep: Instant::now()
            })
        }
    }

    pub fn ttl(&self) -> Duration
    {   self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState<V>>
    {   // Entries are inserted whole, so a poisoned map is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hit while `now <= expires_at`; an expired entry is removed
    pub fn get(&self, key: &str) -> Option<V>
    {   self.entry(key).map(|e| e.data)
    }

    /// Like `get` but returns the whole entry
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>>
    {   let now = Instant::now();
        let mut state = self.lock();
        match state.entries.get(key)
        {   Some(entry) if now <= entry.expires_at => {
              trace!("Cache hit: {}", key);
              Some(entry.clone())
            }
          , Some(_) => {
              trace!("Cache entry expired: {}", key);
              state.entries.remove(key);
              None
            }
          , None => {
              trace!("Cache miss: {}", key);
              None
            }
        }
    }

    /// Insert or overwrite, restarting the entry's lifetime
    pub fn put(&self, key: impl Into<String>, data: V)
    {   let created_at = Instant::now();
        let entry = CacheEntry
        {   data
          , created_at
          , expires_at: created_at + self.ttl
        };
        self.lock().entries.insert(key.into(), entry);
    }

    /// Remove every entry with `expires_at < now`; returns how many went
    pub fn sweep(&self) -> usize
    {   let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at >= now);
        state.last_sweep = now;
        let removed = before - state.entries.len();
        if removed > 0
        {   debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Sweep only if the last sweep is older than the sweep interval
    pub fn maybe_sweep(&self) -> usize
    {   let due = {
          let state = self.lock();
          state.last_sweep.elapsed() >= self.sweep_interval
        };
        if due
        {   self.sweep()
        } else
        {   0
        }
    }

    pub fn clear(&self)
    {   debug!("Clearing cache");
        self.lock().entries.clear();
    }

    /// Entries currently stored, expired ones included
    pub fn len(&self) -> usize
    {   self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.len() == 0
    }
}
