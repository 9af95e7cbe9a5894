//! Coalescing of identical concurrent calls

use std::collections::HashMap;
use std::sync::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use log::trace;

pub type CallResult = Result<Value, crate::error::Error>;

type Waiters = Vec<oneshot::Sender<CallResult>>;

/// In-flight calls keyed like the cache
#[derive(Default)]
pub struct InFlight
{   calls: Mutex<HashMap<String, Waiters>>
}

/// Outcome of joining a key
pub enum Join<'a>
{   /// First caller: do the work, then `complete`
    Leader(LeaderGuard<'a>)
  , /// Someone is already on it
    Follower(oneshot::Receiver<CallResult>)
}

impl InFlight
{   pub fn new() -> Self
    {   InFlight::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiters>>
    {   self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn join(&self, key: &str) -> Join<'_>
    {   let mut calls = self.lock();
        match calls.get_mut(key)
        {   Some(waiters) => {
              trace!("Joining in-flight call {}", key);
              let (tx, rx) = oneshot::channel();
              waiters.push(tx);
              Join::Follower(rx)
            }
          , None => {
              calls.insert(key.to_string(), Vec::new());
              Join::Leader(LeaderGuard
              {   owner: self
                , key: key.to_string()
                , completed: false
              })
            }
        }
    }

    /// Keys currently being fetched
    pub fn len(&self) -> usize
    {   self.lock().len()
    }

    pub fn is_empty(&self) -> bool
    {   self.len() == 0
    }
}

/// Held by the leader. Dropping it without `complete` (the leader's
/// future was cancelled) closes every follower's channel.
pub struct LeaderGuard<'a>
{   owner: &'a InFlight
  , key: String
  , completed: bool
}

impl LeaderGuard<'_>
{   /// Hand the result to every follower and release the key
    pub fn complete(mut self, result: &CallResult)
    {   let waiters = self.owner.lock().remove(&self.key);
        self.completed = true;
        if let Some(waiters) = waiters
        {   trace!("Fanning out {} to {} waiters", self.key, waiters.len());
            for waiter in waiters
            {   let _ = waiter.send(result.clone());
            }
        }
    }
}

impl Drop for LeaderGuard<'_>
{   fn drop(&mut self)
    {   // After `complete` the key may already belong to a new leader
        if !self.completed
        {   self.owner.lock().remove(&self.key);
        }
    }
}
