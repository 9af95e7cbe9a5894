//! Wire envelopes for the JSON RPC backend

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body: `{ "method": ..., "params": [...] }`.
/// Two envelopes with the same method and parameter sequence are
/// the same call as far as caching goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope
{   pub method: String
  , pub params: Vec<Value>
}

impl RequestEnvelope
{   pub fn new(
      method: impl Into<String>
    , params: Vec<Value>
    ) -> Self
    {   RequestEnvelope
        {   method: method.into()
          , params
        }
    }

    /// Cache identity of this envelope
    pub fn cache_key(&self) -> String
    {   cache_key(&self.method, &self.params)
    }
}

/// Build the cache key `method + ":" + json(params)`.
///
/// Params are positional so array order is preserved; any object
/// nested inside them serializes with sorted keys (serde_json's
/// default map), which keeps the key deterministic.
pub fn cache_key(method: &str, params: &[Value]) -> String
{   let encoded = serde_json::to_string(params)
      .unwrap_or_else(|_| "[]".to_string());
    format!("{}:{}", method, encoded)
}

/// `error` object of a response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload
{   pub code: crate::error::ApplicationCode
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

impl ErrorPayload
{   /// Best message available: `message`, then `error`
    pub fn describe(&self) -> String
    {   self.message.clone()
          .or_else(|| self.error.clone())
          .unwrap_or_else(|| "unknown application error".to_string())
    }
}
