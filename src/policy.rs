//! Cache admission: which calls may be answered from the cache

use serde::{Deserialize, Serialize};
use serde_json::Value;
use log::trace;

/// Methods whose data must always be live
pub const DEFAULT_DENY_METHODS: &[&str] = &[
  "getMultipleCoinsInfo"
];

/// Generic "list data by type" method
pub const DEFAULT_LIST_METHOD: &str = "listData";

/// Position of the data-type tag in the list method's params
pub const DEFAULT_LIST_TYPE_INDEX: usize = 1;

/// Slow-changing reference series that may be cached
pub const DEFAULT_LIST_TYPE_ALLOW: &[&str] = &[
  "GREEDY_INDEX"
, "AHR999"
, "RAINBOW_CHART"
, "PI_CYCLE_TOP"
];

/// Admission rule for the raw RPC cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy
{   /// Never cached
    pub deny_methods: Vec<String>
  , /// Cached only for allow-listed data types
    pub list_method: String
  , pub list_type_index: usize
  , pub list_type_allow: Vec<String>
}

impl Default for CachePolicy
{   fn default() -> Self
    {   CachePolicy
        {   deny_methods: DEFAULT_DENY_METHODS.iter()
              .map(|m| m.to_string())
              .collect()
          , list_method: DEFAULT_LIST_METHOD.to_string()
          , list_type_index: DEFAULT_LIST_TYPE_INDEX
          , list_type_allow: DEFAULT_LIST_TYPE_ALLOW.iter()
              .map(|t| t.to_string())
              .collect()
        }
    }
}

impl CachePolicy
{   /// Decide whether the result of `method(params)` may be cached.
    /// Pure: same inputs, same answer.
    pub fn should_cache(
      &self
    , method: &str
    , params: &[Value]
    ) -> bool
    {   if self.deny_methods.iter().any(|m| m == method)
        {   trace!("{} is live data, not cacheable", method);
            return false;
        }

        if method == self.list_method
        {   let allowed = params.get(self.list_type_index)
              .and_then(Value::as_str)
              .map(|tag| self.list_type_allow.iter().any(|t| t == tag))
              .unwrap_or(false);
            trace!("{} cacheable for {:?}: {}",
              method,
              params.get(self.list_type_index),
              allowed
            );
            return allowed;
        }

        true
    }
}
