//! Data-service layer: per-indicator fetches with their own cache tier.
//!
//! This tier caches post-processed values and is independent of the
//! raw RPC cache inside `RpcClient`; clearing one leaves the other.

use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use log::{debug, warn};

use crate::cache::TtlCache;
use crate::client::RpcClient;
use crate::config::RpcConfig;
use crate::error::Error;
use crate::failover::EndpointRegistry;
use crate::transport::Transport;

pub const LIST_DATA_METHOD: &str = "listData";
pub const MULTIPLE_COINS_METHOD: &str = "getMultipleCoinsInfo";

/// One `{page, data}` element of a list response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPage
{   #[serde(default)]
    pub page: Value
  , /// Decoded when the backend sent it as a JSON string
    #[serde(default)]
    pub data: Value
}

pub struct DataService<T: Transport, R: EndpointRegistry>
{   client: Arc<RpcClient<T, R>>
  , cache: TtlCache<Vec<DataPage>>
}

impl<T: Transport, R: EndpointRegistry> DataService<T, R>
{   pub fn new(
      client: Arc<RpcClient<T, R>>
    , ttl: Duration
    ) -> Self
    {   DataService
        {   client
          , cache: TtlCache::new(ttl)
        }
    }

    /// Tier lifetime from `service_cache_ttl_secs`
    pub fn from_config(
      client: Arc<RpcClient<T, R>>
    , config: &RpcConfig
    ) -> Self
    {   DataService::new(client, config.service_cache_ttl())
    }

    pub fn client(&self) -> &Arc<RpcClient<T, R>>
    {   &self.client
    }

    /// Positional arguments the backend expects for a list query
    pub fn list_params(data_type: &str) -> Vec<Value>
    {   vec![json!(""), json!(data_type), json!("1"), json!("0"), json!("1"), json!("")]
    }

    /// Fetch and decode the pages of one data series
    pub async fn list_data(
      &self
    , data_type: &str
    ) -> Result<Vec<DataPage>, Error>
    {   let key = format!("{}:{}", LIST_DATA_METHOD, data_type);
        if let Some(pages) = self.cache.get(&key)
        {   debug!("Service cache hit for {}", data_type);
            return Ok(pages);
        }

        let raw = self.client
          .call(LIST_DATA_METHOD, DataService::<T, R>::list_params(data_type))
          .await?;
        let pages = decode_pages(raw)?;
        self.cache.put(key, pages.clone());
        Ok(pages)
    }

    /// Live quotes for several symbols; never cached
    pub async fn multiple_coins_info(
      &self
    , symbols: &[&str]
    ) -> Result<Value, Error>
    {   self.client
          .call(MULTIPLE_COINS_METHOD, vec![json!(symbols.join(",")), json!("1")])
          .await
    }

    /// Empty this tier only
    pub fn clear_cache(&self)
    {   self.cache.clear();
    }
}

/// Decode a list result: an array of `{page, data}` objects, where
/// `data` may itself be stringified JSON.
pub fn decode_pages(raw: Value) -> Result<Vec<DataPage>, Error>
{   let items = match raw
    {   Value::Array(items) => items
      , Value::Null => return Ok(vec![])
      , other => {
          return Err(Error::Protocol(
            format!("expected an array of pages, got {}", kind_of(&other))
          ));
        }
    };

    items.into_iter()
      .map(|item| {
        let mut page: DataPage = serde_json::from_value(item)
          .map_err(|e| Error::Protocol(format!("malformed page: {}", e)))?;
        if let Value::String(text) = &page.data
        {   match serde_json::from_str(text)
            {   Ok(decoded) => page.data = decoded
              , Err(e) => warn!("Page data is a plain string: {}", e)
            }
        }
        Ok(page)
      })
      .collect()
}

fn kind_of(value: &Value) -> &'static str
{   match value
    {   Value::Null => "null"
      , Value::Bool(_) => "a boolean"
      , Value::Number(_) => "a number"
      , Value::String(_) => "a string"
      , Value::Array(_) => "an array"
      , Value::Object(_) => "an object"
    }
}
