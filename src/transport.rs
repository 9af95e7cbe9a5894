//! Outbound HTTP for one attempt

use std::future::Future;
use std::time::Duration;
use log::{error, trace};

use crate::request::RequestEnvelope;

/// Raw answer from an endpoint, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply
{   pub status: u16
  , pub body: String
}

impl HttpReply
{   pub fn new(status: u16, body: impl Into<String>) -> Self
    {   HttpReply
        {   status
          , body: body.into()
        }
    }

    pub fn is_success(&self) -> bool
    {   (200..300).contains(&self.status)
    }
}

/// Attempt failed before any HTTP status was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure
{   /// Per-attempt timeout fired; the request was dropped
    Timeout(Duration)
  , /// DNS, connect or reset
    Network(String)
  , /// Anything else the HTTP stack reported
    Other(String)
}

/// Sends one envelope to one endpoint.
///
/// Implementations should give up once `timeout` has elapsed; the
/// client also drops any attempt that runs past it.
pub trait Transport: Send + Sync + 'static
{   fn post_json(
      &self
    , url: &str
    , envelope: &RequestEnvelope
    , timeout: Duration
    ) -> impl Future<Output = Result<HttpReply, TransportFailure>> + Send;
}

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport
{   http_client: reqwest::Client
}

impl HttpTransport
{   pub fn new() -> Self
    {   HttpTransport
        {   http_client: reqwest::Client::new()
        }
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots, ...)
    pub fn with_client(http_client: reqwest::Client) -> Self
    {   HttpTransport
        {   http_client
        }
    }

    async fn send(
      &self
    , url: &str
    , envelope: &RequestEnvelope
    , timeout: Duration
    ) -> Result<HttpReply, TransportFailure>
    {   let response = self.http_client
          .post(url)
          .header("Content-Type", "application/json")
          .json(envelope)
          .send()
          .await
          .map_err(|e| classify_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        trace!("{} answered {}", url, status);

        let body = response.text()
          .await
          .map_err(|e| classify_reqwest_error(e, timeout))?;
        Ok(HttpReply
        {   status
          , body
        })
    }
}

impl Transport for HttpTransport
{   async fn post_json(
      &self
    , url: &str
    , envelope: &RequestEnvelope
    , timeout: Duration
    ) -> Result<HttpReply, TransportFailure>
    {   trace!("POST {} method={} timeout={:?}",
          url, envelope.method, timeout
        );
        // Dropping the send future on timeout aborts the request.
        match tokio::time::timeout(timeout, self.send(url, envelope, timeout)).await
        {   Ok(result) => result
          , Err(_) => {
              error!("{} timed out after {:?}", url, timeout);
              Err(TransportFailure::Timeout(timeout))
            }
        }
    }
}

/// `timeout` is the attempt budget the request ran under
fn classify_reqwest_error(e: reqwest::Error, timeout: Duration) -> TransportFailure
{   if e.is_timeout()
    {   error!("reqwest timed out: {}", e);
        TransportFailure::Timeout(timeout)
    } else if e.is_connect() || e.is_request()
    {   error!("Network error: {}", e);
        TransportFailure::Network(e.to_string())
    } else
    {   error!("HTTP error: {}", e);
        TransportFailure::Other(e.to_string())
    }
}
