#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketrpc::{HttpReply, RequestEnvelope, Transport, TransportFailure};

pub type Responder = dyn Fn(usize, &str, &RequestEnvelope)
  -> Result<HttpReply, TransportFailure> + Send + Sync;

/// One recorded attempt
#[derive(Debug, Clone)]
pub struct Sent
{   pub url: String
  , pub method: String
  , pub timeout: Duration
}

struct MockState
{   calls: AtomicUsize
  , sent: Mutex<Vec<Sent>>
  , delay: Duration
  , responder: Box<Responder>
}

/// Counting transport whose replies come from a closure.
/// The closure gets the 1-based call number and the endpoint URL.
#[derive(Clone)]
pub struct MockTransport
{   state: Arc<MockState>
}

impl MockTransport
{   pub fn new<F>(responder: F) -> Self
    where
      F: Fn(usize, &str, &RequestEnvelope)
        -> Result<HttpReply, TransportFailure> + Send + Sync + 'static
    {   MockTransport::with_delay(Duration::ZERO, responder)
    }

    /// Every attempt sleeps `delay` before answering
    pub fn with_delay<F>(delay: Duration, responder: F) -> Self
    where
      F: Fn(usize, &str, &RequestEnvelope)
        -> Result<HttpReply, TransportFailure> + Send + Sync + 'static
    {   MockTransport
        {   state: Arc::new(MockState
            {   calls: AtomicUsize::new(0)
              , sent: Mutex::new(Vec::new())
              , delay
              , responder: Box::new(responder)
            })
        }
    }

    /// Always answers `{"result": value}`
    pub fn returning(value: serde_json::Value) -> Self
    {   let body = serde_json::json!({ "result": value }).to_string();
        MockTransport::new(move |_, _, _| Ok(HttpReply::new(200, body.clone())))
    }

    /// Always answers with `status` and an empty body
    pub fn status(status: u16) -> Self
    {   MockTransport::new(move |_, _, _| Ok(HttpReply::new(status, "")))
    }

    pub fn calls(&self) -> usize
    {   self.state.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent>
    {   self.state.sent.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String>
    {   self.sent().into_iter().map(|s| s.url).collect()
    }
}

impl Transport for MockTransport
{   async fn post_json(
      &self
    , url: &str
    , envelope: &RequestEnvelope
    , timeout: Duration
    ) -> Result<HttpReply, TransportFailure>
    {   let n = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.sent.lock().unwrap().push(Sent
        {   url: url.to_string()
          , method: envelope.method.clone()
          , timeout
        });
        if !self.state.delay.is_zero()
        {   tokio::time::sleep(self.state.delay).await;
        }
        (self.state.responder)(n, url, envelope)
    }
}

pub fn endpoints(n: usize) -> Vec<String>
{   (0..n).map(|i| format!("http://node{}.test", i)).collect()
}

pub fn ok_body(value: serde_json::Value) -> HttpReply
{   HttpReply::new(200, serde_json::json!({ "result": value }).to_string())
}
