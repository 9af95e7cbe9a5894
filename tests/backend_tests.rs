mod common;

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tokio_test::assert_ok;

use common::{endpoints, ok_body, MockTransport};
use marketrpc::config::{KEY_ENDPOINTS, KEY_MAX_RETRIES, KEY_TIMEOUT_MS};
use marketrpc::{
  ConfigProvider, EndpointRegistry, Error, RpcBackend, RpcConfig, StaticConfig,
};

#[tokio::test]
async fn test_backend_initialization()
{   marketrpc::init_logger();
    let backend = RpcBackend::with_transport(
      MockTransport::returning(json!(1)),
      RpcConfig::with_endpoints(endpoints(1)),
      None
    ).unwrap();

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_rejects_invalid_config()
{   let result = RpcBackend::with_transport(
      MockTransport::returning(json!(1)),
      RpcConfig::default(),
      None
    );
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_backend_call_round_trip()
{   let transport = MockTransport::new(|_, _, envelope| {
      Ok(ok_body(json!({ "echo": envelope.params.clone() })))
    });
    let backend = RpcBackend::with_transport(
      transport.clone(),
      RpcConfig::with_endpoints(endpoints(2)),
      None
    ).unwrap();

    let mut reply_rx = backend
      .call("getCoinInfo", vec![json!("BTC")])
      .await
      .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), reply_rx.recv())
      .await
      .unwrap()
      .unwrap();

    assert_eq!(reply, Ok(json!({"echo": ["BTC"]})));
    assert_eq!(transport.calls(), 1);
    let _ = backend.shutdown().await;
}

#[tokio::test]
async fn test_backend_clear_cache()
{   let transport = MockTransport::returning(json!("v"));
    let backend = RpcBackend::with_transport(
      transport.clone(),
      RpcConfig::with_endpoints(endpoints(1)),
      None
    ).unwrap();

    assert_ok!(backend.call_and_wait("getCoinInfo", vec![]).await);
    assert_ok!(backend.call_and_wait("getCoinInfo", vec![]).await);
    assert_eq!(transport.calls(), 1);

    let mut reply_rx = backend.clear_cache().await.unwrap();
    assert_eq!(reply_rx.recv().await, Some(Ok(())));
    assert!(backend.client().cache().is_empty());

    assert_ok!(backend.call_and_wait("getCoinInfo", vec![]).await);
    assert_eq!(transport.calls(), 2);
    let _ = backend.shutdown().await;
}

#[tokio::test]
async fn test_backend_takes_endpoints_from_provider()
{   let provider = Arc::new(StaticConfig::from_pairs([
      (KEY_ENDPOINTS, "http://primary.test,http://backup.test"),
      (KEY_TIMEOUT_MS, "1500"),
    ]));
    let backend = RpcBackend::with_transport(
      MockTransport::returning(json!(1)),
      RpcConfig::default(),
      Some(provider.clone() as Arc<dyn ConfigProvider>)
    ).unwrap();

    let registry = backend.client().endpoints();
    assert_eq!(registry.active_endpoint(), Some("http://primary.test".to_string()));
    assert_eq!(registry.current_timeout(), Duration::from_millis(1500));

    provider.set(KEY_ENDPOINTS, "http://replacement.test");
    provider.set(KEY_TIMEOUT_MS, "800");
    let mut reply_rx = backend.refresh_config().await.unwrap();
    assert_eq!(reply_rx.recv().await, Some(Ok(())));

    assert_eq!(
      registry.snapshot().endpoints,
      vec!["http://replacement.test".to_string()]
    );
    assert_eq!(registry.current_timeout(), Duration::from_millis(800));
    let _ = backend.shutdown().await;
}

#[tokio::test]
async fn test_refresh_with_bad_values_keeps_endpoints()
{   let provider = Arc::new(StaticConfig::from_pairs([
      (KEY_ENDPOINTS, "http://primary.test"),
    ]));
    let backend = RpcBackend::with_transport(
      MockTransport::returning(json!(1)),
      RpcConfig::default(),
      Some(provider.clone() as Arc<dyn ConfigProvider>)
    ).unwrap();

    provider.set(KEY_ENDPOINTS, "primary.test");
    let mut reply_rx = backend.refresh_config().await.unwrap();
    assert!(matches!(
      reply_rx.recv().await,
      Some(Err(Error::InvalidConfiguration(_)))
    ));
    assert_eq!(
      backend.client().endpoints().active_endpoint(),
      Some("http://primary.test".to_string())
    );
    let _ = backend.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_sweeps_expired_entries()
{   let mut config = RpcConfig::with_endpoints(endpoints(1));
    config.cache_ttl_secs = 1;
    config.sweep_interval_secs = 1;
    let backend = RpcBackend::with_transport(
      MockTransport::returning(json!(1)),
      config,
      None
    ).unwrap();

    assert_ok!(backend.call_and_wait("getCoinInfo", vec![]).await);
    assert_eq!(backend.client().cache().len(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(backend.client().cache().is_empty());
    let _ = backend.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_refreshes_on_interval()
{   let provider = Arc::new(StaticConfig::from_pairs([
      (KEY_ENDPOINTS, "http://first.test"),
    ]));
    let mut config = RpcConfig::default();
    config.refresh_interval_secs = 300;
    let backend = RpcBackend::with_transport(
      MockTransport::returning(json!(1)),
      config,
      Some(provider.clone() as Arc<dyn ConfigProvider>)
    ).unwrap();

    provider.set(KEY_ENDPOINTS, "http://second.test");
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(
      backend.client().endpoints().active_endpoint(),
      Some("http://first.test".to_string())
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
      backend.client().endpoints().active_endpoint(),
      Some("http://second.test".to_string())
    );
    let _ = backend.shutdown().await;
}

#[tokio::test]
async fn test_backend_surfaces_structured_errors()
{   let backend = RpcBackend::with_transport(
      MockTransport::status(503),
      RpcConfig::with_endpoints(endpoints(2)),
      None
    ).unwrap();

    let err = backend.call_and_wait("getCoinInfo", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::AllEndpointsFailed { attempts: 3, .. }));
    assert_eq!(err.code(), 503);
    let _ = backend.shutdown().await;
}

/// Provider whose refresh blocks its thread after the first load
struct SlowProvider
{   inner: StaticConfig
  , loads: std::sync::atomic::AtomicUsize
  , stall: Duration
}

impl ConfigProvider for SlowProvider
{   fn get(&self, key: &str, default: &str) -> String
    {   self.inner.get(key, default)
    }

    fn refresh(&self) -> Result<(), Error>
    {   if self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0
        {   std::thread::sleep(self.stall);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_refresh_does_not_stall_calls()
{   let provider = Arc::new(SlowProvider
    {   inner: StaticConfig::from_pairs([(KEY_ENDPOINTS, "http://slow.test")])
      , loads: std::sync::atomic::AtomicUsize::new(0)
      , stall: Duration::from_millis(800)
    });
    let backend = RpcBackend::with_transport(
      MockTransport::returning(json!("quick")),
      RpcConfig::default(),
      Some(provider.clone() as Arc<dyn ConfigProvider>)
    ).unwrap();

    let mut refresh_rx = backend.refresh_config().await.unwrap();
    let started = std::time::Instant::now();
    let reply = backend.call_and_wait("getCoinInfo", vec![]).await;
    assert_eq!(reply, Ok(json!("quick")));
    assert!(started.elapsed() < Duration::from_millis(500));

    assert_eq!(refresh_rx.recv().await, Some(Ok(())));
    let _ = backend.shutdown().await;
}

#[tokio::test]
async fn test_refresh_ignores_retry_changes()
{   let provider = Arc::new(StaticConfig::from_pairs([
      (KEY_ENDPOINTS, "http://a.test,http://b.test,http://c.test"),
    ]));
    let mut config = RpcConfig::default();
    config.max_retries = 1;
    let transport = MockTransport::status(503);
    let backend = RpcBackend::with_transport(
      transport.clone(),
      config,
      Some(provider.clone() as Arc<dyn ConfigProvider>)
    ).unwrap();

    provider.set(KEY_MAX_RETRIES, "5");
    let mut reply_rx = backend.refresh_config().await.unwrap();
    assert_eq!(reply_rx.recv().await, Some(Ok(())));

    let err = backend.call_and_wait("getCoinInfo", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::AllEndpointsFailed { attempts: 2, .. }));
    assert_eq!(transport.calls(), 2);
    let _ = backend.shutdown().await;
}
