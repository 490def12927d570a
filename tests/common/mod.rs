//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::sync::Arc;

use girder::keepalive::Keepalive;
use girder::{Server, ServerConfig, ServerError, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One framework server running on an ephemeral port.
pub struct TestPeer {
    pub name: String,
    /// `host:port` the peer listens on.
    pub addr: String,
    /// `http://host:port` base URL.
    pub base: String,
    pub keepalive: Arc<Keepalive>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

/// Bind an ephemeral listener and report its `host:port`.
pub async fn reserve_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, format!("127.0.0.1:{}", port))
}

/// Test config with short keepalive periods.
pub fn peer_config(name: &str, port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.service.name = name.to_string();
    config.service.host = "127.0.0.1".to_string();
    config.service.port = port;
    config.keepalive.check_period_secs = 1;
    config.keepalive.check_timeout_secs = 1;
    config.keepalive.monitor_period_secs = 1;
    config
}

/// Start a peer on a fresh ephemeral port.
pub async fn start_peer<F>(name: &str, configure: F) -> TestPeer
where
    F: FnOnce(&mut Server),
{
    let (listener, _) = reserve_listener().await;
    start_peer_on(listener, name, configure).await
}

/// Start a peer on a pre-bound listener.
pub async fn start_peer_on<F>(listener: TcpListener, name: &str, configure: F) -> TestPeer
where
    F: FnOnce(&mut Server),
{
    let port = listener.local_addr().unwrap().port();
    let addr = format!("127.0.0.1:{}", port);
    let mut server = Server::new(peer_config(name, port));
    configure(&mut server);
    let keepalive = server.keepalive();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.serve(listener, None, shutdown.clone()));
    TestPeer {
        name: name.to_string(),
        base: format!("http://{}", addr),
        addr,
        keepalive,
        shutdown,
        handle,
    }
}

/// A client that never routes through a proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
