//! Server setup and serving.
//!
//! # Responsibilities
//! - Build the axum router (catch-all dispatch + diagnostic page)
//! - Register the keepalive receiver endpoint when enabled
//! - Bind primary and optional secondary listeners
//! - Spawn the configuration-monitor and probe tickers
//! - Serve with graceful shutdown: notify peers, run stop hooks, drain
//!   within the deadline

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api::dispatch::{self, DispatchState};
use crate::api::registry::Api;
use crate::config::schema::ServerConfig;
use crate::keepalive::receiver::{self, HealthCheckRequest};
use crate::keepalive::registry::{FirstSeenFn, Keepalive, MonitorFn, ServiceIdentity};
use crate::keepalive::status_page;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{self, ReloadFn};
use crate::observability::metrics;
use crate::util;

/// Error type for server startup and shutdown.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    #[error("server error: {0}")]
    Io(std::io::Error),

    #[error("graceful shutdown deadline exceeded")]
    ShutdownTimeout,
}

/// Hook run during graceful stop, before listeners finish draining.
pub type StopHook = Arc<dyn Fn() + Send + Sync>;

/// A configured girder server: dispatch tables plus the keepalive mesh.
pub struct Server {
    config: ServerConfig,
    api: Api,
    keepalive: Arc<Keepalive>,
    reload: Option<ReloadFn>,
    stop_hook: Option<StopHook>,
    monitor_set: bool,
}

impl Server {
    /// Create a server from validated configuration.
    pub fn new(config: ServerConfig) -> Self {
        let secondary_address = config
            .service
            .secondary_host
            .as_deref()
            .filter(|host| !host.is_empty())
            .map(|host| util::host_port(host, config.service.port))
            .unwrap_or_default();
        let identity = ServiceIdentity {
            name: config.service.name.clone(),
            primary_address: util::host_port(&config.service.host, config.service.port),
            secondary_address,
        };
        let keepalive = Arc::new(Keepalive::new(identity, config.keepalive.clone()));

        let mut api = Api::new();
        api.set_cors(config.dispatch.cors_enabled);
        api.set_jsonp(
            config.dispatch.jsonp_enabled,
            &config.dispatch.jsonp_callback_param,
        );
        api.set_response_log(
            config.dispatch.response_show_detail,
            config.dispatch.response_show_size,
        );
        api.set_binding_complex(
            &config.dispatch.binding_complex_urls.join(","),
            &config.dispatch.binding_complex_actions.join(","),
        );

        Self {
            config,
            api,
            keepalive,
            reload: None,
            stop_hook: None,
            monitor_set: false,
        }
    }

    /// Registration surface for endpoints and hooks.
    pub fn api_mut(&mut self) -> &mut Api {
        &mut self.api
    }

    /// The keepalive registry backing this server.
    pub fn keepalive(&self) -> Arc<Keepalive> {
        self.keepalive.clone()
    }

    /// Install the configured-peer callback and load the first snapshot.
    /// Installing it also arms the monitor and probe tickers.
    pub fn set_monitor<F>(&mut self, monitor: F)
    where
        F: Fn() -> (HashMap<String, Vec<String>>, HashMap<String, String>)
            + Send
            + Sync
            + 'static,
    {
        let monitor: MonitorFn = Arc::new(monitor);
        self.keepalive.set_monitor(monitor);
        self.monitor_set = true;
    }

    /// Install the first-seen announcement callback.
    pub fn set_first_seen<F>(&mut self, callback: F)
    where
        F: Fn(String, String) + Send + Sync + 'static,
    {
        let callback: FirstSeenFn = Arc::new(callback);
        self.keepalive.set_first_seen(callback);
    }

    /// Install the reload callback run on SIGUSR1.
    pub fn set_reload<F>(&mut self, reload: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reload = Some(Arc::new(reload));
    }

    /// Install a hook run during graceful stop (cron teardown and similar).
    pub fn set_stop_hook<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stop_hook = Some(Arc::new(hook));
    }

    /// Bind listeners from the configuration, install the signal observer,
    /// and serve until a termination signal.
    pub async fn start(self) -> Result<(), ServerError> {
        let address = util::host_port(&self.config.service.host, self.config.service.port);
        tracing::info!(address = %address, "HTTP listen address");
        let primary = TcpListener::bind(&address).await.map_err(ServerError::Bind)?;

        let secondary = match self.config.service.secondary_host.as_deref() {
            Some(host) if !host.is_empty() => {
                let secondary_address = util::host_port(host, self.config.service.port);
                tracing::info!(address = %secondary_address, "HTTP secondary listen address");
                Some(
                    TcpListener::bind(&secondary_address)
                        .await
                        .map_err(ServerError::Bind)?,
                )
            }
            _ => None,
        };

        let shutdown = Shutdown::new();
        tokio::spawn(signals::watch(shutdown.clone(), self.reload.clone()));
        self.serve(primary, secondary, shutdown).await
    }

    /// Serve on pre-bound listeners until the shutdown broadcast fires.
    pub async fn serve(
        self,
        primary: TcpListener,
        secondary: Option<TcpListener>,
        shutdown: Shutdown,
    ) -> Result<(), ServerError> {
        let Server {
            config,
            mut api,
            keepalive,
            stop_hook,
            monitor_set,
            ..
        } = self;

        if config.keepalive.receiver_enabled {
            api.add_handle_full::<HealthCheckRequest, _, _, _>(
                "/ServiceHealthCheck",
                "ServiceHealthCheck",
                receiver::receive_health_check,
                Arc::new(|response: &str| response.to_string()),
                "health_receiver",
            );
        }

        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let state = DispatchState {
            api: Arc::new(api),
            keepalive: keepalive.clone(),
        };
        let mut router = Router::new();
        if config.keepalive.receiver_enabled {
            router = router.route("/output_keepalived_trace", get(status_page::status_page));
        }
        let router = router
            .fallback(dispatch::dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        if monitor_set {
            tokio::spawn(keepalive.clone().run_monitor_loop(shutdown.subscribe()));
            tokio::spawn(keepalive.clone().run_probe_loop(shutdown.subscribe()));
        }

        let local_addr = primary.local_addr().map_err(ServerError::Io)?;
        tracing::info!(address = %local_addr, "HTTP server starting");

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let mut primary_rx = shutdown.subscribe();
        let primary_serve = axum::serve(primary, app.clone()).with_graceful_shutdown(async move {
            let _ = primary_rx.recv().await;
        });
        let secondary_serve = secondary.map(|listener| {
            let mut rx = shutdown.subscribe();
            axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
        });

        let servers = async move {
            match secondary_serve {
                Some(second) => {
                    let (first, second) = tokio::join!(
                        async move { primary_serve.await },
                        async move { second.await }
                    );
                    first?;
                    second
                }
                None => primary_serve.await,
            }
        };
        tokio::pin!(servers);

        let mut shutdown_rx = shutdown.subscribe();
        tokio::select! {
            result = &mut servers => {
                result.map_err(ServerError::Io)?;
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown signal received, notifying peers");
                keepalive.clone().probe_round(true).await;
                if let Some(hook) = &stop_hook {
                    hook();
                }
                let deadline = if config.graceful_timeout_secs == 0 {
                    60
                } else {
                    config.graceful_timeout_secs
                };
                match tokio::time::timeout(Duration::from_secs(deadline), &mut servers).await {
                    Ok(result) => result.map_err(ServerError::Io)?,
                    Err(_) => {
                        tracing::error!(
                            deadline_secs = deadline,
                            "graceful shutdown deadline exceeded"
                        );
                        return Err(ServerError::ShutdownTimeout);
                    }
                }
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
