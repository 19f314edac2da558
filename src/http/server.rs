//! API server setup and lifecycle.
//!
//! # Responsibilities
//! - Collect configuration and collaborators ([`ApiBuilder`])
//! - Build the pipeline once and wrap the integrator's routes with it
//! - Bind, serve (plain or TLS) and gracefully close ([`ApiServer`])
//!
//! # Lifecycle
//! ```text
//! stopped --listen()--> listening --close()--> stopped
//! ```
//! `listen()` resolves once the socket is bound and accepting. `close()`
//! stops accepting and resolves once in-flight requests have finished
//! (or the configured grace period has passed).

use std::any::type_name;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{http::request::Parts, Extension, Router};
use axum_server::Handle;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::validation::validate_config;
use crate::config::{ApiConfig, ConfigError, Protocol};
use crate::i18n::Translator;
use crate::net::listener::{self, ListenerError};
use crate::net::tls::{self, TlsError};
use crate::pipeline::{Collaborators, Pipeline, PipelineBuilder, Stage};
use crate::security::auth::SessionInitializer;
use crate::security::ip_store::IpAddressStore;
use crate::security::store::CounterStore;

/// Error type for server lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error("server is not listening")]
    NotListening,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("server stopped before it started listening")]
    NotReady,

    #[error("server task failed: {0}")]
    Serve(#[source] io::Error),

    #[error("server task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Source of the integrator's routes.
///
/// Implemented for a ready [`Router`] and for closures producing one.
pub trait Routes: Send + Sync {
    fn routes(&self) -> Router;
}

impl Routes for Router {
    fn routes(&self) -> Router {
        self.clone()
    }
}

impl<F> Routes for F
where
    F: Fn() -> Router + Send + Sync,
{
    fn routes(&self) -> Router {
        self()
    }
}

/// Builder for [`ApiServer`].
pub struct ApiBuilder {
    config: ApiConfig,
    routes: Option<Box<dyn Routes>>,
    collaborators: Collaborators,
}

impl ApiBuilder {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            routes: None,
            collaborators: Collaborators::default(),
        }
    }

    pub fn routes(mut self, routes: impl Routes + 'static) -> Self {
        self.routes = Some(Box::new(routes));
        self
    }

    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.collaborators.counter_store = Some(store);
        self
    }

    /// Replace the configured rate-limit key strategy.
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Parts, IpAddr) -> String + Send + Sync + 'static,
    {
        self.collaborators.key_fn = Some(Arc::new(key_fn));
        self
    }

    pub fn ip_store(mut self, store: Arc<dyn IpAddressStore>) -> Self {
        self.collaborators.ip_store = Some(store);
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionInitializer>) -> Self {
        self.collaborators.session = Some(session);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.collaborators.translator = Some(translator);
        self
    }

    /// Run `hook` right after the timeout stage, before authentication.
    pub fn hook_before_setup<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut PipelineBuilder) + Send + Sync + 'static,
    {
        self.collaborators.before_setup.push(Arc::new(hook));
        self
    }

    /// Run `hook` right before the routes.
    pub fn hook_before_routes<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut PipelineBuilder) + Send + Sync + 'static,
    {
        self.collaborators.before_routes.push(Arc::new(hook));
        self
    }

    /// Make `value` available to every handler as `Extension<T>`.
    pub fn extension<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.collaborators
            .extensions
            .push(Stage::custom(type_name::<T>(), move |r: Router| {
                r.layer(Extension(value.clone()))
            }));
        self
    }

    /// Validate the configuration and build the pipeline.
    pub fn build(self) -> Result<ApiServer, ConfigError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let pipeline = Pipeline::build(&self.config, &self.collaborators)?;
        let routes = self.routes.map(|r| r.routes()).unwrap_or_default();
        let router = pipeline.wrap(routes);

        tracing::debug!(stages = ?pipeline.stage_names(), "Pipeline built");

        Ok(ApiServer {
            config: Arc::new(self.config),
            pipeline,
            router,
            state: Mutex::new(ServerState::Stopped),
        })
    }
}

enum ServerState {
    Stopped,
    Listening {
        addr: SocketAddr,
        handle: Handle,
        task: JoinHandle<io::Result<()>>,
    },
}

/// A configured API server.
pub struct ApiServer {
    config: Arc<ApiConfig>,
    pipeline: Pipeline,
    router: Router,
    state: Mutex<ServerState>,
}

impl ApiServer {
    /// Server with no collaborators beyond what `config` describes.
    pub fn new(config: ApiConfig) -> Result<Self, ConfigError> {
        ApiBuilder::new(config).build()
    }

    pub fn builder(config: ApiConfig) -> ApiBuilder {
        ApiBuilder::new(config)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The fully wrapped router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ServerState::Listening { addr, .. } => Some(*addr),
            ServerState::Stopped => None,
        }
    }

    /// Bind and start serving. Falls back to the configured port and host.
    ///
    /// Resolves with the bound address once the listener accepts.
    pub async fn listen(&self, port: Option<u16>, host: Option<&str>) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.lock().await;
        if let ServerState::Listening { addr, .. } = &*state {
            return Err(ServerError::AlreadyListening(*addr));
        }

        let port = port.unwrap_or(self.config.server.port);
        let host = host.unwrap_or(self.config.server.host.as_str());

        let tls = match self.config.server.protocol {
            Protocol::Https => {
                let ssl = self
                    .config
                    .server
                    .ssl
                    .as_ref()
                    .ok_or(TlsError::Missing("cert"))?;
                Some(tls::load_tls_config(ssl).await?)
            }
            Protocol::Http => None,
        };

        let std_listener = listener::bind(host, port)?;
        let handle = Handle::new();
        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();

        let task = match tls {
            Some(tls) => tokio::spawn(
                axum_server::from_tcp_rustls(std_listener, tls)
                    .handle(handle.clone())
                    .serve(app),
            ),
            None => tokio::spawn(
                axum_server::from_tcp(std_listener)
                    .handle(handle.clone())
                    .serve(app),
            ),
        };

        let Some(addr) = handle.listening().await else {
            return Err(match task.await? {
                Err(e) => ServerError::Serve(e),
                Ok(()) => ServerError::NotReady,
            });
        };

        tracing::info!(
            address = %addr,
            protocol = ?self.config.server.protocol,
            "API server listening"
        );
        *state = ServerState::Listening { addr, handle, task };
        Ok(addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn close(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        let ServerState::Listening { addr, handle, task } =
            std::mem::replace(&mut *state, ServerState::Stopped)
        else {
            return Err(ServerError::NotListening);
        };

        let grace = self.config.server.shutdown_grace_ms.map(Duration::from_millis);
        handle.graceful_shutdown(grace);
        task.await?.map_err(ServerError::Serve)?;

        tracing::info!(address = %addr, "API server closed");
        Ok(())
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        if let ServerState::Listening { handle, .. } = self.state.get_mut() {
            handle.shutdown();
        }
    }
}
