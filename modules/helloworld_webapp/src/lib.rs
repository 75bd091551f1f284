//! The example web application: three plain-text resources served by axum,
//! announced on the runtime's event bus once the listener is bound.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use deploycheck::options::webapp_war_artifact;
use deploycheck::{ActivationContext, Activator, Event, LocalModuleRuntime, ModuleDescriptor};
use deploycheck_bootstrap::{parse_property, HTTP_SERVICE_PORT_PROPERTY};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod config;
pub mod routes;

pub use config::HelloWorldConfig;

pub const MODULE_NAME: &str = "helloworld_webapp";

struct RunningServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Starts the HTTP server when its module starts and stops it with the module.
pub struct HelloWorldActivator {
    config: HelloWorldConfig,
    server: Mutex<Option<RunningServer>>,
}

impl HelloWorldActivator {
    pub fn new(config: HelloWorldConfig) -> Self {
        Self {
            config,
            server: Mutex::new(None),
        }
    }

    /// Address the server is bound to while the module is active.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|s| s.addr)
    }
}

#[async_trait]
impl Activator for HelloWorldActivator {
    async fn start(&self, ctx: &ActivationContext) -> anyhow::Result<()> {
        let port: u16 = parse_property(
            &*ctx.properties,
            HTTP_SERVICE_PORT_PROPERTY,
            self.config.default_port,
        );
        let bind = format!("{}:{}", self.config.bind_host, port);
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", bind, e))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let addr = listener.local_addr()?;
        tracing::info!("HTTP server bound on {}", addr);

        let cancel = ctx.cancel.child_token();
        let shutdown = {
            let cancel = cancel.clone();
            async move {
                cancel.cancelled().await;
                tracing::info!("HTTP server shutting down gracefully (cancellation)");
            }
        };
        let app = routes::router(&self.config.context_path);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        });

        *self.server.lock() = Some(RunningServer {
            addr,
            cancel,
            handle,
        });

        let event = Event::new(self.config.ready_topic.clone())?
            .with_property("module", serde_json::json!(ctx.module.symbolic_name))
            .with_property("context_path", serde_json::json!(self.config.context_path))
            .with_property("port", serde_json::json!(addr.port()));
        ctx.events.post_event(event);
        Ok(())
    }

    async fn stop(&self, _ctx: &ActivationContext) -> anyhow::Result<()> {
        let Some(server) = self.server.lock().take() else {
            return Ok(());
        };
        server.cancel.cancel();
        server
            .handle
            .await
            .context("HTTP server task panicked")?
    }
}

/// Runtime descriptor of the web application module.
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(
        webapp_war_artifact().symbolic_name(),
        env!("CARGO_PKG_VERSION"),
    )
}

/// Catalog the web application at `location` and return its activator.
pub fn register(
    runtime: &LocalModuleRuntime,
    location: impl Into<String>,
    config: HelloWorldConfig,
) -> Arc<HelloWorldActivator> {
    let activator = Arc::new(HelloWorldActivator::new(config));
    runtime.register_location(
        location,
        descriptor(),
        Some(Arc::clone(&activator) as Arc<dyn Activator>),
    );
    activator
}
