use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::AppState;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Listener for `/metrics` and `/healthz`; not started when `None`.
    pub admin_addr: Option<SocketAddr>,
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            listen_addr: config.listen_addr,
            admin_addr: config.admin_addr,
        }
    }
}

pub struct RunningGateway {
    addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl RunningGateway {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        for task in self.tasks.drain(..) {
            task.await.context("gateway task panicked")??;
        }
        Ok(())
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Bind the gateway (and, if configured, the admin listener) and serve in the background.
pub async fn start(config: ServerConfig, state: AppState) -> anyhow::Result<RunningGateway> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let admin_addr = match config.admin_addr {
        Some(bind) => {
            let admin = crate::http::admin::router(state.metrics());
            let (addr, task) = serve(bind, admin, shutdown_rx.clone(), "admin").await?;
            tasks.push(task);
            Some(addr)
        }
        None => None,
    };

    let app = crate::app(state);
    let (addr, task) = serve(config.listen_addr, app, shutdown_rx, "gateway").await?;
    tasks.push(task);

    Ok(RunningGateway {
        addr,
        admin_addr,
        shutdown_tx: Some(shutdown_tx),
        tasks,
    })
}

async fn serve(
    bind: SocketAddr,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
    name: &'static str,
) -> anyhow::Result<(SocketAddr, JoinHandle<anyhow::Result<()>>)> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {name} listener on {bind}"))?;
    let addr = listener.local_addr().context("read bound address")?;

    let task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .with_context(|| format!("serve {name}"))?;
        Ok(())
    });

    Ok((addr, task))
}
