//! [`LinkServer`] – the HTTP and WebSocket listeners.
//!
//! Both listeners are thin transports over one [`ConnectionHub`]:
//!
//! * `ws_port` (default 5002) – the `{cmd, val}` socket protocol. Origins
//!   are checked during the upgrade handshake; refused clients get a 403
//!   and never reach the hub's registry.
//! * `http_port` (default 5001) – REST passthrough to the command router,
//!   guarded by the same origin policy.

pub mod allowlist;
pub mod http;
pub mod ws;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hostlink_middleware::ConnectionHub;
use hostlink_types::LinkError;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

pub const DEFAULT_HTTP_PORT: u16 = 5001;
pub const DEFAULT_WS_PORT: u16 = 5002;

/// Both listeners, not yet bound.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use hostlink_middleware::ConnectionHub;
/// use hostlink_server::LinkServer;
///
/// async fn serve(hub: Arc<ConnectionHub>) -> Result<(), hostlink_types::LinkError> {
///     LinkServer::new(hub)
///         .bind()
///         .await?
///         .serve(async {
///             let _ = tokio::signal::ctrl_c().await;
///         })
///         .await
/// }
/// ```
pub struct LinkServer {
    hub: Arc<ConnectionHub>,
    bind: IpAddr,
    http_port: u16,
    ws_port: u16,
}

impl LinkServer {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self {
            hub,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: DEFAULT_HTTP_PORT,
            ws_port: DEFAULT_WS_PORT,
        }
    }

    /// Listen address for both servers (builder-style).
    pub fn with_bind(mut self, addr: IpAddr) -> Self {
        self.bind = addr;
        self
    }

    /// Port `0` picks a free port.
    pub fn with_ports(mut self, http_port: u16, ws_port: u16) -> Self {
        self.http_port = http_port;
        self.ws_port = ws_port;
        self
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_port
    }

    /// Bind both listeners.
    ///
    /// # Errors
    ///
    /// [`LinkError::Channel`] when either address cannot be bound.
    pub async fn bind(self) -> Result<BoundServer, LinkError> {
        let http = listen(SocketAddr::new(self.bind, self.http_port)).await?;
        let ws = listen(SocketAddr::new(self.bind, self.ws_port)).await?;
        Ok(BoundServer { hub: self.hub, http, ws })
    }
}

async fn listen(addr: SocketAddr) -> Result<TcpListener, LinkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| LinkError::Channel(format!("bind error on {addr}: {e}")))
}

/// Bound listeners, ready to serve.
pub struct BoundServer {
    hub: Arc<ConnectionHub>,
    http: TcpListener,
    ws: TcpListener,
}

impl BoundServer {
    pub fn http_addr(&self) -> Result<SocketAddr, LinkError> {
        self.http
            .local_addr()
            .map_err(|e| LinkError::Channel(format!("http listener: {e}")))
    }

    pub fn ws_addr(&self) -> Result<SocketAddr, LinkError> {
        self.ws
            .local_addr()
            .map_err(|e| LinkError::Channel(format!("ws listener: {e}")))
    }

    /// Serve until `shutdown` resolves. Open sockets are closed on the way
    /// out.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), LinkError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let http_addr = self.http_addr()?;
        let ws_addr = self.ws_addr()?;
        let (stop_tx, _) = broadcast::channel::<()>(1);

        let ws_task = tokio::spawn(ws::accept_loop(
            self.ws,
            Arc::clone(&self.hub),
            stop_tx.subscribe(),
        ));

        let app = http::build_router(Arc::clone(&self.hub));
        let mut http_stop = stop_tx.subscribe();
        let http_task = tokio::spawn(async move {
            axum::serve(
                self.http,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = http_stop.recv().await;
            })
            .await
        });

        info!(%http_addr, %ws_addr, "hostlink listening");
        shutdown.await;
        info!("shutting down listeners");
        let _ = stop_tx.send(());

        if let Err(e) = ws_task.await {
            error!(error = %e, "websocket listener task failed");
        }
        match http_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinkError::Channel(format!("http server: {e}"))),
            Err(e) => Err(LinkError::Channel(format!("http server task: {e}"))),
        }
    }
}
