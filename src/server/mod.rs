pub mod config;
mod directory_listing;
pub mod http_status;
pub mod observer;
mod request_handler;
mod request_parser;
mod select_handler;
pub mod signal;

use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use config::ServerConfig;
use observer::RequestObserver;
use request_handler::RequestHandler;
use select_handler::SelectHandler;

/// Lifecycle of a bound server. Configuration happens before an
/// `HttpServer` exists, so the first observable state is `Bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Bound,
    Serving,
    ShuttingDown,
    Terminated,
}

/// Iterative, single-threaded static file server: one connection is
/// accepted and answered completely before the next one.
pub struct HttpServer<O> {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    handler: RequestHandler<O>,
    poll_interval: Duration,
    state: ServerState,
}

impl<O: RequestObserver> HttpServer<O> {
    pub fn bind(
        config: &ServerConfig,
        port: u16,
        document_root: &Path,
        observer: O,
    ) -> io::Result<Self> {
        let handler = RequestHandler::new(document_root, config.no_cache, observer)?;

        let listener = TcpListener::bind((config.host.as_str(), port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!(
            "Bound {} serving {:?} (no-cache: {})",
            local_addr,
            handler.document_root(),
            config.no_cache
        );

        Ok(Self {
            listener: Some(listener),
            local_addr,
            handler,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            state: ServerState::Bound,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    fn transition(&mut self, next: ServerState) {
        debug!("Server state {:?} -> {:?}", self.state(), next);
        self.state = next;
    }

    /// Serves until `shutdown` is raised (`Ok`) or the listening socket
    /// fails (`Err`). The listener is closed either way.
    pub fn run(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        let result = match self.listener.take() {
            Some(listener) => {
                self.transition(ServerState::Serving);
                info!("Starting server on port {}...", self.local_addr.port());
                let result = self.serve(&listener, shutdown);
                self.transition(ServerState::ShuttingDown);
                drop(listener);
                result
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "server has already shut down",
            )),
        };

        if let Err(e) = &result {
            error!("Socket error: {}", e);
        }

        info!("Shutting down the server.");
        self.transition(ServerState::Terminated);

        result
    }

    fn serve(&self, listener: &TcpListener, shutdown: &AtomicBool) -> io::Result<()> {
        let select = SelectHandler::new(listener, self.poll_interval);
        let mut total_connections: u64 = 0;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Server interrupted, shutting down.");
                return Ok(());
            }

            if !select.wait_for_connection()? {
                continue;
            }

            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!("Dropping connection from {}: {}", peer, e);
                        continue;
                    }
                    total_connections += 1;
                    debug!("Accepted connection from {} (total: {})", peer, total_connections);
                    self.handler.handle_client(stream, peer);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!("Connection dropped before accept: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
