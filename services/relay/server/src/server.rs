//! Single-threaded, readiness-driven connection multiplexer.
//!
//! The listener and every accepted connection wait together. A connection
//! that becomes readable gets one read/dispatch/respond cycle, run to
//! completion before anything else is serviced, and is then closed. There
//! is no per-connection state between readiness and close.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::transport::{discard_unread, listen_tcp};

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 5;

/// A connection whose readiness wait finished
type Ready = (TcpStream, SocketAddr, std::io::Result<()>);

/// Relay server: one listener plus the connections awaiting readability
pub struct RelayServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl RelayServer {
    /// Bind a listener on `addr`
    pub fn bind(addr: SocketAddr, backlog: u32, dispatcher: Dispatcher) -> std::io::Result<Self> {
        let listener = listen_tcp(addr, backlog)?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(Self::from_listener(listener, dispatcher))
    }

    /// Serve on an already bound listener
    pub fn from_listener(listener: TcpListener, dispatcher: Dispatcher) -> Self {
        Self {
            listener,
            dispatcher,
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C, serving until killed: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C, shutting down");
        })
        .await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Connections still waiting for their first byte are closed on exit.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut waiting: FuturesUnordered<BoxFuture<'static, Ready>> =
            FuturesUnordered::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        waiting.push(Box::pin(async move {
                            let ready = stream.readable().await;
                            (stream, peer, ready)
                        }));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },

                Some((stream, peer, ready)) = waiting.next(), if !waiting.is_empty() => {
                    match ready {
                        Ok(()) => self.serve(stream, peer).await,
                        Err(e) => warn!("Connection from {} failed before reading: {}", peer, e),
                    }
                }
            }
        }

        info!("Relay stopped, closing {} idle connections", waiting.len());
        Ok(())
    }

    /// One read/dispatch/respond cycle, then close
    async fn serve(&self, mut stream: TcpStream, peer: SocketAddr) {
        match self.dispatcher.dispatch(&mut stream).await {
            Ok(code) => info!("Sent {:?} response to {}", code, peer),
            Err(e) => error!("Abandoned request from {}: {}", peer, e),
        }

        let discarded = discard_unread(&stream);
        if discarded > 0 {
            debug!("Discarded {} unread bytes from {}", discarded, peer);
        }
        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", peer, e);
        }
    }
}
