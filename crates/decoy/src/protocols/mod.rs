//! Listeners that turn wire traffic into requests for an imposter.
//!
//! # Module Structure
//!
//! - `http` - hyper http1 connections
//! - `tcp` - raw payloads, one request per idle-delimited chunk
//! - `smtp` - accepting SMTP dialogue, one request per message

mod http;
mod smtp;
pub(crate) mod tcp;

pub use http::handle_request;

use crate::config::Protocol;
use crate::imposter::Imposter;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Accept connections for `imposter` until it is shut down.
pub fn spawn(listener: TcpListener, imposter: Arc<Imposter>) -> JoinHandle<()> {
    let port = imposter.port();
    let mut shutdown_rx = imposter.subscribe_shutdown();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let imposter = Arc::clone(&imposter);
                            tokio::spawn(async move {
                                let served = match imposter.protocol() {
                                    Protocol::Http | Protocol::Https => {
                                        http::serve_connection(stream, addr, imposter).await
                                    }
                                    Protocol::Tcp => tcp::serve_connection(stream, addr, imposter).await,
                                    Protocol::Smtp => smtp::serve_connection(stream, addr, imposter).await,
                                };
                                if let Err(e) = served {
                                    debug!("Connection error on port {}: {}", port, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on port {}: {}", port, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Imposter on port {} shutting down", port);
                    break;
                }
            }
        }
    })
}
