//! Raw TCP listener and the chunked read shared with the TCP proxy.

use crate::config::Protocol;
use crate::imposter::Imposter;
use crate::request::Request;
use crate::response::Response;
use base64::Engine as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

/// Silence after the last chunk that ends a message.
pub(crate) const IDLE_GAP: Duration = Duration::from_millis(100);

/// Read one message: block for the first chunk, then keep reading until EOF
/// or an idle gap. An empty result means the peer closed the connection.
pub(crate) async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut message = Vec::new();
    let mut chunk = [0u8; 8192];
    let n = reader.read(&mut chunk).await?;
    if n == 0 {
        return Ok(message);
    }
    message.extend_from_slice(&chunk[..n]);
    loop {
        match tokio::time::timeout(IDLE_GAP, reader.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => return Ok(message),
            Ok(Ok(n)) => message.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e),
        }
    }
}

pub(super) async fn serve_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    imposter: Arc<Imposter>,
) -> anyhow::Result<()> {
    let binary = imposter.mode().is_binary();
    loop {
        let message = read_message(&mut stream).await?;
        if message.is_empty() {
            return Ok(());
        }
        let data = if binary {
            base64::engine::general_purpose::STANDARD.encode(&message)
        } else {
            String::from_utf8_lossy(&message).into_owned()
        };

        let response = match imposter.handle(Request::tcp(addr.to_string(), data)).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to imposter {} failed: {}", imposter.port(), e);
                Response::from_error(Protocol::Tcp, &e)
            }
        };
        let payload = response.data_bytes(binary);
        if !payload.is_empty() {
            stream.write_all(&payload).await?;
        }
    }
}
