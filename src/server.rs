//! TCP Server
//!
//! Accepts client connections and runs each one on its own task. A
//! connection carries any number of requests; it ends on EOF, on an I/O
//! error, or after a request that cannot be framed.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::protocol::{
    CodecError, Dispatcher, Request, RequestHeader, Response, REQUEST_HEADER_LEN,
};

#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    /// Largest request payload read off the socket
    pub max_payload_bytes: u32,
}

/// Accept connections until `shutdown` resolves
///
/// Connections already running are left to finish on their own tasks.
pub async fn run<F>(
    listener: TcpListener,
    dispatcher: Dispatcher,
    limits: ServerLimits,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    tracing::debug!(peer = %peer, "Client connected");
                    match serve_connection(stream, peer, dispatcher, limits).await {
                        Ok(()) => tracing::debug!(peer = %peer, "Client disconnected"),
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "Connection closed with error")
                        }
                    }
                });
            }
            _ = &mut shutdown => {
                tracing::info!("Stopped accepting connections");
                return Ok(());
            }
        }
    }
}

/// Serve requests on one connection until the client hangs up
pub async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    limits: ServerLimits,
) -> Result<()> {
    loop {
        let mut header_bytes = [0u8; REQUEST_HEADER_LEN];
        match stream.read_exact(&mut header_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let header = RequestHeader::parse(&header_bytes)?;
        if header.payload_size > limits.max_payload_bytes {
            send(&mut stream, &Response::GeneralError).await?;
            return Err(CodecError::PayloadTooLarge {
                size: header.payload_size,
                max: limits.max_payload_bytes,
            }
            .into());
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        stream.read_exact(&mut payload).await?;

        let request = match Request::decode(&header, &payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    client_id = %header.client_id,
                    code = header.code,
                    error = %e,
                    "Malformed request"
                );
                send(&mut stream, &Response::GeneralError).await?;
                return Err(e.into());
            }
        };
        drop(payload);

        if let Some(response) = dispatcher.handle(&header, request).await {
            send(&mut stream, &response).await?;
        }
    }
}

async fn send(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let bytes = match response.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, code = ?response.code(), "Failed to encode response");
            Response::GeneralError.encode()?
        }
    };
    stream.write_all(&bytes).await?;
    Ok(())
}
