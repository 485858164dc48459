//! Health probe endpoint
//!
//! Minimal HTTP responder for liveness checks: `GET` anything returns
//! `200 OK` with body `OK`; other methods get `405`. One fixed response,
//! served straight off a TCP listener.

use crate::core::CdcResult;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const OK_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 2\r\nconnection: close\r\n\r\nOK";
const METHOD_NOT_ALLOWED_RESPONSE: &[u8] =
    b"HTTP/1.1 405 Method Not Allowed\r\ncontent-type: text/plain\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// Serve the health probe forever.
pub async fn serve(port: u16) -> CdcResult<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Health probe listening on port {}", port);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Health probe request from {}", peer);
        if let Err(e) = respond(stream).await {
            warn!("Health probe response failed: {}", e);
        }
    }
}

async fn respond(mut stream: TcpStream) -> std::io::Result<()> {
    let mut request = [0u8; 512];
    let read = stream.read(&mut request).await?;

    let response = if request[..read].starts_with(b"GET ") {
        OK_RESPONSE
    } else {
        METHOD_NOT_ALLOWED_RESPONSE
    };

    stream.write_all(response).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn probe(port: u16, request: &[u8]) -> String {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream.write_all(request).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_get_returns_ok() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                respond(stream).await.unwrap();
            }
        });

        let response = probe(port, b"GET /healthz HTTP/1.1\r\nhost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));
        assert!(response.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_non_get_is_rejected() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            respond(stream).await.unwrap();
        });

        let response = probe(port, b"POST /healthz HTTP/1.1\r\nhost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 405"));
    }
}
