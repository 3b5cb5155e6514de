//! Test client for talking to the load balancer
//!
//! Sends raw bytes and reads back exact-length replies or end-of-stream.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw TCP test client
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connect to a backend (or the proxy)
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Write bytes and flush
    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Read exactly `len` bytes
    pub async fn recv_exact(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(READ_TIMEOUT, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
        Ok(buf)
    }

    /// Send bytes and wait for the same number of bytes back
    pub async fn round_trip(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        self.send(data).await?;
        self.recv_exact(data.len()).await
    }

    /// True if the peer closed the connection (EOF or reset) within the timeout
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        match tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }

    /// Close the write side, signalling EOF to the peer
    pub async fn close(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::helpers::mock_backend::{MockBackend, ResponseMode};

    #[tokio::test]
    async fn test_client_round_trip_direct() {
        let mock = MockBackend::echo().await.unwrap();
        let mut client = TestClient::connect(mock.addr()).await.unwrap();

        let reply = client.round_trip(b"hello").await.unwrap();
        assert_eq!(reply, b"hello");

        client.close().await.unwrap();
        mock.shutdown();
    }

    #[tokio::test]
    async fn test_client_sees_close() {
        let mock = MockBackend::start(ResponseMode::Close).await.unwrap();
        let mut client = TestClient::connect(mock.addr()).await.unwrap();
        assert!(client.is_closed().await);
        mock.shutdown();
    }
}
