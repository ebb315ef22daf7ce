//! memcached client
//!
//! Speaks the text protocol `set` command only. The connection is opened
//! lazily and dropped after any I/O error or timeout, so the next attempt
//! reconnects.

use appinstall_common::types::DeviceType;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{KvStore, StoreConnector, StoreError};

/// Longest key memcached accepts
pub const MAX_KEY_LEN: usize = 250;

const STORED: &str = "STORED";

type Connection = BufStream<TcpStream>;

/// One memcached connection
pub struct MemcacheClient {
    addr: String,
    timeout: Duration,
    conn: Option<Connection>,
}

impl MemcacheClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: None,
        }
    }

    /// Send one `set` and read the reply line, reusing `conn` when present
    async fn exchange(
        addr: &str,
        conn: Option<Connection>,
        key: &str,
        value: &[u8],
    ) -> Result<(Connection, String), StoreError> {
        let mut conn = match conn {
            Some(conn) => conn,
            None => {
                debug!(addr = %addr, "Connecting to memcached");
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|source| StoreError::Connect {
                        addr: addr.to_string(),
                        source,
                    })?;
                stream.set_nodelay(true).map_err(|source| StoreError::Connect {
                    addr: addr.to_string(),
                    source,
                })?;
                BufStream::new(stream)
            },
        };

        let io_err = |source| StoreError::Io {
            addr: addr.to_string(),
            source,
        };

        let header = format!("set {} 0 0 {}\r\n", key, value.len());
        conn.write_all(header.as_bytes()).await.map_err(io_err)?;
        conn.write_all(value).await.map_err(io_err)?;
        conn.write_all(b"\r\n").await.map_err(io_err)?;
        conn.flush().await.map_err(io_err)?;

        let mut reply = String::new();
        let read = conn.read_line(&mut reply).await.map_err(io_err)?;
        if read == 0 {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            )));
        }

        Ok((conn, reply.trim_end().to_string()))
    }
}

#[async_trait]
impl KvStore for MemcacheClient {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;

        // A timed-out exchange drops the connection it owned.
        let conn = self.conn.take();
        let (conn, reply) = match timeout(self.timeout, Self::exchange(&self.addr, conn, key, value)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Timeout {
                    addr: self.addr.clone(),
                    timeout: self.timeout,
                })
            },
        };
        self.conn = Some(conn);

        if reply == STORED {
            Ok(())
        } else {
            Err(StoreError::Rejected {
                addr: self.addr.clone(),
                reply,
            })
        }
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

/// Opens a [`MemcacheClient`] per writer worker
#[derive(Debug, Clone)]
pub struct MemcacheConnector {
    timeout: Duration,
}

impl MemcacheConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl StoreConnector for MemcacheConnector {
    fn connect(&self, _partition: DeviceType, addr: &str) -> Box<dyn KvStore> {
        Box::new(MemcacheClient::new(addr, self.timeout))
    }
}

/// memcached keys are at most 250 bytes with no whitespace or control characters
fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::net::TcpListener;

    /// Accepts connections and answers every `set` with `reply`.
    /// Returns the listener address and a receiver of (key, value) pairs seen.
    async fn stub_server(reply: &'static str) -> (String, tokio::sync::mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut socket = BufReader::new(socket);
                    loop {
                        let mut header = String::new();
                        if socket.read_line(&mut header).await.unwrap() == 0 {
                            break;
                        }
                        let parts: Vec<&str> = header.split_whitespace().collect();
                        let len: usize = parts[4].parse().unwrap();
                        let mut value = vec![0u8; len + 2];
                        socket.read_exact(&mut value).await.unwrap();
                        value.truncate(len);
                        tx.send((parts[1].to_string(), value)).unwrap();
                        socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
                    }
                });
            }
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn test_set_stored() {
        let (addr, mut seen) = stub_server("STORED\r\n").await;
        let mut client = MemcacheClient::new(addr.clone(), Duration::from_secs(2));

        client.set("idfa:abc", b"\x01\x02\r\n\x03").await.unwrap();
        client.set("idfa:def", b"xyz").await.unwrap();

        assert_eq!(seen.recv().await.unwrap(), ("idfa:abc".to_string(), b"\x01\x02\r\n\x03".to_vec()));
        assert_eq!(seen.recv().await.unwrap(), ("idfa:def".to_string(), b"xyz".to_vec()));
        assert_eq!(client.endpoint(), addr);
    }

    #[tokio::test]
    async fn test_set_rejected_reply() {
        let (addr, _seen) = stub_server("SERVER_ERROR out of memory\r\n").await;
        let mut client = MemcacheClient::new(addr, Duration::from_secs(2));

        let err = client.set("gaid:1", b"v").await.unwrap_err();
        match err {
            StoreError::Rejected { reply, .. } => assert_eq!(reply, "SERVER_ERROR out of memory"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_set_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut client = MemcacheClient::new(addr, Duration::from_millis(100));
        let err = client.set("adid:1", b"v").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let mut client = MemcacheClient::new(addr, Duration::from_secs(2));
        let err = client.set("dvid:1", b"v").await.unwrap_err();
        assert!(matches!(err, StoreError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_invalid_keys_are_not_sent() {
        let mut client = MemcacheClient::new("127.0.0.1:1", Duration::from_secs(1));

        let err = client.set("idfa:has space", b"v").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(!err.is_retryable());

        let long = format!("idfa:{}", "x".repeat(MAX_KEY_LEN));
        assert!(matches!(client.set(&long, b"v").await, Err(StoreError::InvalidKey(_))));
    }
}
