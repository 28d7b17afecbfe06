/// RESP connections to backend data nodes
///
/// One `RespConnection` is opened per slot migration against the source
/// master and dropped (closing the socket) when the slot completes, fails or
/// is stopped.
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::resp::{RespEncoder, RespError, RespParser, RespValue};
use super::{Connector, MigrationConn, Partition};
use crate::error::{MigrateError, MigrateResult};
use crate::models::{NodeAddr, SlotId};

/// Connector for real nodes over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Timeout for establishing connections
    connect_timeout: Duration,
    /// Timeout for each reply; `None` waits as long as the node takes
    io_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, io_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    /// Connect to a node, configuring the socket for request/reply traffic
    pub async fn connect_stream(&self, addr: &str) -> MigrateResult<TcpStream> {
        debug!(addr, "Connecting to backend");

        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(addr, "Failed to configure backend stream: {}", e);
                }
                debug!(addr, "Connected to backend");
                Ok(stream)
            }
            Ok(Err(e)) => {
                debug!(addr, "Network error connecting to backend: {}", e);
                Err(MigrateError::Network(e))
            }
            Err(_) => {
                debug!(addr, "Timeout connecting to backend");
                Err(MigrateError::timeout(format!("connect to {}", addr)))
            }
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), None)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> MigrateResult<Box<dyn MigrationConn>> {
        let stream = self.connect_stream(addr).await?;
        Ok(Box::new(RespConnection::new(stream, addr, self.io_timeout)))
    }
}

/// A request/reply RESP connection
pub struct RespConnection {
    stream: TcpStream,
    addr: String,
    read_buf: BytesMut,
    io_timeout: Option<Duration>,
}

impl RespConnection {
    pub fn new(stream: TcpStream, addr: &str, io_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            addr: addr.to_string(),
            read_buf: BytesMut::with_capacity(4096),
            io_timeout,
        }
    }

    /// Send one command and wait for its reply; error replies become `Backend` errors
    pub async fn request(&mut self, command: &str, args: &[&[u8]]) -> MigrateResult<RespValue> {
        let frame = RespEncoder::encode_command(command, args);
        self.stream.write_all(&frame).await?;

        let reply = match self.io_timeout {
            Some(limit) => {
                let operation = format!("{} on {}", command, self.addr);
                timeout(limit, self.read_reply())
                    .await
                    .map_err(|_| MigrateError::timeout(operation))??
            }
            None => self.read_reply().await?,
        };

        match reply {
            RespValue::Error(message) => Err(MigrateError::backend(command, message)),
            other => Ok(other),
        }
    }

    async fn read_reply(&mut self) -> MigrateResult<RespValue> {
        loop {
            if let Some(value) = RespParser::parse(&mut self.read_buf)? {
                return Ok(value);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(MigrateError::Network(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection to {} closed", self.addr),
                )));
            }
        }
    }
}

fn unexpected(command: &str, reply: &RespValue) -> MigrateError {
    MigrateError::Protocol(RespError::UnexpectedReply {
        command: command.to_string(),
        reply: reply.kind().to_string(),
    })
}

#[async_trait]
impl MigrationConn for RespConnection {
    async fn migrate_partition(
        &mut self,
        dest: &NodeAddr,
        partition: Partition,
        count: u64,
        slot: SlotId,
        timeout_ms: u64,
    ) -> MigrateResult<u64> {
        let port = dest.port.to_string();
        let count = count.to_string();
        let slot = slot.to_string();
        let timeout_ms = timeout_ms.to_string();
        let reply = self
            .request(
                "MIGRATEDB",
                &[
                    dest.host.as_bytes(),
                    port.as_bytes(),
                    partition.as_str().as_bytes(),
                    count.as_bytes(),
                    slot.as_bytes(),
                    timeout_ms.as_bytes(),
                ],
            )
            .await?;

        match reply.as_integer() {
            Some(moved) if moved >= 0 => Ok(moved as u64),
            _ => Err(unexpected("MIGRATEDB", &reply)),
        }
    }

    async fn scan(&mut self, cursor: u64, count: u64) -> MigrateResult<(u64, Vec<Bytes>)> {
        let cursor = cursor.to_string();
        let count = count.to_string();
        let reply = self
            .request("SCAN", &[cursor.as_bytes(), &b"COUNT"[..], count.as_bytes()])
            .await?;

        let parse = |reply: RespValue| -> Option<(u64, Vec<Bytes>)> {
            let mut parts = reply.into_array()?.into_iter();
            let next = u64::try_from(parts.next()?.as_integer()?).ok()?;
            let keys = parts
                .next()?
                .into_array()?
                .iter()
                .map(|k| k.as_bytes().cloned())
                .collect::<Option<Vec<_>>>()?;
            Some((next, keys))
        };

        let kind = reply.kind();
        parse(reply).ok_or_else(|| {
            MigrateError::Protocol(RespError::UnexpectedReply {
                command: "SCAN".to_string(),
                reply: kind.to_string(),
            })
        })
    }

    async fn migrate_key(
        &mut self,
        dest: &NodeAddr,
        key: &[u8],
        slot: SlotId,
        timeout_ms: u64,
    ) -> MigrateResult<()> {
        let port = dest.port.to_string();
        let slot = slot.to_string();
        let timeout_ms = timeout_ms.to_string();
        self.request(
            "MIGRATE",
            &[
                dest.host.as_bytes(),
                port.as_bytes(),
                key,
                slot.as_bytes(),
                timeout_ms.as_bytes(),
            ],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve canned replies, one per command received
    async fn fake_node(replies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<RespValue>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let mut received = Vec::new();
            for reply in replies {
                let command = loop {
                    if let Some(value) = RespParser::parse(&mut buf).unwrap() {
                        break value;
                    }
                    if stream.read_buf(&mut buf).await.unwrap() == 0 {
                        return received;
                    }
                };
                received.push(command);
                stream.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });

        (addr, handle)
    }

    fn dest() -> NodeAddr {
        "127.0.0.1:6390".parse().unwrap()
    }

    #[tokio::test]
    async fn test_migrate_partition_round_trip() {
        let (addr, node) = fake_node(vec![":3\r\n"]).await;
        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();

        let moved = conn
            .migrate_partition(&dest(), Partition::Hash, 10, 7, 30000)
            .await
            .unwrap();
        assert_eq!(moved, 3);
        drop(conn);

        let received = node.await.unwrap();
        let expected = RespEncoder::command(
            "MIGRATEDB",
            &[
                "127.0.0.1".as_bytes(),
                "6390".as_bytes(),
                "HASH".as_bytes(),
                "10".as_bytes(),
                "7".as_bytes(),
                "30000".as_bytes(),
            ],
        );
        assert_eq!(received, vec![expected]);
    }

    #[tokio::test]
    async fn test_error_reply_is_backend_error() {
        let (addr, _node) = fake_node(vec!["-ERR slot not found\r\n"]).await;
        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();

        let err = conn
            .migrate_partition(&dest(), Partition::Kv, 10, 1, 30000)
            .await
            .unwrap_err();
        match err {
            MigrateError::Backend { command, message } => {
                assert_eq!(command, "MIGRATEDB");
                assert_eq!(message, "ERR slot not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_and_migrate_key() {
        let (addr, node) = fake_node(vec![
            "*2\r\n$1\r\n0\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n",
            "+OK\r\n",
        ])
        .await;
        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();

        let (cursor, keys) = conn.scan(0, 10).await.unwrap();
        assert_eq!(cursor, 0);
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("b")]);

        conn.migrate_key(&dest(), b"a", 2, 1000).await.unwrap();
        drop(conn);
        let received = node.await.unwrap();
        assert_eq!(received.len(), 2);
        let scan_args: [&[u8]; 3] = [b"0", b"COUNT", b"10"];
        assert_eq!(received[0], RespEncoder::command("SCAN", &scan_args));
    }

    #[tokio::test]
    async fn test_unexpected_reply_type() {
        let (addr, _node) = fake_node(vec!["+OK\r\n"]).await;
        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();

        let err = conn
            .migrate_partition(&dest(), Partition::Kv, 10, 1, 30000)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_closed_connection_is_network_error() {
        let (addr, _node) = fake_node(vec![]).await;
        let mut conn = TcpConnector::default().connect(&addr).await.unwrap();

        let err = conn.scan(0, 10).await.unwrap_err();
        assert!(matches!(err, MigrateError::Network(_)));
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let connector = TcpConnector::new(Duration::from_secs(1), Some(Duration::from_millis(50)));
        let mut conn = connector.connect(&addr).await.unwrap();

        let err = conn.scan(0, 10).await.unwrap_err();
        assert!(matches!(err, MigrateError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpConnector::default().connect(&addr).await;
        assert!(matches!(result, Err(MigrateError::Network(_))));
    }
}
