//! # Transport capability traits and the built-in TCP line connector.
//!
//! Resource managers consume transports through two narrow traits:
//!
//! - [`Connect`] — opens a [`Session`] to an endpoint.
//! - [`Session`] — a single live connection: receive [`Frame`]s, send text.
//!
//! The traits deliberately know nothing about demand, reconnection, or
//! stores; that machinery lives in the resource managers. Any transport
//! (a push stream, a socket, an in-memory test pipe) plugs in by
//! implementing these two traits.
//!
//! [`TcpLineConnector`] is the built-in implementation: newline-delimited
//! text frames over a [`tokio::net::TcpStream`].

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::TransportError;

/// One inbound transport event.
///
/// The two recognized kinds of the push protocol: a payload-carrying message
/// and a transport-level error report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A payload delivered by the remote side.
    Message(String),
    /// A transport-level failure reported by the remote side or the stack.
    Error(String),
}

/// A single live connection.
///
/// Sessions are exclusively owned by one resource manager at a time and are
/// discarded on disconnect, never pooled or reused.
#[async_trait]
pub trait Session: Send {
    /// Receives the next frame. `None` means the connection closed.
    async fn recv(&mut self) -> Option<Frame>;

    /// Transmits one text payload.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
}

/// Opens sessions to an endpoint.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    /// Opens a new session to `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn Session>, TransportError>;
}

/// Newline-delimited text frames over TCP.
///
/// Each inbound line is one [`Frame::Message`]; outbound payloads are
/// written with a trailing newline. Read errors surface as
/// [`Frame::Error`] so the owning resource can normalize and fan them out.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpLineConnector;

#[async_trait]
impl Connect for TcpLineConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Session>, TransportError> {
        let stream = TcpStream::connect(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (read, write) = stream.into_split();
        Ok(Box::new(TcpLineSession {
            lines: BufReader::new(read).lines(),
            writer: write,
        }))
    }
}

struct TcpLineSession {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

#[async_trait]
impl Session for TcpLineSession {
    async fn recv(&mut self) -> Option<Frame> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(Frame::Message(line)),
            Ok(None) => None,
            Err(e) => Some(Frame::Error(e.to_string())),
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let write = async {
            self.writer.write_all(text.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        };
        write.await.map_err(|e| TransportError::Send {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_line_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"hello from peer\n").await.unwrap();

            let mut buf = vec![0u8; 64];
            let n = peer.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let mut session = TcpLineConnector.open(&addr.to_string()).await.unwrap();
        assert_eq!(
            session.recv().await,
            Some(Frame::Message("hello from peer".to_string()))
        );

        session.send("hello from client".to_string()).await.unwrap();
        assert_eq!(server.await.unwrap(), "hello from client\n");
    }

    #[tokio::test]
    async fn connect_failure_names_the_endpoint() {
        // A port that nothing listens on.
        let err = TcpLineConnector.open("127.0.0.1:1").await.err().unwrap();
        assert_eq!(err.as_label(), "transport_connect");
        assert_eq!(err.url(), Some("127.0.0.1:1"));
    }
}
