//! Transport session: one TCP connection carrying length-prefixed frames.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_core::wire::{decode_frame, encode_frame, FrameDecodeError, MAX_FRAME_LEN};
use aria_core::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::Notify;

const LEN_SIZE: usize = 4;

/// Socket tuning for bulk audio transfer. Larger buffers mean fewer
/// syscalls per megabyte at the cost of memory per connection.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub recv_buffer: u32,
    pub send_buffer: u32,
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            recv_buffer: 262_144,
            send_buffer: 262_144,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A connected session. `receive` blocks until a full frame, an error, or a
/// `close` from any other task.
pub struct Session {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    closer: SessionCloser,
}

/// Cloneable handle that tears the session down from any task. Idempotent;
/// a blocked `receive` observes it as `SessionError::Closed`.
#[derive(Clone)]
pub struct SessionCloser {
    inner: Arc<CloserInner>,
}

struct CloserInner {
    closed: AtomicBool,
    notify: Notify,
}

impl SessionCloser {
    fn new() -> Self {
        Self {
            inner: Arc::new(CloserInner {
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            // notify_one stores a permit, so a receive() that registers
            // after this call still observes the close.
            self.inner.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Session {
    /// Resolve, tune, and connect within the configured timeout.
    pub async fn connect(host: &str, port: u16, opts: &SessionOptions) -> io::Result<Session> {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no address")
            })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_recv_buffer_size(opts.recv_buffer)?;
        socket.set_send_buffer_size(opts.send_buffer)?;
        let stream = tokio::time::timeout(opts.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        Ok(Self::from_stream(stream, addr))
    }

    /// Wrap an already-accepted stream (server side, tests).
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> Session {
        let (reader, writer) = stream.into_split();
        Session {
            reader,
            writer,
            peer,
            closer: SessionCloser::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn closer(&self) -> SessionCloser {
        self.closer.clone()
    }

    /// Read exactly one frame. Cancels with `Closed` when the closer fires.
    pub async fn receive(&mut self) -> Result<Message, SessionError> {
        if self.closer.is_closed() {
            return Err(SessionError::Closed);
        }
        let closer = self.closer.clone();
        tokio::select! {
            _ = closer.inner.notify.notified() => Err(SessionError::Closed),
            r = read_one_frame(&mut self.reader) => r,
        }
    }

    /// Encode and write one frame.
    pub async fn send(&mut self, msg: &Message) -> Result<(), SessionError> {
        if self.closer.is_closed() {
            return Err(SessionError::Closed);
        }
        let frame = encode_frame(msg).map_err(|e| {
            SessionError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

async fn read_one_frame(reader: &mut OwnedReadHalf) -> Result<Message, SessionError> {
    let mut len_buf = [0u8; LEN_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(SessionError::MalformedFrame(FrameDecodeError::TooLarge));
    }
    let mut frame = vec![0u8; LEN_SIZE + len as usize];
    frame[..LEN_SIZE].copy_from_slice(&len_buf);
    reader.read_exact(&mut frame[LEN_SIZE..]).await?;
    match decode_frame(&frame) {
        Ok((msg, _)) => Ok(msg),
        Err(FrameDecodeError::UnknownKind(k)) => Err(SessionError::UnknownMessageKind(k)),
        Err(e) => Err(SessionError::MalformedFrame(e)),
    }
}

/// Transport-level failure. Protocol errors are fatal for the connection
/// and must take the reconnect path; I/O errors are counted against the
/// consecutive-error budget first.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),
    #[error("malformed frame: {0}")]
    MalformedFrame(FrameDecodeError),
}

impl SessionError {
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SessionError::UnknownMessageKind(_) | SessionError::MalformedFrame(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Session, Session) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            Session::connect("127.0.0.1", addr.port(), &SessionOptions::default())
                .await
                .unwrap()
        });
        let (stream, peer) = listener.accept().await.unwrap();
        let server = Session::from_stream(stream, peer);
        (client.await.unwrap(), server)
    }

    #[tokio::test]
    async fn send_and_receive_roundtrip() {
        let (mut client, mut server) = pair().await;
        server
            .send(&Message::Notification { text: "hi".into() })
            .await
            .unwrap();
        server
            .send(&Message::Data {
                offset: 42,
                payload: vec![1, 2, 3],
            })
            .await
            .unwrap();
        assert_eq!(
            client.receive().await.unwrap(),
            Message::Notification { text: "hi".into() }
        );
        assert_eq!(
            client.receive().await.unwrap(),
            Message::Data {
                offset: 42,
                payload: vec![1, 2, 3]
            }
        );
    }

    #[tokio::test]
    async fn close_unblocks_pending_receive() {
        let (mut client, _server) = pair().await;
        let closer = client.closer();
        let handle = tokio::spawn(async move { client.receive().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close();
        closer.close(); // idempotent
        let r = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receive did not unblock")
            .unwrap();
        assert!(matches!(r, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn receive_after_close_fails_immediately() {
        let (mut client, _server) = pair().await;
        client.closer().close();
        assert!(matches!(client.receive().await, Err(SessionError::Closed)));
        assert!(matches!(
            client.send(&Message::Play).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn unknown_kind_surfaces_as_protocol_error() {
        let (mut client, server) = pair().await;
        // Hand-craft a frame with an unassigned kind byte.
        let mut raw = vec![];
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.push(aria_core::PROTOCOL_VERSION);
        raw.push(250);
        let mut writer = server.writer;
        writer.write_all(&raw).await.unwrap();
        writer.flush().await.unwrap();
        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownMessageKind(250)));
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn peer_disconnect_is_io_error() {
        let (mut client, server) = pair().await;
        drop(server);
        assert!(matches!(
            client.receive().await,
            Err(SessionError::Io(_))
        ));
    }
}
