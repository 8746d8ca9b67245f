//! Receive-loop driver: owns a session, feeds the client engine, and
//! applies the reconnect policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_core::{ClientEngine, ServerInfo, Song};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::session::{Session, SessionCloser, SessionError, SessionOptions};

/// Driver tuning. Tests shrink the delays.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub session: SessionOptions,
    /// Delay before the single reconnect attempt after a transport failure.
    pub reconnect_backoff: Duration,
    /// Consecutive receive failures tolerated before tearing the session
    /// down.
    pub max_consecutive_errors: u32,
    /// Pause between failed receives while still under the error budget.
    pub error_retry_delay: Duration,
    /// Cadence of the playback position/end poll.
    pub poll_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            reconnect_backoff: Duration::from_secs(2),
            max_consecutive_errors: 5,
            error_retry_delay: Duration::from_millis(10),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Handle to a running client: one receive-loop task, one playback-poll
/// task, shared engine.
pub struct NetworkClient {
    engine: Arc<Mutex<ClientEngine>>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    closer: Arc<std::sync::Mutex<Option<SessionCloser>>>,
    recv_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl NetworkClient {
    /// Connect in the background and start receiving. Connectivity failures
    /// are reported through the engine's status sink.
    pub fn spawn(host: &str, port: u16, engine: ClientEngine, opts: ClientOptions) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let running = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(false));
        let closer: Arc<std::sync::Mutex<Option<SessionCloser>>> =
            Arc::new(std::sync::Mutex::new(None));

        let loop_ctx = LoopContext {
            host: host.to_string(),
            port,
            engine: engine.clone(),
            running: running.clone(),
            connected: connected.clone(),
            closer: closer.clone(),
            opts: opts.clone(),
        };
        let recv_task = tokio::spawn(receive_loop(loop_ctx));

        let poll_engine = engine.clone();
        let poll_running = running.clone();
        let poll_interval = opts.poll_interval;
        let poll_task = tokio::spawn(async move {
            while poll_running.load(Ordering::SeqCst) {
                tokio::time::sleep(poll_interval).await;
                poll_engine.lock().await.poll_playback();
            }
        });

        Self {
            engine,
            running,
            connected,
            closer,
            recv_task,
            poll_task,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Live connection info, or None while disconnected. Rebuilt per call.
    pub async fn info(&self) -> Option<ServerInfo> {
        if !self.connected() {
            return None;
        }
        Some(self.engine.lock().await.server_info())
    }

    /// Songs received over this connection so far.
    pub async fn songs(&self) -> Vec<Song> {
        self.engine.lock().await.received_songs().to_vec()
    }

    pub async fn with_engine<R>(&self, f: impl FnOnce(&ClientEngine) -> R) -> R {
        f(&*self.engine.lock().await)
    }

    /// Stop the receive loop, unblock any pending receive, and join both
    /// tasks. No reconnect is attempted afterwards.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(closer) = self.closer.lock().expect("closer lock poisoned").take() {
            closer.close();
        }
        let _ = self.recv_task.await;
        let _ = self.poll_task.await;
    }
}

struct LoopContext {
    host: String,
    port: u16,
    engine: Arc<Mutex<ClientEngine>>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    closer: Arc<std::sync::Mutex<Option<SessionCloser>>>,
    opts: ClientOptions,
}

impl LoopContext {
    fn install(&self, session: &Session) {
        *self.closer.lock().expect("closer lock poisoned") = Some(session.closer());
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Single reconnect attempt after the backoff. `None` is terminal until
    /// the caller retries explicitly.
    async fn reconnect(&self) -> Option<Session> {
        self.connected.store(false, Ordering::SeqCst);
        tokio::time::sleep(self.opts.reconnect_backoff).await;
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        match Session::connect(&self.host, self.port, &self.opts.session).await {
            Ok(session) => {
                tracing::info!(host = %self.host, port = self.port, "reconnect succeeded");
                self.install(&session);
                Some(session)
            }
            Err(e) => {
                tracing::error!(host = %self.host, port = self.port, error = %e, "reconnect failed");
                self.engine.lock().await.connection_lost();
                None
            }
        }
    }
}

async fn receive_loop(ctx: LoopContext) {
    let mut session = match Session::connect(&ctx.host, ctx.port, &ctx.opts.session).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(host = %ctx.host, port = ctx.port, error = %e, "connect failed");
            ctx.engine.lock().await.connection_lost();
            return;
        }
    };
    tracing::info!(host = %ctx.host, port = ctx.port, "connected");
    ctx.install(&session);

    let mut errors: u32 = 0;
    while ctx.running.load(Ordering::SeqCst) {
        match session.receive().await {
            Ok(msg) => {
                errors = 0;
                if let Err(e) = ctx.engine.lock().await.handle_message(msg) {
                    // Fatal for the transfer, not the session.
                    tracing::error!(error = %e, "transfer failed");
                }
            }
            Err(SessionError::Closed) => break,
            Err(e) if e.is_protocol() => {
                tracing::error!(error = %e, "protocol error, closing connection");
                match ctx.reconnect().await {
                    Some(s) => {
                        session = s;
                        errors = 0;
                    }
                    None => break,
                }
            }
            Err(e) => {
                errors += 1;
                tracing::warn!(error = %e, errors, "receive failed");
                if errors >= ctx.opts.max_consecutive_errors {
                    match ctx.reconnect().await {
                        Some(s) => {
                            session = s;
                            errors = 0;
                        }
                        None => break,
                    }
                } else {
                    tokio::time::sleep(ctx.opts.error_retry_delay).await;
                }
            }
        }
    }
    ctx.connected.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    use aria_core::{Message, StatusSink};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use crate::playback::ClockPlayer;
    use crate::session::Session;

    #[derive(Clone, Default)]
    struct RecordingSink {
        infos: Arc<StdMutex<Vec<Option<ServerInfo>>>>,
        notes: Arc<StdMutex<Vec<String>>>,
    }

    impl StatusSink for RecordingSink {
        fn connection_info_changed(&mut self, info: Option<&ServerInfo>) {
            self.infos.lock().unwrap().push(info.cloned());
        }

        fn notification(&mut self, text: &str) {
            self.notes.lock().unwrap().push(text.to_string());
        }
    }

    fn test_opts() -> ClientOptions {
        ClientOptions {
            session: SessionOptions::default(),
            reconnect_backoff: Duration::from_millis(50),
            max_consecutive_errors: 5,
            error_retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(50),
        }
    }

    fn test_engine(dir: &Path, port: u16, sink: RecordingSink) -> ClientEngine {
        ClientEngine::new(
            dir.to_path_buf(),
            "127.0.0.1",
            port,
            Box::new(ClockPlayer::new()),
            Box::new(sink),
        )
    }

    async fn accept_session(listener: &TcpListener) -> Session {
        let (stream, peer) = listener.accept().await.unwrap();
        Session::from_stream(stream, peer)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn streams_song_into_download_dir() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let client = NetworkClient::spawn(
            "127.0.0.1",
            port,
            test_engine(dir.path(), port, sink),
            test_opts(),
        );

        let mut server = accept_session(&listener).await;
        let source: Vec<u8> = (0..100_000u32).map(|i| (i % 241) as u8).collect();
        server
            .send(&Message::NewSong {
                song: Song::from_location("server-side"),
                display_name: "tiny.mp3".into(),
                total_length: source.len() as u64,
            })
            .await
            .unwrap();
        for start in (0..source.len()).step_by(32 * 1024) {
            let end = (start + 32 * 1024).min(source.len());
            server
                .send(&Message::Data {
                    offset: start as u64,
                    payload: source[start..end].to_vec(),
                })
                .await
                .unwrap();
        }
        server.send(&Message::EndOfSong).await.unwrap();

        let engine = client.engine.clone();
        wait_until(
            || {
                engine
                    .try_lock()
                    .map(|e| e.received_songs().len() == 1 && !e.transfer_in_progress())
                    .unwrap_or(false)
            },
            "song to finish",
        )
        .await;

        let path = dir.path().join("tiny.mp3");
        assert_eq!(std::fs::read(&path).unwrap(), source);
        assert!(client.connected());
        let info = client.info().await.unwrap();
        assert_eq!(info.port, port);
        assert!(!info.is_host);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn reconnects_once_after_consecutive_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let client = NetworkClient::spawn(
            "127.0.0.1",
            port,
            test_engine(dir.path(), port, sink.clone()),
            test_opts(),
        );

        let first = accept_session(&listener).await;
        // Kill the connection; the client burns through its error budget
        // and comes back exactly once after the backoff.
        drop(first);
        let mut second = tokio::time::timeout(Duration::from_secs(5), accept_session(&listener))
            .await
            .expect("no reconnect attempt");
        wait_until(|| client.connected(), "connected flag after reconnect").await;

        // The revived session still works.
        second
            .send(&Message::Notification { text: "back".into() })
            .await
            .unwrap();
        wait_until(
            || sink.notes.lock().unwrap().contains(&"back".to_string()),
            "notification after reconnect",
        )
        .await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_kind_takes_reconnect_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let client = NetworkClient::spawn(
            "127.0.0.1",
            port,
            test_engine(dir.path(), port, RecordingSink::default()),
            test_opts(),
        );

        let (mut first, _peer) = listener.accept().await.unwrap();
        let mut raw = vec![];
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.push(aria_core::PROTOCOL_VERSION);
        raw.push(199);
        first.write_all(&raw).await.unwrap();
        first.flush().await.unwrap();

        // One unknown frame is enough; no error budget applies.
        let _second = tokio::time::timeout(Duration::from_secs(5), accept_session(&listener))
            .await
            .expect("protocol error did not trigger reconnect");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn failed_reconnect_is_terminal_and_notifies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let client = NetworkClient::spawn(
            "127.0.0.1",
            port,
            test_engine(dir.path(), port, sink.clone()),
            test_opts(),
        );

        let first = accept_session(&listener).await;
        // Nothing is listening anymore: the one reconnect attempt fails.
        drop(listener);
        drop(first);

        wait_until(
            || sink.infos.lock().unwrap().last() == Some(&None),
            "connectivity-loss notification",
        )
        .await;
        assert!(!client.connected());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_unblocks_blocked_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let client = NetworkClient::spawn(
            "127.0.0.1",
            port,
            test_engine(dir.path(), port, RecordingSink::default()),
            test_opts(),
        );
        let _server = accept_session(&listener).await;
        wait_until(|| client.connected(), "connect").await;

        // The receive loop is parked on a frame read; shutdown must not hang.
        tokio::time::timeout(Duration::from_secs(2), client.shutdown())
            .await
            .expect("shutdown hung on blocked receive");
    }

    #[tokio::test]
    async fn connect_failure_notifies_immediately() {
        // Bind and drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let client = NetworkClient::spawn(
            "127.0.0.1",
            port,
            test_engine(dir.path(), port, sink.clone()),
            test_opts(),
        );
        wait_until(
            || sink.infos.lock().unwrap().last() == Some(&None),
            "connect-failure notification",
        )
        .await;
        assert!(!client.connected());
        assert!(client.info().await.is_none());
        client.shutdown().await;
    }
}
