//! Host engine: accepts clients and sequences the hosted song to each of
//! them — `NewSong` first, `Data` in increasing offset order, `EndOfSong`
//! after the last chunk. Control events are broadcast to the whole roster.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_core::{encode_frame, Message, ServerInfo, Song};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Frames queued per client before the file reader backs off.
const CLIENT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Payload size of one `Data` frame.
    pub chunk_size: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

struct HostedSong {
    song: Song,
    display_name: String,
    path: PathBuf,
    total_length: u64,
}

#[derive(Clone)]
struct ClientHandle {
    tx: mpsc::Sender<Message>,
    /// Held by a streaming task for its whole run; a superseding stream
    /// waits on it so no stale frame lands after the new announcement.
    stream_gate: Arc<Mutex<()>>,
}

type Roster = Arc<Mutex<HashMap<u64, ClientHandle>>>;

/// A running host. Dropping it does not close accepted connections;
/// call `shutdown`.
pub struct AudioHost {
    local_addr: SocketAddr,
    roster: Roster,
    current: Arc<Mutex<Option<Arc<HostedSong>>>>,
    /// Bumped on every `host_song`; in-flight streaming tasks for an older
    /// song observe the change and stop.
    epoch: Arc<AtomicU64>,
    chunk_size: usize,
    accept_task: JoinHandle<()>,
}

impl AudioHost {
    pub async fn bind(port: u16, opts: HostOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let roster: Roster = Arc::new(Mutex::new(HashMap::new()));
        let current: Arc<Mutex<Option<Arc<HostedSong>>>> = Arc::new(Mutex::new(None));
        let epoch = Arc::new(AtomicU64::new(0));

        let accept_roster = roster.clone();
        let accept_current = current.clone();
        let accept_epoch = epoch.clone();
        let chunk_size = opts.chunk_size;
        let accept_task = tokio::spawn(async move {
            let mut next_id: u64 = 0;
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        break;
                    }
                };
                next_id += 1;
                let id = next_id;
                tracing::info!(client = %peer, id, "client connected");
                let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
                let handle = ClientHandle {
                    tx,
                    stream_gate: Arc::new(Mutex::new(())),
                };
                accept_roster.lock().await.insert(id, handle.clone());
                let (read_half, write_half) = stream.into_split();
                tokio::spawn(run_writer(id, rx, write_half, accept_roster.clone()));
                tokio::spawn(watch_disconnect(id, read_half, accept_roster.clone()));
                // Late joiner: stream the current song from the start.
                if let Some(hosted) = accept_current.lock().await.clone() {
                    let my_epoch = accept_epoch.load(Ordering::SeqCst);
                    tokio::spawn(stream_song(
                        handle,
                        hosted,
                        chunk_size,
                        accept_epoch.clone(),
                        my_epoch,
                    ));
                }
            }
        });

        Ok(Self {
            local_addr,
            roster,
            current,
            epoch,
            chunk_size,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Start hosting `song`: every connected client (and every later
    /// joiner) receives it from offset zero. Supersedes any song already
    /// streaming.
    pub async fn host_song(&self, song: Song) -> io::Result<()> {
        let path = PathBuf::from(&song.location);
        let total_length = tokio::fs::metadata(&path).await?.len();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string());
        tracing::info!(song = %song.location, total_length, "hosting song");
        let hosted = Arc::new(HostedSong {
            song,
            display_name,
            path,
            total_length,
        });
        *self.current.lock().await = Some(hosted.clone());
        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let handles: Vec<_> = self.roster.lock().await.values().cloned().collect();
        for handle in handles {
            tokio::spawn(stream_song(
                handle,
                hosted.clone(),
                self.chunk_size,
                self.epoch.clone(),
                my_epoch,
            ));
        }
        Ok(())
    }

    pub async fn play(&self) {
        self.broadcast(Message::Play).await;
    }

    pub async fn pause(&self) {
        self.broadcast(Message::Pause).await;
    }

    pub async fn goto(&self, position: Duration) {
        self.broadcast(Message::Goto { position }).await;
    }

    pub async fn notify(&self, text: &str) {
        self.broadcast(Message::Notification {
            text: text.to_string(),
        })
        .await;
    }

    pub async fn share_video(&self, url: &str) {
        self.broadcast(Message::Video {
            url: url.to_string(),
        })
        .await;
    }

    async fn broadcast(&self, msg: Message) {
        let handles: Vec<_> = self.roster.lock().await.values().cloned().collect();
        for handle in handles {
            // A dead client is cleaned up by its own tasks.
            let _ = handle.tx.send(msg.clone()).await;
        }
    }

    pub async fn client_count(&self) -> usize {
        self.roster.lock().await.len()
    }

    /// Derived host-side view; rebuilt on every call.
    pub async fn info(&self) -> ServerInfo {
        ServerInfo {
            is_host: true,
            host: self.local_addr.ip().to_string(),
            port: self.local_addr.port(),
            clients: Some(self.client_count().await),
            video_url: None,
            video_position: None,
        }
    }

    pub async fn shutdown(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;
        self.roster.lock().await.clear();
    }
}

/// Send the whole hosted file to one client, in increasing offset order.
/// Stops quietly if the client goes away or a newer song supersedes this
/// one.
async fn stream_song(
    client: ClientHandle,
    hosted: Arc<HostedSong>,
    chunk_size: usize,
    epoch: Arc<AtomicU64>,
    my_epoch: u64,
) {
    // Any older streaming task for this client finishes its teardown
    // before we announce.
    let _guard = client.stream_gate.lock().await;
    if epoch.load(Ordering::SeqCst) != my_epoch {
        return;
    }
    let tx = client.tx;
    let announce = Message::NewSong {
        song: hosted.song.clone(),
        display_name: hosted.display_name.clone(),
        total_length: hosted.total_length,
    };
    if tx.send(announce).await.is_err() {
        return;
    }
    let mut file = match tokio::fs::File::open(&hosted.path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %hosted.path.display(), error = %e, "cannot open hosted file");
            return;
        }
    };
    let mut offset: u64 = 0;
    let mut buf = vec![0u8; chunk_size];
    loop {
        if epoch.load(Ordering::SeqCst) != my_epoch {
            return;
        }
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::error!(path = %hosted.path.display(), error = %e, "read failed");
                return;
            }
        };
        let data = Message::Data {
            offset,
            payload: buf[..n].to_vec(),
        };
        if tx.send(data).await.is_err() {
            return;
        }
        offset += n as u64;
    }
    let _ = tx.send(Message::EndOfSong).await;
    tracing::debug!(song = %hosted.song.location, bytes = offset, "song streamed");
}

async fn run_writer(
    id: u64,
    mut rx: mpsc::Receiver<Message>,
    mut writer: OwnedWriteHalf,
    roster: Roster,
) {
    while let Some(msg) = rx.recv().await {
        let frame = match encode_frame(&msg) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "frame encode failed");
                continue;
            }
        };
        if writer.write_all(&frame).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
    roster.lock().await.remove(&id);
}

/// Clients never send frames; a read returning EOF or an error is the
/// disconnect signal.
async fn watch_disconnect(id: u64, mut reader: OwnedReadHalf, roster: Roster) {
    let mut scratch = [0u8; 64];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    roster.lock().await.remove(&id);
    tracing::info!(id, "client disconnected");
}
