//! Client protocol engine: consumes decoded wire messages, drives the
//! reassembler, the playback engine, and the UI status sink.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::player::{Player, ServerInfo, StatusSink};
use crate::protocol::Message;
use crate::reassembly::{Transfer, TransferError, WriteOutcome};
use crate::song::{Catalog, Song};

/// Seek compensation applied to `Goto`, covering propagation delay between
/// host and client.
pub const SEEK_COMPENSATION: Duration = Duration::from_millis(100);

/// Immediate retries for a failed file write before the error propagates.
const WRITE_RETRY_BUDGET: u32 = 10;

/// Receiver state machine. One instance per connection; the network driver
/// serializes access (receive loop and playback poll share it behind one
/// lock).
pub struct ClientEngine {
    download_dir: PathBuf,
    host: String,
    port: u16,
    player: Box<dyn Player>,
    sink: Box<dyn StatusSink>,
    catalog: Option<Box<dyn Catalog>>,
    transfer: Option<Transfer>,
    current_song: Option<Song>,
    received: Vec<Song>,
    video_url: Option<String>,
    video_position: Option<f64>,
    /// Guard for a deliberate stop/seek in progress: suppresses the
    /// auto-restart that a natural end-of-stream event would trigger.
    stopping: bool,
}

impl ClientEngine {
    pub fn new(
        download_dir: PathBuf,
        host: impl Into<String>,
        port: u16,
        player: Box<dyn Player>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        Self {
            download_dir,
            host: host.into(),
            port,
            player,
            sink,
            catalog: None,
            transfer: None,
            current_song: None,
            received: Vec::new(),
            video_url: None,
            video_position: None,
            stopping: false,
        }
    }

    /// Attach a catalog used to enrich incoming song metadata and persist
    /// completed downloads.
    pub fn with_catalog(mut self, catalog: Box<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Dispatch one decoded message. `Err` means the current transfer is
    /// dead; the connection itself stays usable.
    pub fn handle_message(&mut self, msg: Message) -> Result<(), EngineError> {
        match msg {
            Message::NewSong {
                song,
                display_name,
                total_length,
            } => self.on_new_song(song, &display_name, total_length),
            Message::Data { offset, payload } => self.on_data(offset, &payload),
            Message::EndOfSong => self.on_end_of_song(),
            Message::Play => {
                self.player.play();
                Ok(())
            }
            Message::Pause => {
                self.player.pause();
                Ok(())
            }
            Message::Goto { position } => {
                self.player.seek(position + SEEK_COMPENSATION);
                Ok(())
            }
            Message::Notification { text } => {
                self.sink.notification(&text);
                Ok(())
            }
            Message::Video { url } => {
                self.video_url = Some(url);
                let info = self.server_info();
                self.sink.connection_info_changed(Some(&info));
                Ok(())
            }
            Message::VideoSeek { position } => {
                self.video_position = Some(position);
                let info = self.server_info();
                self.sink.connection_info_changed(Some(&info));
                Ok(())
            }
        }
    }

    fn on_new_song(
        &mut self,
        mut song: Song,
        display_name: &str,
        total_length: u64,
    ) -> Result<(), EngineError> {
        // Drop closes the previous song's file handle.
        self.transfer = None;
        let transfer = Transfer::begin(&self.download_dir, display_name, total_length)?;
        let location = transfer.path().to_string_lossy().into_owned();
        if let Some(known) = self
            .catalog
            .as_ref()
            .and_then(|c| c.lookup(&location))
        {
            // Replaced wholesale when the catalog knows more.
            song = known;
        }
        song.location = location;
        song.date_added = Some(SystemTime::now());
        tracing::info!(song = %song.location, total_length, "new song announced");
        self.current_song = Some(song);
        self.transfer = Some(transfer);
        Ok(())
    }

    fn on_data(&mut self, offset: u64, payload: &[u8]) -> Result<(), EngineError> {
        let Some(transfer) = self.transfer.as_mut() else {
            tracing::warn!(offset, "data frame with no transfer open, dropped");
            return Ok(());
        };
        let mut attempt = 0;
        let outcome = loop {
            match transfer.write(offset, payload) {
                Ok(outcome) => break outcome,
                Err(e) if e.is_transient() && attempt < WRITE_RETRY_BUDGET => {
                    attempt += 1;
                    tracing::warn!(offset, attempt, error = %e, "write failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };
        if outcome == WriteOutcome::StartPlayback {
            if let Some(song) = self.current_song.clone() {
                tracing::info!(song = %song.location, "enough data buffered, starting playback");
                self.start_playback(song);
            }
        }
        Ok(())
    }

    fn on_end_of_song(&mut self) -> Result<(), EngineError> {
        if let Some(transfer) = self.transfer.take() {
            transfer.finish()?;
        }
        if let (Some(catalog), Some(song)) = (self.catalog.as_mut(), self.current_song.as_ref()) {
            catalog.upsert(song);
        }
        // Playback that never advanced means the early start raced ahead of
        // real data (or never happened). Re-issue play on the same song
        // instead of advancing to a different one.
        let at_start = self.player.position().map_or(true, |p| p.is_zero());
        if at_start {
            if let Some(song) = self.current_song.clone() {
                tracing::info!(song = %song.location, "song complete, (re)starting playback");
                self.start_playback(song);
            }
        }
        Ok(())
    }

    fn start_playback(&mut self, song: Song) {
        if !self.received.iter().any(|s| s == &song) {
            self.received.push(song.clone());
        }
        self.player.load(song.location.as_ref());
        self.player.play();
    }

    /// Fixed-cadence hook from the driver: reacts to the player's natural
    /// end-of-stream event. Suppressed while a deliberate stop is in
    /// progress.
    pub fn poll_playback(&mut self) {
        if !self.player.take_ended() {
            return;
        }
        if self.stopping {
            return;
        }
        match self.player.position() {
            // EOF at the start: the decoder hit the end before real data
            // arrived. Restart the same song.
            pos if pos.map_or(true, |p| p.is_zero()) => {
                if let Some(song) = self.current_song.clone() {
                    tracing::info!(song = %song.location, "playback ended at start, retrying");
                    self.start_playback(song);
                }
            }
            // EOF mid-file while the download is still open: the decoder
            // outran the network. Best-effort resume from where it stalled.
            Some(p) if self.transfer.is_some() => {
                tracing::info!(position_ms = p.as_millis() as u64, "playback stalled, resuming");
                self.player.seek(p);
                self.player.play();
            }
            // Completed song ran out normally; nothing to advance to in
            // receive mode.
            _ => {}
        }
    }

    /// Mark a deliberate stop/seek in progress.
    pub fn begin_stop(&mut self) {
        self.stopping = true;
    }

    /// Deliberate stop finished; end events are meaningful again.
    pub fn end_stop(&mut self) {
        self.stopping = false;
    }

    /// The session is gone and will not come back without an explicit retry.
    pub fn connection_lost(&mut self) {
        self.sink.connection_info_changed(None);
    }

    /// Derived connection info; rebuilt on every call.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            is_host: false,
            host: self.host.clone(),
            port: self.port,
            clients: None,
            video_url: self.video_url.clone(),
            video_position: self.video_position,
        }
    }

    /// Songs received since this engine was created.
    pub fn received_songs(&self) -> &[Song] {
        &self.received
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.current_song.as_ref()
    }

    /// Whether a download is currently open.
    pub fn transfer_in_progress(&self) -> bool {
        self.transfer.is_some()
    }
}

/// Engine-level failure: the current transfer is lost.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
}
