//! Playback and status adapters for the binary. Decoding audio is out of
//! scope here; `ClockPlayer` models position with a monotonic clock so the
//! engine's seek/stall logic has something real to work against.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use aria_core::{Player, ServerInfo, StatusSink};

/// Wall-clock playback adapter: position advances in real time while
/// playing. It never raises the natural-end event itself; an adapter backed
/// by an actual decoder reports EOF through `take_ended`.
#[derive(Default)]
pub struct ClockPlayer {
    loaded: Option<PathBuf>,
    base: Duration,
    playing_since: Option<Instant>,
    ended: bool,
}

impl ClockPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing_since.is_some()
    }

    /// Raise the end-of-stream event (decoder adapters call this).
    pub fn mark_ended(&mut self) {
        self.playing_since = None;
        self.ended = true;
    }
}

impl Player for ClockPlayer {
    fn load(&mut self, path: &Path) {
        tracing::info!(path = %path.display(), "load");
        self.loaded = Some(path.to_path_buf());
        self.base = Duration::ZERO;
        self.playing_since = None;
        self.ended = false;
    }

    fn play(&mut self) {
        if self.loaded.is_some() && self.playing_since.is_none() {
            tracing::info!("play");
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.playing_since.take() {
            tracing::info!("pause");
            self.base += since.elapsed();
        }
    }

    fn seek(&mut self, position: Duration) {
        tracing::info!(position_ms = position.as_millis() as u64, "seek");
        self.base = position;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn position(&self) -> Option<Duration> {
        self.loaded.as_ref()?;
        let running = self
            .playing_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        Some(self.base + running)
    }

    fn take_ended(&mut self) -> bool {
        std::mem::take(&mut self.ended)
    }
}

/// Status sink that reports through the log.
#[derive(Default)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn connection_info_changed(&mut self, info: Option<&ServerInfo>) {
        match info {
            Some(info) => tracing::info!(
                host = %info.host,
                port = info.port,
                video_url = info.video_url.as_deref().unwrap_or("-"),
                "server info changed"
            ),
            None => tracing::warn!("connection to server lost"),
        }
    }

    fn notification(&mut self, text: &str) {
        tracing::info!(text, "server notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_none_until_loaded() {
        let player = ClockPlayer::new();
        assert!(player.position().is_none());
    }

    #[test]
    fn load_resets_position_to_zero() {
        let mut player = ClockPlayer::new();
        player.load(Path::new("/tmp/a.mp3"));
        assert_eq!(player.position(), Some(Duration::ZERO));
        assert!(!player.is_playing());
    }

    #[test]
    fn seek_moves_base_position() {
        let mut player = ClockPlayer::new();
        player.load(Path::new("/tmp/a.mp3"));
        player.seek(Duration::from_secs(30));
        assert!(player.position().unwrap() >= Duration::from_secs(30));
    }

    #[test]
    fn pause_freezes_position() {
        let mut player = ClockPlayer::new();
        player.load(Path::new("/tmp/a.mp3"));
        player.play();
        player.pause();
        let frozen = player.position().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(player.position().unwrap(), frozen);
    }

    #[test]
    fn ended_event_fires_once() {
        let mut player = ClockPlayer::new();
        player.load(Path::new("/tmp/a.mp3"));
        player.play();
        player.mark_ended();
        assert!(player.take_ended());
        assert!(!player.take_ended());
        assert!(!player.is_playing());
    }

    #[test]
    fn play_without_load_is_ignored() {
        let mut player = ClockPlayer::new();
        player.play();
        assert!(!player.is_playing());
        assert!(player.position().is_none());
    }
}
