//! Capability interfaces consumed by the client engine: playback and UI
//! status. Implemented independently by a local-playback adapter and by the
//! network driver's test fakes; the engine depends only on these traits.

use std::path::Path;
use std::time::Duration;

/// Playback engine. Implementations must tolerate `load` on a file that is
/// still being written (the reassembler keeps read sharing open).
pub trait Player: Send {
    fn load(&mut self, path: &Path);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position: Duration);
    /// Current position, or None when nothing is loaded/playing.
    fn position(&self) -> Option<Duration>;
    /// Returns true once when the stream reached its natural end since the
    /// last call. Polled by the driver at a fixed cadence.
    fn take_ended(&mut self) -> bool;
}

/// Receiver of server/connection status changes.
pub trait StatusSink: Send {
    /// Connection info changed; `None` means connectivity was lost for good
    /// (until the caller explicitly retries).
    fn connection_info_changed(&mut self, info: Option<&ServerInfo>);
    /// Host-originated text broadcast.
    fn notification(&mut self, text: &str);
}

/// Derived view of the live connection. Rebuilt on every query, never
/// cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub is_host: bool,
    pub host: String,
    pub port: u16,
    pub clients: Option<usize>,
    pub video_url: Option<String>,
    pub video_position: Option<f64>,
}
