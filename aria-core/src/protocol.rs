//! Aria wire protocol: message types and version.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::song::Song;

/// Current protocol version. Every frame carries it; a mismatch is fatal
/// for the connection.
pub const PROTOCOL_VERSION: u8 = 1;

/// All wire message types. Bodies are bincode; framing is length-prefix plus
/// version and kind bytes (see the wire module).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// A new song is about to stream. Resets any reassembly state on the
    /// receiving side; all following `Data` frames belong to this song.
    NewSong {
        song: Song,
        display_name: String,
        total_length: u64,
    },
    /// One slice of the audio file, at an absolute byte offset.
    Data { offset: u64, payload: Vec<u8> },
    /// The file is fully sent; close the reassembly handle.
    EndOfSong,
    /// Resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Absolute seek within the current song.
    Goto { position: Duration },
    /// Host-originated text broadcast.
    Notification { text: String },
    /// Host shares a video URL with all clients.
    Video { url: String },
    /// Host shares the video playback position.
    VideoSeek { position: f64 },
}

pub(crate) const KIND_NEW_SONG: u8 = 0;
pub(crate) const KIND_DATA: u8 = 1;
pub(crate) const KIND_END_OF_SONG: u8 = 2;
pub(crate) const KIND_PLAY: u8 = 3;
pub(crate) const KIND_PAUSE: u8 = 4;
pub(crate) const KIND_GOTO: u8 = 5;
pub(crate) const KIND_NOTIFICATION: u8 = 6;
pub(crate) const KIND_VIDEO: u8 = 7;
pub(crate) const KIND_VIDEO_SEEK: u8 = 8;

impl Message {
    /// Stable kind tag used on the wire.
    pub fn kind(&self) -> u8 {
        match self {
            Message::NewSong { .. } => KIND_NEW_SONG,
            Message::Data { .. } => KIND_DATA,
            Message::EndOfSong => KIND_END_OF_SONG,
            Message::Play => KIND_PLAY,
            Message::Pause => KIND_PAUSE,
            Message::Goto { .. } => KIND_GOTO,
            Message::Notification { .. } => KIND_NOTIFICATION,
            Message::Video { .. } => KIND_VIDEO,
            Message::VideoSeek { .. } => KIND_VIDEO_SEEK,
        }
    }
}
