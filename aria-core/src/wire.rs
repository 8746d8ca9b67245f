//! Framing: length-prefix (4 bytes LE) + version byte + kind byte + bincode body.

use std::time::Duration;

use crate::protocol::{
    Message, KIND_DATA, KIND_END_OF_SONG, KIND_GOTO, KIND_NEW_SONG, KIND_NOTIFICATION, KIND_PAUSE,
    KIND_PLAY, KIND_VIDEO, KIND_VIDEO_SEEK, PROTOCOL_VERSION,
};
use crate::song::Song;

const LEN_SIZE: usize = 4;
const HEADER_SIZE: usize = 2; // version + kind

/// Upper bound on the length-prefixed portion of one frame.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a message into a single self-delimiting frame.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let body = match msg {
        Message::NewSong {
            song,
            display_name,
            total_length,
        } => bincode::serialize(&(song, display_name, total_length))?,
        Message::Data { offset, payload } => bincode::serialize(&(offset, payload))?,
        Message::EndOfSong | Message::Play | Message::Pause => Vec::new(),
        Message::Goto { position } => bincode::serialize(position)?,
        Message::Notification { text } => bincode::serialize(text)?,
        Message::Video { url } => bincode::serialize(url)?,
        Message::VideoSeek { position } => bincode::serialize(position)?,
    };
    let len = (HEADER_SIZE + body.len()) as u64;
    if len > MAX_FRAME_LEN as u64 {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + HEADER_SIZE + body.len());
    out.extend_from_slice(&(len as u32).to_le_bytes());
    out.push(PROTOCOL_VERSION);
    out.push(msg.kind());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the
/// number of bytes consumed, leaving the caller positioned at the next frame
/// boundary. Call with a partial buffer; `NeedMore` means try again after
/// more data arrives. Every other error is fatal for the connection.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if len < HEADER_SIZE {
        return Err(FrameDecodeError::Truncated);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let version = bytes[LEN_SIZE];
    if version != PROTOCOL_VERSION {
        return Err(FrameDecodeError::UnsupportedVersion(version));
    }
    let kind = bytes[LEN_SIZE + 1];
    let body = &bytes[LEN_SIZE + HEADER_SIZE..LEN_SIZE + len];
    let msg = decode_body(kind, body)?;
    Ok((msg, LEN_SIZE + len))
}

fn decode_body(kind: u8, body: &[u8]) -> Result<Message, FrameDecodeError> {
    let msg = match kind {
        KIND_NEW_SONG => {
            let (song, display_name, total_length): (Song, String, u64) =
                bincode::deserialize(body)?;
            Message::NewSong {
                song,
                display_name,
                total_length,
            }
        }
        KIND_DATA => {
            let (offset, payload): (u64, Vec<u8>) = bincode::deserialize(body)?;
            Message::Data { offset, payload }
        }
        KIND_END_OF_SONG => Message::EndOfSong,
        KIND_PLAY => Message::Play,
        KIND_PAUSE => Message::Pause,
        KIND_GOTO => {
            let position: Duration = bincode::deserialize(body)?;
            Message::Goto { position }
        }
        KIND_NOTIFICATION => {
            let text: String = bincode::deserialize(body)?;
            Message::Notification { text }
        }
        KIND_VIDEO => {
            let url: String = bincode::deserialize(body)?;
            Message::Video { url }
        }
        KIND_VIDEO_SEEK => {
            let position: f64 = bincode::deserialize(body)?;
            Message::VideoSeek { position }
        }
        other => return Err(FrameDecodeError::UnknownKind(other)),
    };
    Ok(msg)
}

/// Error decoding a frame. `NeedMore` is the only recoverable case; an
/// unknown kind or malformed body must close the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("frame shorter than header")]
    Truncated,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
