//! Aria streaming protocol core.
//! No I/O loops or sockets here: the wire format, file reassembly, and the
//! client engine. The `aria-net` crate drives this over TCP.

pub mod engine;
pub mod player;
pub mod protocol;
pub mod reassembly;
pub mod song;
pub mod wire;

pub use engine::{ClientEngine, EngineError};
pub use player::{Player, ServerInfo, StatusSink};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use reassembly::{Transfer, TransferError, WriteOutcome, EARLY_PLAYBACK_THRESHOLD};
pub use song::{sanitize_file_name, Catalog, MemoryCatalog, Song};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, MAX_FRAME_LEN};
