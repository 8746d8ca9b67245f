//! Stream reassembly: turn `Data` frames into a playable file on disk and
//! signal when enough bytes exist to start playback early.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::song::sanitize_file_name;

/// Distinct bytes written before playback is started mid-transfer. A plain
/// byte-count heuristic, not duration-aware: low perceived latency at the
/// cost of a possible under-run when the network stalls.
pub const EARLY_PLAYBACK_THRESHOLD: u64 = 1_000_000;

/// Per-song reassembly state. Created on `NewSong`, fed by `Data`, torn
/// down by `finish` or by the next `NewSong` dropping it.
pub struct Transfer {
    path: PathBuf,
    total_length: u64,
    bytes_written: u64,
    last_offset: Option<u64>,
    playback_triggered: bool,
    file: File,
}

/// Result of one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Fresh bytes stored.
    Written,
    /// Same offset as the previous frame; stored but not counted.
    Duplicate,
    /// The early-playback threshold was just crossed. Reported at most once
    /// per transfer.
    StartPlayback,
}

impl Transfer {
    /// Open the target file under `dir`, named after the sanitized display
    /// name, pre-allocated to `total_length`. Any pre-existing file at that
    /// path is overwritten. The file is opened with read sharing so a player
    /// can read it while the download is still in progress.
    pub fn begin(dir: &Path, display_name: &str, total_length: u64) -> Result<Self, TransferError> {
        std::fs::create_dir_all(dir).map_err(|e| TransferError::from_io(e, dir))?;
        let path = dir.join(sanitize_file_name(display_name));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| TransferError::from_io(e, &path))?;
        file.set_len(total_length)
            .map_err(|e| TransferError::from_io(e, &path))?;
        tracing::debug!(path = %path.display(), total_length, "transfer started");
        Ok(Self {
            path,
            total_length,
            bytes_written: 0,
            last_offset: None,
            playback_triggered: false,
            file,
        })
    }

    /// Write `payload` at the absolute `offset`. Random access: retries and
    /// duplicates may repeat offsets, and the last write at an offset wins.
    /// A frame repeating the immediately previous offset is written but not
    /// counted toward the playback threshold; non-adjacent repeats are not
    /// recognized and count as fresh bytes.
    pub fn write(&mut self, offset: u64, payload: &[u8]) -> Result<WriteOutcome, TransferError> {
        let duplicate = self.last_offset == Some(offset);
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| TransferError::from_io(e, &self.path))?;
        self.file
            .write_all(payload)
            .map_err(|e| TransferError::from_io(e, &self.path))?;
        self.last_offset = Some(offset);
        if duplicate {
            tracing::debug!(offset, "duplicate data frame");
            return Ok(WriteOutcome::Duplicate);
        }
        self.bytes_written += payload.len() as u64;
        if !self.playback_triggered && self.bytes_written > EARLY_PLAYBACK_THRESHOLD {
            self.playback_triggered = true;
            return Ok(WriteOutcome::StartPlayback);
        }
        Ok(WriteOutcome::Written)
    }

    /// Flush and close the file, returning its path.
    pub fn finish(mut self) -> Result<PathBuf, TransferError> {
        self.file
            .flush()
            .map_err(|e| TransferError::from_io(e, &self.path))?;
        tracing::debug!(path = %self.path.display(), bytes = self.bytes_written, "transfer finished");
        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the early-playback signal has fired for this transfer.
    pub fn playback_triggered(&self) -> bool {
        self.playback_triggered
    }
}

/// Failure while creating or writing the target file. Fatal for the current
/// transfer, not for the session.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("permission denied at {0}")]
    PermissionDenied(PathBuf),
    #[error("invalid download path {0}")]
    PathInvalid(PathBuf),
    #[error("file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    fn from_io(e: io::Error, path: &Path) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => TransferError::PermissionDenied(path.to_path_buf()),
            io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => {
                TransferError::PathInvalid(path.to_path_buf())
            }
            _ => TransferError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        }
    }

    /// Transient errors are worth a bounded retry; permission and path
    /// problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Io { .. })
    }
}
