//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Runtime configuration. File: ~/.config/aria/config.toml or
/// /etc/aria/config.toml.
/// Env overrides: ARIA_PORT, ARIA_DOWNLOAD_DIR, ARIA_RECV_BUFFER,
/// ARIA_SEND_BUFFER, ARIA_CHUNK_SIZE, ARIA_RECONNECT_BACKOFF_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP port used for both hosting and connecting (default 8963).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory streamed songs are written into.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Socket receive buffer in bytes (default 262144).
    #[serde(default = "default_buffer")]
    pub recv_buffer: u32,
    /// Socket send buffer in bytes (default 262144).
    #[serde(default = "default_buffer")]
    pub send_buffer: u32,
    /// Host-side payload size of one data frame (default 65536).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause before the single reconnect attempt (default 2000).
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

fn default_port() -> u16 {
    8963
}
fn default_buffer() -> u32 {
    262_144
}
fn default_chunk_size() -> usize {
    65_536
}
fn default_reconnect_backoff_ms() -> u64 {
    2_000
}

fn default_download_dir() -> PathBuf {
    let base = directories::UserDirs::new()
        .and_then(|u| u.audio_dir().map(PathBuf::from))
        .or_else(|| directories::UserDirs::new().map(|u| u.home_dir().join("Music")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("aria-downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            download_dir: default_download_dir(),
            recv_buffer: default_buffer(),
            send_buffer: default_buffer(),
            chunk_size: default_chunk_size(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("ARIA_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("ARIA_DOWNLOAD_DIR") {
        if !s.is_empty() {
            c.download_dir = PathBuf::from(s);
        }
    }
    if let Ok(s) = std::env::var("ARIA_RECV_BUFFER") {
        if let Ok(n) = s.parse::<u32>() {
            c.recv_buffer = n;
        }
    }
    if let Ok(s) = std::env::var("ARIA_SEND_BUFFER") {
        if let Ok(n) = s.parse::<u32>() {
            c.send_buffer = n;
        }
    }
    if let Ok(s) = std::env::var("ARIA_CHUNK_SIZE") {
        if let Ok(n) = s.parse::<usize>() {
            c.chunk_size = n;
        }
    }
    if let Ok(s) = std::env::var("ARIA_RECONNECT_BACKOFF_MS") {
        if let Ok(n) = s.parse::<u64>() {
            c.reconnect_backoff_ms = n;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/aria/config.toml"));
    }
    out.push(PathBuf::from("/etc/aria/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.port, 8963);
        assert_eq!(c.recv_buffer, 262_144);
        assert_eq!(c.send_buffer, 262_144);
        assert_eq!(c.chunk_size, 65_536);
        assert_eq!(c.reconnect_backoff_ms, 2_000);
        assert!(c.download_dir.ends_with("aria-downloads"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let c: Config = toml::from_str("port = 9000\nchunk_size = 4096\n").unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.recv_buffer, 262_144);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1\n").is_err());
    }
}
