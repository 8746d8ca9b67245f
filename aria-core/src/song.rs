//! Song metadata and the catalog interface.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A song in the library or received over the wire. Identity is the file
/// path (`location`); all other fields are descriptive and may be replaced
/// wholesale when a catalog lookup returns richer data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub location: String,
    pub title: Option<String>,
    pub band: Option<String>,
    pub genre: Option<String>,
    pub album: Option<String>,
    pub date_added: Option<SystemTime>,
    pub date_created: Option<SystemTime>,
    pub internet_radio: bool,
}

impl Song {
    /// A song known only by its path.
    pub fn from_location(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            title: None,
            band: None,
            genre: None,
            album: None,
            date_added: None,
            date_created: None,
            internet_radio: false,
        }
    }
}

// Uniqueness is enforced by path equality.
impl PartialEq for Song {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for Song {}

impl std::hash::Hash for Song {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

/// Strip path separators and filesystem-hostile characters from a
/// server-supplied display name. The result is always a usable bare file
/// name under the download directory.
pub fn sanitize_file_name(display_name: &str) -> String {
    let cleaned: String = display_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lookup and persistence of song metadata by file path. The storage format
/// behind this is not this crate's concern.
pub trait Catalog: Send {
    fn lookup(&self, location: &str) -> Option<Song>;
    fn upsert(&mut self, song: &Song);
}

/// HashMap-backed catalog. Enough for a receive-mode client; a real library
/// backend implements `Catalog` over its own store.
#[derive(Default)]
pub struct MemoryCatalog {
    songs: HashMap<String, Song>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

impl Catalog for MemoryCatalog {
    fn lookup(&self, location: &str) -> Option<Song> {
        self.songs.get(location).cloned()
    }

    fn upsert(&mut self, song: &Song) {
        self.songs.insert(song.location.clone(), song.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_file_name("a/b\\c.mp3"), "a_b_c.mp3");
        assert_eq!(sanitize_file_name("track: one?.mp3"), "track_ one_.mp3");
    }

    #[test]
    fn sanitize_empty_is_untitled() {
        assert_eq!(sanitize_file_name(""), "untitled");
        assert_eq!(sanitize_file_name("   "), "untitled");
        assert_eq!(sanitize_file_name("..."), "untitled");
    }

    #[test]
    fn sanitize_keeps_ordinary_names() {
        assert_eq!(sanitize_file_name("01 - Song.mp3"), "01 - Song.mp3");
    }

    #[test]
    fn song_equality_by_location() {
        let mut a = Song::from_location("/music/a.mp3");
        let b = Song::from_location("/music/a.mp3");
        a.title = Some("Different title".into());
        assert_eq!(a, b);
        assert_ne!(a, Song::from_location("/music/b.mp3"));
    }

    #[test]
    fn catalog_roundtrip() {
        let mut cat = MemoryCatalog::new();
        let mut song = Song::from_location("/music/a.mp3");
        song.title = Some("A".into());
        cat.upsert(&song);
        assert_eq!(cat.lookup("/music/a.mp3").unwrap().title.as_deref(), Some("A"));
        assert!(cat.lookup("/music/b.mp3").is_none());

        song.title = Some("B".into());
        cat.upsert(&song);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.lookup("/music/a.mp3").unwrap().title.as_deref(), Some("B"));
    }
}
