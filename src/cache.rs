//! Process-lifetime memo of artwork lookups, including negative entries.

use std::collections::HashMap;
use std::sync::Mutex;

/// A settled lookup. `NotFound` is a negative entry: looked up, nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedArtwork {
    Found(String),
    NotFound,
}

impl CachedArtwork {
    pub fn from_url(url: Option<String>) -> Self {
        match url {
            Some(url) => Self::Found(url),
            None => Self::NotFound,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Found(url) => Some(url),
            Self::NotFound => None,
        }
    }

    pub fn into_url(self) -> Option<String> {
        match self {
            Self::Found(url) => Some(url),
            Self::NotFound => None,
        }
    }
}

/// Normalized `artist::album` key, case-folded.
pub fn cache_key(artist: &str, album: &str) -> String {
    format!("{}::{}", artist.trim(), album.trim()).to_lowercase()
}

/// Resolved lookups keyed by [`cache_key`]. Entries never expire.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, CachedArtwork>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the key was never looked up.
    pub fn get(&self, key: &str) -> Option<CachedArtwork> {
        self.entries
            .lock()
            .expect("result cache lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: CachedArtwork) {
        self.entries
            .lock()
            .expect("result cache lock poisoned")
            .insert(key.into(), value);
    }

    /// Drops one entry so the next lookup goes back to the network.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("result cache lock poisoned")
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("result cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
