//! Song-level data model: node records, metadata and stable identifiers.
//!
//! Songs arrive from several providers (Spotify, SoundCloud, YouTube) in slightly
//! different shapes. Everything that enters the graph is keyed by a [`SongId`] derived
//! the same way for every caller, see [`song_id_for`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable song identifier (provider id, URL, or `source_normalised_title`).
pub type SongId = String;

/// Maximum length of the normalised title part of a derived id.
pub const TITLE_ID_MAX_LEN: usize = 100;

/// Song metadata with the fields the ranking engine understands, plus an open
/// extension map for provider specific values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SongMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub source: String,
    /// First time the song was seen, epoch ms.
    pub added_at: u64,
    pub play_count: u64,
    pub search_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional: BTreeMap<String, String>,
}

/// Shallow update for [`SongMetadata`]. `None` fields leave the existing value alone,
/// `additional` entries are merged key by key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub source: Option<String>,
    pub popularity: Option<u32>,
    pub explicit: Option<bool>,
    pub duration_ms: Option<u64>,
    pub genre: Option<String>,
    pub webpage_url: Option<String>,
    pub additional: BTreeMap<String, String>,
}

impl MetadataPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Attach one provider specific value.
    #[must_use]
    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.additional.insert(key.to_string(), value.into());
        self
    }

    /// Merge this patch into `metadata`.
    pub fn apply_to(&self, metadata: &mut SongMetadata) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                target.clone_from(value);
            }
        }

        set(&mut metadata.title, &self.title);
        set(&mut metadata.artist, &self.artist);
        set(&mut metadata.album, &self.album);
        set(&mut metadata.source, &self.source);
        set_opt(&mut metadata.popularity, &self.popularity);
        set_opt(&mut metadata.explicit, &self.explicit);
        set_opt(&mut metadata.duration_ms, &self.duration_ms);
        set_opt(&mut metadata.genre, &self.genre);
        set_opt(&mut metadata.webpage_url, &self.webpage_url);
        for (key, value) in &self.additional {
            metadata.additional.insert(key.clone(), value.clone());
        }
    }
}

/// Artist metadata. Artists are tracked for artist-level ranking but not scored yet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArtistMetadata {
    pub name: String,
    pub genre: String,
    pub added_at: u64,
    pub play_count: u64,
}

/// Graph vertex with symmetric adjacency bookkeeping.
///
/// Adjacency uses ordered sets so snapshots serialise deterministically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node<M> {
    pub outlinks: BTreeSet<SongId>,
    pub inlinks: BTreeSet<SongId>,
    pub metadata: M,
    pub last_updated: u64,
}

pub type SongNode = Node<SongMetadata>;
pub type ArtistNode = Node<ArtistMetadata>;

impl<M> Node<M> {
    /// Outdegree used by the ranking iteration; sinks count as 1.
    #[must_use]
    pub fn share_divisor(&self) -> usize {
        self.outlinks.len().max(1)
    }

    /// Every neighbour in either direction.
    pub fn neighbours(&self) -> impl Iterator<Item = &SongId> {
        self.inlinks.iter().chain(self.outlinks.iter())
    }
}

/// Track-like object as handed over by search, playlist and queue code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: Option<String>,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub source: Option<String>,
    pub webpage_url: Option<String>,
    pub duration_seconds: Option<u64>,
    pub popularity: Option<u32>,
    pub explicit: Option<bool>,
    pub genre: Option<String>,
}

impl TrackInfo {
    #[must_use]
    pub fn new(title: &str, source: &str) -> Self {
        Self {
            title: title.to_string(),
            source: Some(source.to_string()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn song_id(&self) -> SongId {
        song_id_for(
            self.id.as_deref(),
            self.webpage_url.as_deref(),
            self.source.as_deref().unwrap_or("unknown"),
            &self.title,
        )
    }

    #[must_use]
    pub fn metadata_patch(&self) -> MetadataPatch {
        MetadataPatch {
            title: Some(self.title.clone()),
            artist: self.artist.clone(),
            album: self.album.clone(),
            source: self.source.clone(),
            popularity: self.popularity,
            explicit: self.explicit,
            duration_ms: self.duration_seconds.map(|s| s.saturating_mul(1000)),
            genre: self.genre.clone(),
            webpage_url: self.webpage_url.clone(),
            additional: BTreeMap::new(),
        }
    }
}

/// Playlist header accompanying an ordered track list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub collaborative: bool,
    pub source: Option<String>,
}

impl PlaylistInfo {
    /// Event metadata describing this playlist.
    #[must_use]
    pub fn event_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("playlistId".to_string(), self.id.clone()),
            ("playlistName".to_string(), self.name.clone()),
            ("isPublic".to_string(), self.public.to_string()),
            ("collaborative".to_string(), self.collaborative.to_string()),
            (
                "source".to_string(),
                self.source.clone().unwrap_or_else(|| "discord".to_string()),
            ),
        ])
    }
}

/// Search result as produced by the provider search code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchResult {
    pub id: Option<String>,
    pub title: String,
    pub source: String,
    pub webpage_url: Option<String>,
    pub duration_seconds: Option<u64>,
    pub confidence: Option<f64>,
    /// Failed lookups are passed through untouched.
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_rank_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_rank_boost: Option<f64>,
}

impl SearchResult {
    #[must_use]
    pub fn song_id(&self) -> SongId {
        song_id_for(self.id.as_deref(), self.webpage_url.as_deref(), &self.source, &self.title)
    }
}

/// Derive the stable id of a song: explicit id, else URL, else `source_title`.
#[must_use]
pub fn song_id_for(id: Option<&str>, url: Option<&str>, source: &str, title: &str) -> SongId {
    if let Some(id) = id.filter(|s| !s.is_empty()) {
        return id.to_string();
    }
    if let Some(url) = url.filter(|s| !s.is_empty()) {
        return url.to_string();
    }
    format!("{source}_{}", normalize_title(title, TITLE_ID_MAX_LEN))
}

/// Lowercase, keep ASCII word characters, `-` and whitespace, collapse whitespace
/// runs into `_` and cut to `max_len` characters.
#[must_use]
pub fn normalize_title(title: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
                in_space = true;
            }
            continue;
        }
        // Dropped characters must not split a whitespace run.
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            in_space = false;
        }
    }
    out.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title_strips_punctuation() {
        assert_eq!(normalize_title("Hello, World!", 100), "hello_world");
        assert_eq!(normalize_title("  AC/DC -  Thunder", 100), "_acdc_-_thunder");
        assert_eq!(normalize_title("Café del Mar", 100), "caf_del_mar");
        assert_eq!(normalize_title("a / b", 100), "a_b");
    }

    #[test]
    fn test_normalize_title_truncates() {
        let long = "a".repeat(150);
        assert_eq!(normalize_title(&long, 100).len(), 100);
    }

    #[test]
    fn test_song_id_precedence() {
        assert_eq!(song_id_for(Some("abc"), Some("https://x"), "youtube", "T"), "abc");
        assert_eq!(song_id_for(None, Some("https://x"), "youtube", "T"), "https://x");
        assert_eq!(song_id_for(Some(""), None, "youtube", "My Song"), "youtube_my_song");
    }

    #[test]
    fn test_track_without_source_uses_unknown() {
        let track = TrackInfo { title: "Intro".into(), ..Default::default() };
        assert_eq!(track.song_id(), "unknown_intro");
    }

    #[test]
    fn test_patch_merges_shallowly() {
        let mut meta = SongMetadata {
            title: "Old".into(),
            artist: "Someone".into(),
            play_count: 3,
            ..Default::default()
        };
        let patch = MetadataPatch {
            title: Some("New".into()),
            explicit: Some(true),
            ..Default::default()
        }
        .with_extra("spotifyId", "42");

        patch.apply_to(&mut meta);
        assert_eq!(meta.title, "New");
        assert_eq!(meta.artist, "Someone");
        assert_eq!(meta.play_count, 3);
        assert_eq!(meta.explicit, Some(true));
        assert_eq!(meta.additional.get("spotifyId").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let mut meta = SongMetadata { title: "Keep".into(), ..Default::default() };
        let before = meta.clone();
        let patch = MetadataPatch::default();
        assert!(patch.is_empty());
        patch.apply_to(&mut meta);
        assert_eq!(meta, before);
    }

    #[test]
    fn test_playlist_metadata_defaults_source() {
        let info = PlaylistInfo { id: "p1".into(), name: "Road trip".into(), public: true, ..Default::default() };
        let meta = info.event_metadata();
        assert_eq!(meta["playlistName"], "Road trip");
        assert_eq!(meta["isPublic"], "true");
        assert_eq!(meta["source"], "discord");
    }

    #[test]
    fn test_track_patch_converts_duration() {
        let track = TrackInfo { duration_seconds: Some(200), ..TrackInfo::new("x", "soundcloud") };
        assert_eq!(track.metadata_patch().duration_ms, Some(200_000));
    }

    #[test]
    fn test_track_patch_saturates_huge_duration() {
        let track = TrackInfo { duration_seconds: Some(u64::MAX), ..TrackInfo::new("x", "soundcloud") };
        assert_eq!(track.metadata_patch().duration_ms, Some(u64::MAX));
    }
}
