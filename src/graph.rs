//! In-memory song relationship graph.
//!
//! [`SongGraph`] owns the song nodes, the auxiliary artist nodes and the dirty set.
//! Every mutation keeps the adjacency bookkeeping symmetric: `b` is in `a.outlinks`
//! exactly when `a` is in `b.inlinks`.
//!
//! Edges are binary. The weight handed to [`SongGraph::add_edge`] only decides
//! whether the edge is significant enough to exist; it is not stored.

use crate::song::{
    normalize_title, ArtistMetadata, ArtistNode, MetadataPatch, SongId, SongMetadata, SongNode,
};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default minimum weight an edge needs to be created.
pub const DEFAULT_EDGE_THRESHOLD: f64 = 0.1;

/// Song graph with dirty tracking.
#[derive(Debug, Clone)]
pub struct SongGraph {
    songs: HashMap<SongId, SongNode>,
    artists: HashMap<SongId, ArtistNode>,
    dirty: HashSet<SongId>,
    /// Songs whose cached score must be dropped, drained by the engine.
    stale: Vec<SongId>,
    edge_threshold: f64,
}

impl Default for SongGraph {
    fn default() -> Self {
        Self::new(DEFAULT_EDGE_THRESHOLD)
    }
}

impl SongGraph {
    #[must_use]
    pub fn new(edge_threshold: f64) -> Self {
        Self {
            songs: HashMap::new(),
            artists: HashMap::new(),
            dirty: HashSet::new(),
            stale: Vec::new(),
            edge_threshold,
        }
    }

    /// Number of song nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.songs.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SongNode> {
        self.songs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SongId, &SongNode)> {
        self.songs.iter()
    }

    /// Total number of directed edges.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.songs.values().map(|n| n.outlinks.len()).sum()
    }

    #[must_use]
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.songs.get(from).is_some_and(|n| n.outlinks.contains(to))
    }

    #[must_use]
    pub fn artist(&self, id: &str) -> Option<&ArtistNode> {
        self.artists.get(id)
    }

    #[must_use]
    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    /// Create the song with defaults if absent, otherwise merge `patch` into its
    /// metadata. Marks the song and its neighbours dirty. Returns `true` on creation.
    pub fn upsert_song(&mut self, id: &str, patch: &MetadataPatch, now_ms: u64) -> bool {
        let created = match self.songs.get_mut(id) {
            Some(node) => {
                patch.apply_to(&mut node.metadata);
                node.last_updated = now_ms;
                false
            }
            None => {
                let mut metadata = SongMetadata { added_at: now_ms, ..Default::default() };
                patch.apply_to(&mut metadata);
                self.songs.insert(
                    id.to_string(),
                    SongNode { metadata, last_updated: now_ms, ..Default::default() },
                );
                trace!("Created song node {id}");
                true
            }
        };

        if let Some(artist) = patch.artist.as_deref().filter(|a| !a.is_empty()) {
            self.ensure_artist(artist, patch.genre.as_deref(), now_ms);
        }
        self.mark_dirty(id);
        created
    }

    /// Create the song with default metadata only if it does not exist yet.
    pub fn ensure_song(&mut self, id: &str, now_ms: u64) {
        if !self.songs.contains_key(id) {
            self.upsert_song(id, &MetadataPatch::default(), now_ms);
        }
    }

    /// Add a directed edge when `weight` is above the significance threshold.
    ///
    /// Both endpoints are created if needed, even when the edge itself is rejected.
    /// Returns `true` if a new edge was inserted.
    pub fn add_edge(&mut self, from: &str, to: &str, weight: f64, now_ms: u64) -> bool {
        self.ensure_song(from, now_ms);
        self.ensure_song(to, now_ms);

        if weight <= self.edge_threshold {
            return false;
        }

        let inserted = self
            .songs
            .get_mut(from)
            .is_some_and(|n| n.outlinks.insert(to.to_string()));
        if let Some(node) = self.songs.get_mut(to) {
            node.inlinks.insert(from.to_string());
        }

        if inserted {
            self.mark_dirty(from);
            self.mark_dirty(to);
            self.link_artists(from, to);
        }
        inserted
    }

    /// Detach the song from all neighbours and delete it. Neighbours become dirty.
    pub fn remove_song(&mut self, id: &str) -> Option<SongNode> {
        let node = self.songs.remove(id)?;

        for out in &node.outlinks {
            if let Some(target) = self.songs.get_mut(out) {
                target.inlinks.remove(id);
            }
        }
        for inl in &node.inlinks {
            if let Some(source) = self.songs.get_mut(inl) {
                source.outlinks.remove(id);
            }
        }
        for neighbour in node.neighbours() {
            if neighbour != id {
                self.mark_dirty(neighbour);
            }
        }

        self.dirty.remove(id);
        self.stale.push(id.to_string());
        trace!("Removed song node {id}");
        Some(node)
    }

    pub fn increment_play_count(&mut self, id: &str) {
        if let Some(node) = self.songs.get_mut(id) {
            node.metadata.play_count += 1;
        }
    }

    pub fn increment_search_count(&mut self, id: &str) {
        if let Some(node) = self.songs.get_mut(id) {
            node.metadata.search_count += 1;
        }
    }

    /// Flag a song and its direct neighbours as needing a score update.
    pub fn mark_dirty(&mut self, id: &str) {
        let Some(node) = self.songs.get(id) else {
            return;
        };
        self.dirty.extend(node.neighbours().cloned());
        self.dirty.insert(id.to_string());
        self.stale.push(id.to_string());
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    #[must_use]
    pub fn is_dirty(&self, id: &str) -> bool {
        self.dirty.contains(id)
    }

    #[must_use]
    pub fn dirty_ids(&self) -> Vec<SongId> {
        self.dirty.iter().cloned().collect()
    }

    pub fn clear_dirty<'a>(&mut self, ids: impl IntoIterator<Item = &'a SongId>) {
        for id in ids {
            self.dirty.remove(id);
        }
    }

    /// Take the ids whose cached scores went stale since the last call.
    pub fn drain_stale(&mut self) -> Vec<SongId> {
        std::mem::take(&mut self.stale)
    }

    /// Check the inlink/outlink mirror invariant over the whole graph.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.songs.iter().all(|(id, node)| {
            node.outlinks
                .iter()
                .all(|o| self.songs.get(o).is_some_and(|t| t.inlinks.contains(id)))
                && node
                    .inlinks
                    .iter()
                    .all(|i| self.songs.get(i).is_some_and(|s| s.outlinks.contains(id)))
        })
    }

    fn ensure_artist(&mut self, name: &str, genre: Option<&str>, now_ms: u64) {
        self.artists.entry(artist_id(name)).or_insert_with(|| ArtistNode {
            metadata: ArtistMetadata {
                name: name.to_string(),
                genre: genre.unwrap_or_default().to_string(),
                added_at: now_ms,
                play_count: 0,
            },
            last_updated: now_ms,
            ..Default::default()
        });
    }

    fn link_artists(&mut self, from: &str, to: &str) {
        let artist_of = |id: &str| {
            self.songs
                .get(id)
                .map(|n| n.metadata.artist.as_str())
                .filter(|a| !a.is_empty())
                .map(artist_id)
        };
        let (Some(a), Some(b)) = (artist_of(from), artist_of(to)) else {
            return;
        };
        if a == b || !self.artists.contains_key(&a) || !self.artists.contains_key(&b) {
            return;
        }
        if let Some(node) = self.artists.get_mut(&a) {
            node.outlinks.insert(b.clone());
        }
        if let Some(node) = self.artists.get_mut(&b) {
            node.inlinks.insert(a);
        }
    }

    /// Clone the node maps into ordered maps for persistence.
    #[must_use]
    pub fn export_nodes(&self) -> (BTreeMap<SongId, SongNode>, BTreeMap<SongId, ArtistNode>) {
        (
            self.songs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            self.artists.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )
    }

    /// Rebuild a graph from persisted node maps. The dirty set starts empty.
    #[must_use]
    pub fn from_nodes(
        songs: BTreeMap<SongId, SongNode>,
        artists: BTreeMap<SongId, ArtistNode>,
        edge_threshold: f64,
    ) -> Self {
        Self {
            songs: songs.into_iter().collect(),
            artists: artists.into_iter().collect(),
            dirty: HashSet::new(),
            stale: Vec::new(),
            edge_threshold,
        }
    }
}

/// Key of the artist node for a display name.
#[must_use]
pub fn artist_id(name: &str) -> SongId {
    format!("artist_{}", normalize_title(name, 50))
}

/// Persisted form of the ranking state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub song_graph: BTreeMap<SongId, SongNode>,
    pub artist_graph: BTreeMap<SongId, ArtistNode>,
    pub page_rank_scores: BTreeMap<SongId, f64>,
    pub artist_page_rank_scores: BTreeMap<SongId, f64>,
    /// Epoch ms of the last full recompute, 0 if never.
    pub last_full_calculation: u64,
    /// Epoch ms the snapshot was taken.
    pub last_updated: u64,
}
