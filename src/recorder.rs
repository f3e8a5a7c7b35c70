//! Relationship recording: turns co-occurrence events into graph edges.
//!
//! Three event kinds feed the graph:
//!
//! - **Playlist**: every pair of songs in a playlist, bidirectional, with linear decay
//!   by position distance. Playlists longer than [`SPARSE_PLAYLIST_THRESHOLD`] only
//!   connect each song to its next [`SPARSE_PLAYLIST_NEIGHBOURS`] songs.
//! - **Queue**: sliding window over the play order, forward edges only.
//! - **Search**: the top results of a search, forward edges only.
//!
//! Edge generation is pure ([`playlist_edges`], [`queue_edges`], [`search_edges`]);
//! [`record`] applies an event to a [`SongGraph`].

use crate::graph::SongGraph;
use crate::song::SongId;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const SPARSE_PLAYLIST_THRESHOLD: usize = 50;
pub const SPARSE_PLAYLIST_NEIGHBOURS: usize = 5;
pub const QUEUE_WINDOW: usize = 5;
pub const SEARCH_TOP_RESULTS: usize = 5;

/// Kind of relationship between two songs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    PlaylistCooccurrence,
    QueueCooccurrence,
    SearchCooccurrence,
    // Reserved for edge sources that are not wired up yet.
    ArtistCollaboration,
    GenreSimilarity,
    UserInteraction,
}

impl RelationshipKind {
    /// Multiplier applied to positional weights before the edge threshold check.
    #[must_use]
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::PlaylistCooccurrence => 1.0,
            Self::QueueCooccurrence => 0.8,
            Self::SearchCooccurrence => 0.5,
            Self::ArtistCollaboration => 0.6,
            Self::GenreSimilarity => 0.4,
            Self::UserInteraction => 0.7,
        }
    }
}

/// Directed edge candidate with its positional weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedEdge {
    pub from: SongId,
    pub to: SongId,
    pub weight: f64,
}

impl WeightedEdge {
    fn new(from: &SongId, to: &SongId, weight: f64) -> Self {
        Self { from: from.clone(), to: to.clone(), weight }
    }
}

/// Co-occurrence observation waiting in the pending update queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelationshipEvent {
    #[serde(rename_all = "camelCase")]
    Playlist {
        song_ids: Vec<SongId>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    Queue { song_ids: Vec<SongId> },
    #[serde(rename_all = "camelCase")]
    Search {
        #[serde(default)]
        query: String,
        song_ids: Vec<SongId>,
    },
}

impl RelationshipEvent {
    #[must_use]
    pub const fn kind(&self) -> RelationshipKind {
        match self {
            Self::Playlist { .. } => RelationshipKind::PlaylistCooccurrence,
            Self::Queue { .. } => RelationshipKind::QueueCooccurrence,
            Self::Search { .. } => RelationshipKind::SearchCooccurrence,
        }
    }

    #[must_use]
    pub fn song_ids(&self) -> &[SongId] {
        match self {
            Self::Playlist { song_ids, .. }
            | Self::Queue { song_ids }
            | Self::Search { song_ids, .. } => song_ids,
        }
    }

    /// Positional edge candidates for this event.
    #[must_use]
    pub fn edges(&self) -> Vec<WeightedEdge> {
        match self {
            Self::Playlist { song_ids, .. } => playlist_edges(song_ids),
            Self::Queue { song_ids } => queue_edges(song_ids),
            Self::Search { song_ids, .. } => search_edges(song_ids),
        }
    }
}

/// Playlist weight for two songs `distance` positions apart (dense mode).
#[must_use]
pub fn playlist_weight(distance: usize) -> f64 {
    (1.0 - distance as f64 * 0.05).max(0.1)
}

/// Playlist weight for a forward neighbour `distance` positions ahead (sparse mode).
#[must_use]
pub fn sparse_playlist_weight(distance: usize) -> f64 {
    (1.0 - distance as f64 * 0.15).max(0.1)
}

#[must_use]
pub fn queue_weight(distance: usize) -> f64 {
    (1.0 - distance as f64 * 0.1).max(0.2)
}

/// Search weight for the results at positions `i` and `j`.
#[must_use]
pub fn search_weight(i: usize, j: usize) -> f64 {
    (0.8 - (i + j) as f64 * 0.05).max(0.1)
}

/// Bidirectional edges between playlist members.
#[must_use]
pub fn playlist_edges(ids: &[SongId]) -> Vec<WeightedEdge> {
    if ids.len() < 2 {
        return Vec::new();
    }
    let mut edges = Vec::new();
    let mut push_pair = |a: &SongId, b: &SongId, weight: f64| {
        if a != b {
            edges.push(WeightedEdge::new(a, b, weight));
            edges.push(WeightedEdge::new(b, a, weight));
        }
    };

    if ids.len() > SPARSE_PLAYLIST_THRESHOLD {
        for i in 0..ids.len() {
            let reach = SPARSE_PLAYLIST_NEIGHBOURS.min(ids.len() - i - 1);
            for d in 1..=reach {
                push_pair(&ids[i], &ids[i + d], sparse_playlist_weight(d));
            }
        }
    } else {
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                push_pair(&ids[i], &ids[j], playlist_weight(j - i));
            }
        }
    }
    edges
}

/// Forward edges inside a sliding window over the queue order.
#[must_use]
pub fn queue_edges(ids: &[SongId]) -> Vec<WeightedEdge> {
    if ids.len() < 2 {
        return Vec::new();
    }
    let window = QUEUE_WINDOW.min(ids.len());
    let mut edges = Vec::new();
    for i in 0..ids.len() - 1 {
        let end = (i + window).min(ids.len());
        for j in (i + 1)..end {
            if ids[i] != ids[j] {
                edges.push(WeightedEdge::new(&ids[i], &ids[j], queue_weight(j - i)));
            }
        }
    }
    edges
}

/// Forward edges between the top search results.
#[must_use]
pub fn search_edges(ids: &[SongId]) -> Vec<WeightedEdge> {
    if ids.len() < 2 {
        return Vec::new();
    }
    let top = SEARCH_TOP_RESULTS.min(ids.len());
    let mut edges = Vec::new();
    for i in 0..top {
        for j in (i + 1)..top {
            if ids[i] != ids[j] {
                edges.push(WeightedEdge::new(&ids[i], &ids[j], search_weight(i, j)));
            }
        }
    }
    edges
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub songs_touched: usize,
    pub edges_added: usize,
}

/// Apply an event to the graph: create edges, bump counters, mark songs dirty.
///
/// Events with fewer than two songs are ignored.
pub fn record(graph: &mut SongGraph, event: &RelationshipEvent, now_ms: u64) -> RecordOutcome {
    let ids = event.song_ids();
    if ids.len() < 2 {
        return RecordOutcome::default();
    }

    let kind = event.kind();
    let mut outcome = RecordOutcome::default();
    for edge in event.edges() {
        if graph.add_edge(&edge.from, &edge.to, kind.base_weight() * edge.weight, now_ms) {
            outcome.edges_added += 1;
        }
    }

    let counted = match kind {
        RelationshipKind::SearchCooccurrence => &ids[..SEARCH_TOP_RESULTS.min(ids.len())],
        _ => ids,
    };
    for id in counted {
        graph.ensure_song(id, now_ms);
        match kind {
            RelationshipKind::SearchCooccurrence => graph.increment_search_count(id),
            _ => graph.increment_play_count(id),
        }
    }
    let touched: BTreeSet<&SongId> = counted.iter().collect();
    for id in &touched {
        graph.mark_dirty(id);
    }
    outcome.songs_touched = touched.len();

    debug!(
        "Recorded {kind:?} event: {} songs, {} new edges",
        outcome.songs_touched, outcome.edges_added
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<SongId> {
        (1..=n).map(|i| format!("s{i}")).collect()
    }

    fn playlist(n: usize) -> RelationshipEvent {
        RelationshipEvent::Playlist { song_ids: ids(n), metadata: BTreeMap::new() }
    }

    #[test]
    fn test_playlist_decay_weights() {
        let edges = playlist_edges(&ids(3));
        let weight = |from: &str, to: &str| {
            edges.iter().find(|e| e.from == from && e.to == to).map(|e| e.weight)
        };
        assert!((weight("s1", "s2").unwrap() - 0.95).abs() < 1e-12);
        assert!((weight("s2", "s1").unwrap() - 0.95).abs() < 1e-12);
        assert!((weight("s1", "s3").unwrap() - 0.9).abs() < 1e-12);
        assert!((weight("s3", "s1").unwrap() - 0.9).abs() < 1e-12);
        assert_eq!(edges.len(), 6);
    }

    #[test]
    fn test_small_playlist_creates_bidirectional_edges() {
        let mut graph = SongGraph::default();
        record(&mut graph, &playlist(3), 0);
        for (a, b) in [("s1", "s2"), ("s1", "s3"), ("s2", "s3")] {
            assert!(graph.has_edge(a, b), "{a} -> {b}");
            assert!(graph.has_edge(b, a), "{b} -> {a}");
        }
        assert!(graph.is_symmetric());
        assert_eq!(graph.get("s1").unwrap().metadata.play_count, 1);
    }

    #[test]
    fn test_far_playlist_pairs_fall_under_threshold() {
        let mut graph = SongGraph::default();
        record(&mut graph, &playlist(30), 0);
        // distance 17: 1.0 - 0.85 = 0.15
        assert!(graph.has_edge("s1", "s18"));
        // distance 20: clamped to 0.1, not above the threshold
        assert!(!graph.has_edge("s1", "s21"));
    }

    #[test]
    fn test_large_playlist_uses_sparse_mode() {
        let mut graph = SongGraph::default();
        let outcome = record(&mut graph, &playlist(60), 0);

        assert_eq!(graph.len(), 60);
        assert!(graph.relationship_count() <= 60 * 5 * 2);
        assert_eq!(graph.relationship_count(), 570);
        assert_eq!(outcome.edges_added, 570);
        assert!(graph.has_edge("s1", "s6"));
        assert!(!graph.has_edge("s1", "s7"));
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_queue_edges_are_forward_only() {
        let edges = queue_edges(&ids(7));
        let position = |id: &str| id[1..].parse::<usize>().unwrap();
        assert!(edges.iter().all(|e| position(&e.from) < position(&e.to)));
        let from_first: Vec<_> = edges.iter().filter(|e| e.from == "s1").collect();
        assert_eq!(from_first.len(), 4);
        assert!((from_first[0].weight - 0.9).abs() < 1e-12);
        assert!((from_first[3].weight - 0.6).abs() < 1e-12);

        let mut graph = SongGraph::default();
        record(&mut graph, &RelationshipEvent::Queue { song_ids: ids(3) }, 0);
        assert!(graph.has_edge("s1", "s2"));
        assert!(!graph.has_edge("s2", "s1"));
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_search_only_connects_top_results() {
        let event = RelationshipEvent::Search { query: "q".into(), song_ids: ids(8) };
        let edges = event.edges();
        assert_eq!(edges.len(), 10);
        assert!(edges.iter().all(|e| e.from != "s6" && e.to != "s6"));
        assert!((search_weight(0, 1) - 0.75).abs() < 1e-12);

        let mut graph = SongGraph::default();
        record(&mut graph, &event, 0);
        assert_eq!(graph.get("s1").unwrap().metadata.search_count, 1);
        assert!(graph.get("s6").is_none());
    }

    #[test]
    fn test_short_events_are_noops() {
        let mut graph = SongGraph::default();
        let outcome = record(&mut graph, &RelationshipEvent::Queue { song_ids: ids(1) }, 0);
        assert_eq!(outcome, RecordOutcome::default());
        assert!(graph.is_empty());
        assert!(playlist_edges(&[]).is_empty());
    }

    #[test]
    fn test_duplicate_ids_never_create_self_loops() {
        let mut graph = SongGraph::default();
        let event = RelationshipEvent::Queue { song_ids: vec!["a".into(), "a".into(), "b".into()] };
        record(&mut graph, &event, 0);
        assert!(!graph.has_edge("a", "a"));
        assert!(graph.has_edge("a", "b"));
    }

    #[test]
    fn test_touched_songs_and_neighbours_become_dirty() {
        let mut graph = SongGraph::default();
        graph.add_edge("x", "s1", 1.0, 0);
        graph.clear_dirty(&graph.dirty_ids());

        record(&mut graph, &RelationshipEvent::Queue { song_ids: ids(2) }, 0);
        assert!(graph.is_dirty("s1"));
        assert!(graph.is_dirty("s2"));
        assert!(graph.is_dirty("x"));
    }

    #[test]
    fn test_independent_events_commute() {
        let events = [
            playlist(4),
            RelationshipEvent::Queue { song_ids: vec!["s3".into(), "q1".into(), "q2".into()] },
            RelationshipEvent::Search { query: String::new(), song_ids: vec!["q2".into(), "s1".into()] },
        ];
        let mut forward = SongGraph::default();
        let mut backward = SongGraph::default();
        for event in &events {
            record(&mut forward, event, 0);
        }
        for event in events.iter().rev() {
            record(&mut backward, event, 0);
        }
        assert_eq!(forward.export_nodes(), backward.export_nodes());
    }
}
