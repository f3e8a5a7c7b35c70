//! # Ranking Engine
//!
//! [`RankingEngine`] is the single owner of the ranking state: the song graph (with
//! its dirty set), the score table, the pending relationship-event queue and the
//! score cache. Construct one at startup and hand it to callers, usually wrapped in
//! a [`crate::service::RankingService`].
//!
//! ## Event flow
//!
//! Co-occurrence events are queued with [`RankingEngine::enqueue_event`] and only
//! applied to the graph by [`RankingEngine::flush_pending`]. Recomputes are planned
//! with [`RankingEngine::begin_recompute`], advanced outside the engine, and applied
//! with [`RankingEngine::finish_recompute`]:
//!
//! ```text
//! enqueue_event ─► pending ─► flush_pending ─► graph + dirty set
//!                                                  │
//!                    begin_recompute ◄─────────────┘
//!                          │ RecomputeJob::step (chunks)
//!                          ▼
//!                    finish_recompute ─► score table, cache cleared
//! ```

use crate::algorithm::{PowerIteration, RecomputeMode};
use crate::cache::ScoreCache;
use crate::clock::{Clock, SystemClock};
use crate::config::RankingConfig;
use crate::graph::{GraphSnapshot, SongGraph};
use crate::recorder::{self, RecordOutcome, RelationshipEvent};
use crate::song::{MetadataPatch, PlaylistInfo, SearchResult, SongId, SongMetadata, TrackInfo};
use log::{debug, info, trace};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Number of songs listed in [`Analytics::top_songs`].
pub const TOP_SONGS: usize = 10;

/// Confidence boost for a search result with the given score.
#[must_use]
pub fn search_boost(score: f64) -> f64 {
    ((score * 2000.0 + 1.0).ln() * 12.0).min(75.0)
}

/// One entry of a top-songs listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSong {
    pub song_id: SongId,
    pub score: f64,
    pub metadata: Option<SongMetadata>,
}

/// Read-only status snapshot of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub song_count: usize,
    pub relationship_count: usize,
    pub artist_count: usize,
    pub top_songs: Vec<TopSong>,
    pub dirty_node_count: usize,
    /// Epoch ms, 0 if no full recompute happened yet.
    pub last_full_recompute_time: u64,
    pub pending_update_count: usize,
    pub cache_size: usize,
}

/// Summary of one pending-queue flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub events: usize,
    pub songs_touched: usize,
    pub edges_added: usize,
}

/// Summary of a finished recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
    pub mode: RecomputeMode,
    pub nodes: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Largest per-song change in the final iteration.
    pub last_delta: f64,
    pub threshold: f64,
    pub max_iterations: usize,
    pub elapsed_ms: u128,
}

/// A planned recompute. Owns a frozen copy of the data it needs, so it can be
/// advanced without access to the engine.
#[derive(Debug)]
pub struct RecomputeJob {
    run: PowerIteration,
    /// Dirty ids this run accounts for.
    covered_dirty: Vec<SongId>,
    started: Instant,
}

impl RecomputeJob {
    #[must_use]
    pub const fn mode(&self) -> RecomputeMode {
        self.run.mode()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.run.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.run.is_empty()
    }

    /// Run at most `budget` iterations. Returns `true` once finished.
    pub fn step(&mut self, budget: usize) -> bool {
        self.run.step(budget)
    }

    pub fn run_to_end(&mut self) {
        self.run.run_to_end();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.run.is_finished()
    }
}

/// Owner of graph, scores, pending events and cache.
#[derive(Debug)]
pub struct RankingEngine {
    graph: SongGraph,
    scores: HashMap<SongId, f64>,
    artist_scores: BTreeMap<SongId, f64>,
    pending: VecDeque<RelationshipEvent>,
    cache: ScoreCache,
    last_full_recompute: u64,
    config: RankingConfig,
    clock: Arc<dyn Clock>,
}

impl RankingEngine {
    /// Empty engine reading the system clock.
    #[must_use]
    pub fn new(config: RankingConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: RankingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            graph: SongGraph::new(config.edge_threshold),
            scores: HashMap::new(),
            artist_scores: BTreeMap::new(),
            pending: VecDeque::new(),
            cache: ScoreCache::new(config.score_cache_ttl_ms()),
            last_full_recompute: 0,
            config,
            clock,
        }
    }

    /// Rebuild an engine from a persisted snapshot. Adjacency, scores and the last
    /// full recompute time are restored; dirty set, queue and cache start empty.
    #[must_use]
    pub fn from_snapshot(snapshot: GraphSnapshot, config: RankingConfig, clock: Arc<dyn Clock>) -> Self {
        let mut engine = Self::with_clock(config, clock);
        engine.graph = SongGraph::from_nodes(
            snapshot.song_graph,
            snapshot.artist_graph,
            engine.config.edge_threshold,
        );
        engine.scores = snapshot.page_rank_scores.into_iter().collect();
        engine.artist_scores = snapshot.artist_page_rank_scores;
        engine.last_full_recompute = snapshot.last_full_calculation;
        info!(
            "Restored ranking state: {} songs, {} scores",
            engine.graph.len(),
            engine.scores.len()
        );
        engine
    }

    /// Serialisable copy of the full state.
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        let (song_graph, artist_graph) = self.graph.export_nodes();
        GraphSnapshot {
            song_graph,
            artist_graph,
            page_rank_scores: self.scores.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            artist_page_rank_scores: self.artist_scores.clone(),
            last_full_calculation: self.last_full_recompute,
            last_updated: self.now_ms(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RankingConfig {
        &self.config
    }

    #[must_use]
    pub const fn graph(&self) -> &SongGraph {
        &self.graph
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    #[must_use]
    pub const fn last_full_recompute(&self) -> u64 {
        self.last_full_recompute
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.graph.dirty_count()
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    // ---- graph mutations ----

    /// Create or update a song. Returns `true` if it was created.
    pub fn upsert_song(&mut self, id: &str, patch: &MetadataPatch) -> bool {
        let now = self.now_ms();
        let created = self.graph.upsert_song(id, patch, now);
        self.drop_stale_cache();
        created
    }

    /// Add a directed edge if `weight` is above the edge threshold.
    pub fn add_edge(&mut self, from: &str, to: &str, weight: f64) -> bool {
        let now = self.now_ms();
        let added = self.graph.add_edge(from, to, weight, now);
        self.drop_stale_cache();
        added
    }

    /// Remove a song, its score and its cached score. Returns `false` if unknown.
    pub fn remove_song(&mut self, id: &str) -> bool {
        let removed = self.graph.remove_song(id).is_some();
        if removed {
            self.scores.remove(id);
        }
        self.drop_stale_cache();
        removed
    }

    fn drop_stale_cache(&mut self) {
        for id in self.graph.drain_stale() {
            self.cache.invalidate(&id);
        }
    }

    // ---- score reads ----

    /// Score of a song through the TTL cache; 0 for unknown or unscored songs.
    pub fn get_score(&mut self, id: &str) -> f64 {
        let now = self.now_ms();
        if let Some(score) = self.cache.get(id, now) {
            return score;
        }
        let score = self.score(id);
        self.cache.insert(id, score, now);
        score
    }

    /// Score table lookup without the cache.
    #[must_use]
    pub fn score(&self, id: &str) -> f64 {
        self.scores.get(id).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn scores(&self) -> &HashMap<SongId, f64> {
        &self.scores
    }

    /// Highest scored songs, optionally restricted by a predicate on the id.
    #[must_use]
    pub fn top_songs(&self, limit: usize, filter: impl Fn(&str) -> bool) -> Vec<TopSong> {
        let mut ranked: Vec<(&SongId, f64)> = self
            .scores
            .iter()
            .filter(|(id, _)| filter(id))
            .map(|(id, score)| (id, *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(id, score)| TopSong {
                song_id: id.clone(),
                score,
                metadata: self.graph.get(id).map(|n| n.metadata.clone()),
            })
            .collect()
    }

    /// Drop expired cache entries.
    pub fn evict_cache(&mut self) -> usize {
        let now = self.now_ms();
        let evicted = self.cache.evict_expired(now);
        if evicted > 0 {
            debug!("Evicted {evicted} expired score cache entries");
        }
        evicted
    }

    // ---- query / record façade ----

    /// Boost search results by their songs' scores.
    ///
    /// Scores are read before the results are recorded, so calling this twice with
    /// the same input yields the same boosts. Error results pass through untouched.
    /// The result set is queued as a search co-occurrence event.
    pub fn enhance_results(&mut self, query: &str, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut seen = Vec::new();
        for result in results.iter_mut().filter(|r| !r.is_error) {
            let id = result.song_id();
            let score = self.get_score(&id);
            if score > 0.0 {
                let boost = search_boost(score);
                result.confidence = Some(result.confidence.unwrap_or(0.0) + boost);
                result.page_rank_score = Some(score);
                result.page_rank_boost = Some(boost);
            }

            let patch = MetadataPatch {
                title: Some(result.title.clone()),
                source: Some(result.source.clone()),
                webpage_url: result.webpage_url.clone(),
                duration_ms: result.duration_seconds.map(|s| s.saturating_mul(1000)),
                ..Default::default()
            };
            self.upsert_song(&id, &patch);
            seen.push(id);
        }

        if seen.len() > 1 {
            self.enqueue_event(RelationshipEvent::Search { query: query.to_string(), song_ids: seen });
        }
        results
    }

    /// Record one play of a song, creating it if needed.
    pub fn record_play(&mut self, id: &str, patch: &MetadataPatch) {
        let now = self.now_ms();
        self.graph.upsert_song(id, patch, now);
        self.graph.increment_play_count(id);
        self.graph.mark_dirty(id);
        self.drop_stale_cache();
        trace!("Recorded play of {id}");
    }

    /// Register the tracks of a playlist and queue a playlist co-occurrence event.
    /// Returns the derived song ids in playlist order.
    pub fn record_playlist(&mut self, playlist: &PlaylistInfo, tracks: &[TrackInfo]) -> Vec<SongId> {
        let ids = self.upsert_tracks(tracks);
        if ids.len() >= 2 {
            info!("Queued playlist '{}' with {} songs", playlist.name, ids.len());
            self.enqueue_event(RelationshipEvent::Playlist {
                song_ids: ids.clone(),
                metadata: playlist.event_metadata(),
            });
        }
        ids
    }

    /// Register a play order and queue a queue co-occurrence event.
    pub fn record_queue_sequence(&mut self, tracks: &[TrackInfo]) -> Vec<SongId> {
        let ids = self.upsert_tracks(tracks);
        if ids.len() >= 2 {
            debug!("Queued play sequence of {} songs", ids.len());
            self.enqueue_event(RelationshipEvent::Queue { song_ids: ids.clone() });
        }
        ids
    }

    fn upsert_tracks(&mut self, tracks: &[TrackInfo]) -> Vec<SongId> {
        tracks
            .iter()
            .map(|track| {
                let id = track.song_id();
                self.upsert_song(&id, &track.metadata_patch());
                id
            })
            .collect()
    }

    /// Queue an event for the next flush.
    pub fn enqueue_event(&mut self, event: RelationshipEvent) {
        self.pending.push_back(event);
    }

    /// Apply every pending event: playlists first, then queues, then searches.
    pub fn flush_pending(&mut self) -> FlushReport {
        if self.pending.is_empty() {
            return FlushReport::default();
        }
        let now = self.now_ms();
        let mut events: Vec<RelationshipEvent> = self.pending.drain(..).collect();
        events.sort_by_key(|event| match event {
            RelationshipEvent::Playlist { .. } => 0,
            RelationshipEvent::Queue { .. } => 1,
            RelationshipEvent::Search { .. } => 2,
        });

        let mut report = FlushReport { events: events.len(), ..Default::default() };
        for event in &events {
            let RecordOutcome { songs_touched, edges_added } = recorder::record(&mut self.graph, event, now);
            report.songs_touched += songs_touched;
            report.edges_added += edges_added;
        }
        self.drop_stale_cache();

        info!(
            "Flushed {} events: {} new edges, {} dirty nodes",
            report.events,
            report.edges_added,
            self.graph.dirty_count()
        );
        report
    }

    // ---- recompute ----

    /// Whether the next recompute should cover the whole graph.
    #[must_use]
    pub fn full_recompute_due(&self) -> bool {
        let elapsed = self.now_ms().saturating_sub(self.last_full_recompute);
        let dirty_limit = self.graph.len() as f64 * self.config.full_recompute_dirty_ratio;
        elapsed > self.config.full_recompute_interval_ms() || self.graph.dirty_count() as f64 > dirty_limit
    }

    /// Which recompute would run now, if any.
    #[must_use]
    pub fn plan_recompute(&self, force_full: bool) -> Option<RecomputeMode> {
        if self.graph.len() < self.config.min_graph_size {
            return None;
        }
        if force_full || self.full_recompute_due() {
            Some(RecomputeMode::Full)
        } else if self.graph.dirty_count() > 0 {
            Some(RecomputeMode::Incremental)
        } else {
            None
        }
    }

    /// Freeze the data for the next recompute. `None` if nothing should run.
    #[must_use]
    pub fn begin_recompute(&self, force_full: bool) -> Option<RecomputeJob> {
        let mode = self.plan_recompute(force_full)?;
        let now = self.now_ms();
        let covered_dirty = self.graph.dirty_ids();

        let run = match mode {
            RecomputeMode::Full => PowerIteration::full(&self.graph, &self.config, now),
            RecomputeMode::Incremental => {
                let mut nodes: BTreeSet<SongId> = BTreeSet::new();
                for id in &covered_dirty {
                    if let Some(node) = self.graph.get(id) {
                        nodes.extend(node.neighbours().cloned());
                    }
                    nodes.insert(id.clone());
                }
                let nodes: Vec<SongId> = nodes.into_iter().collect();
                PowerIteration::incremental(&self.graph, &nodes, &self.scores, &self.config, now)
            }
        };

        info!("Starting {mode:?} recompute over {} songs", run.len());
        Some(RecomputeJob { run, covered_dirty, started: Instant::now() })
    }

    /// Apply a finished (or abandoned mid-way) job to the score table.
    ///
    /// Songs removed while the job ran are skipped; songs added meanwhile stay dirty.
    pub fn finish_recompute(&mut self, job: RecomputeJob) -> RecomputeReport {
        let RecomputeJob { run, covered_dirty, started } = job;
        let mode = run.mode();
        let nodes = run.len();
        let iterations = run.iterations();
        let converged = run.converged();
        let last_delta = run.last_delta();
        let threshold = run.threshold();
        let max_iterations = run.max_iterations();
        let fresh = run
            .into_scores()
            .into_iter()
            .filter(|(id, _)| self.graph.contains(id));

        match mode {
            RecomputeMode::Full => {
                self.scores = fresh.collect();
                self.last_full_recompute = self.now_ms();
            }
            RecomputeMode::Incremental => self.scores.extend(fresh),
        }
        self.graph.clear_dirty(&covered_dirty);
        self.cache.clear();

        let report = RecomputeReport {
            mode,
            nodes,
            iterations,
            converged,
            last_delta,
            threshold,
            max_iterations,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            "{mode:?} recompute finished: {nodes} songs, {iterations} iterations, converged: {converged}, {} ms",
            report.elapsed_ms
        );
        report
    }

    /// Plan, run and apply a recompute in one go.
    pub fn recompute_blocking(&mut self, force_full: bool) -> Option<RecomputeReport> {
        let mut job = self.begin_recompute(force_full)?;
        job.run_to_end();
        Some(self.finish_recompute(job))
    }

    // ---- maintenance ----

    /// Remove songs older than the retention age that were never played or searched.
    /// Returns the number of removed songs; callers should force a full recompute
    /// afterwards.
    pub fn sweep_stale_songs(&mut self) -> usize {
        let now = self.now_ms();
        let max_age = self.config.retention_max_age_ms();
        let stale: Vec<SongId> = self
            .graph
            .iter()
            .filter(|(_, node)| {
                let meta = &node.metadata;
                now.saturating_sub(meta.added_at) > max_age && meta.play_count < 1 && meta.search_count == 0
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.remove_song(id);
        }
        if !stale.is_empty() {
            info!("Retention sweep removed {} songs", stale.len());
        }
        stale.len()
    }

    #[must_use]
    pub fn analytics(&self) -> Analytics {
        Analytics {
            song_count: self.graph.len(),
            relationship_count: self.graph.relationship_count(),
            artist_count: self.graph.artist_count(),
            top_songs: self.top_songs(TOP_SONGS, |_| true),
            dirty_node_count: self.graph.dirty_count(),
            last_full_recompute_time: self.last_full_recompute,
            pending_update_count: self.pending.len(),
            cache_size: self.cache.len(),
        }
    }
}
