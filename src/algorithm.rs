//! Song scoring: a damped power iteration (PageRank variant) over the song graph.
//!
//! Each iteration computes, for every node `i`:
//!
//! ```text
//! score'(i) = ((1 - d) / N + d * Σ_{j ∈ inlinks(i)} score(j) / max(1, outdegree(j))) * boost(i)
//! ```
//!
//! where `boost(i)` is the [`popularity_boost`] of the node. With
//! [`BoostMode::EveryIteration`] the boost is reapplied on every pass, which
//! reinforces popular songs over the course of the run. [`BoostMode::AfterConvergence`]
//! iterates the plain damped rank and multiplies the boost in once at the end.
//!
//! A [`PowerIteration`] works on a frozen, index-based copy of the graph so it can be
//! advanced in chunks with [`PowerIteration::step`] while the live graph keeps
//! accepting mutations between chunks.

use crate::clock::DAY_MS;
use crate::config::RankingConfig;
use crate::graph::SongGraph;
use crate::song::{SongId, SongMetadata};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound of the popularity boost factor.
pub const MAX_POPULARITY_BOOST: f64 = 2.0;
/// Lower bound of the adaptive full-recompute convergence threshold.
pub const MIN_ADAPTIVE_THRESHOLD: f64 = 0.0001;

/// When the popularity boost enters the iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostMode {
    #[default]
    EveryIteration,
    AfterConvergence,
}

/// Which part of the graph a recompute covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeMode {
    Full,
    Incremental,
}

/// `ceil(ln(1/ε) / (1 − d))`, the number of iterations after which the damped
/// iteration is guaranteed to be within `ε`.
#[must_use]
pub fn theoretical_iteration_bound(damping: f64, epsilon: f64) -> usize {
    let bound = ((1.0 / epsilon).ln() / (1.0 - damping)).ceil();
    if bound.is_finite() && bound > 0.0 {
        bound as usize
    } else {
        1
    }
}

/// Convergence threshold for a full recompute over `node_count` nodes:
/// `max(0.0001, ε / √N)`.
#[must_use]
pub fn adaptive_threshold(epsilon: f64, node_count: usize) -> f64 {
    (epsilon / (node_count.max(1) as f64).sqrt()).max(MIN_ADAPTIVE_THRESHOLD)
}

/// Multiplicative boost from play/search counts and recency, capped at
/// [`MAX_POPULARITY_BOOST`].
///
/// Songs first seen less than 7 days ago get up to +7% linearly.
#[must_use]
pub fn popularity_boost(metadata: &SongMetadata, now_ms: u64) -> f64 {
    let mut boost = 1.0;
    if metadata.play_count > 0 {
        boost += (metadata.play_count as f64 + 1.0).ln() * 0.08;
    }
    if metadata.search_count > 0 {
        boost += (metadata.search_count as f64 + 1.0).ln() * 0.04;
    }

    let age_days = now_ms.saturating_sub(metadata.added_at) as f64 / DAY_MS as f64;
    if age_days < 7.0 {
        boost *= 1.0 + (7.0 - age_days) * 0.01;
    }
    boost.min(MAX_POPULARITY_BOOST)
}

/// Frozen, chunkable power iteration.
#[derive(Debug, Clone)]
pub struct PowerIteration {
    mode: RecomputeMode,
    ids: Vec<SongId>,
    /// Local indices of inlinks that are part of this run.
    inlinks: Vec<Vec<usize>>,
    /// `max(1, outdegree)` per local node.
    outdegree: Vec<f64>,
    /// Constant contribution of inlinks outside the run (incremental only).
    external: Vec<f64>,
    boosts: Vec<f64>,
    scores: Vec<f64>,
    teleport: f64,
    damping: f64,
    threshold: f64,
    max_iterations: usize,
    boost_mode: BoostMode,
    iterations: usize,
    last_delta: f64,
    converged: bool,
}

impl PowerIteration {
    /// Full recompute from the uniform distribution over every song.
    #[must_use]
    pub fn full(graph: &SongGraph, config: &RankingConfig, now_ms: u64) -> Self {
        let mut ids: Vec<SongId> = graph.iter().map(|(id, _)| id.clone()).collect();
        ids.sort_unstable();
        let n = ids.len();
        let initial = if n == 0 { 0.0 } else { 1.0 / n as f64 };

        Self::build(
            RecomputeMode::Full,
            graph,
            ids,
            |_| initial,
            |_| 0.0,
            n,
            adaptive_threshold(config.epsilon, n),
            config.effective_max_iterations(),
            config,
            now_ms,
        )
    }

    /// Incremental recompute over `nodes`, seeded with `prior` scores.
    ///
    /// The teleport term still uses the size of the whole graph, and inlinks from
    /// outside `nodes` contribute their prior score as a constant.
    #[must_use]
    pub fn incremental(
        graph: &SongGraph,
        nodes: &[SongId],
        prior: &HashMap<SongId, f64>,
        config: &RankingConfig,
        now_ms: u64,
    ) -> Self {
        let total = graph.len();
        let default_seed = if total == 0 { 0.0 } else { 1.0 / total as f64 };
        let mut ids: Vec<SongId> = nodes.iter().filter(|id| graph.contains(id)).cloned().collect();
        ids.sort_unstable();
        ids.dedup();

        let damping = config.damping;
        Self::build(
            RecomputeMode::Incremental,
            graph,
            ids,
            |id| prior.get(id).copied().unwrap_or(default_seed),
            |outside| {
                let score = prior.get(outside).copied().unwrap_or(0.0);
                let outdegree = graph.get(outside).map_or(1, |n| n.share_divisor()) as f64;
                damping * score / outdegree
            },
            total,
            config.epsilon * 2.0,
            config.incremental_max_iterations.min(config.effective_max_iterations()),
            config,
            now_ms,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        mode: RecomputeMode,
        graph: &SongGraph,
        ids: Vec<SongId>,
        seed: impl Fn(&SongId) -> f64,
        outside_contribution: impl Fn(&SongId) -> f64,
        teleport_nodes: usize,
        threshold: f64,
        max_iterations: usize,
        config: &RankingConfig,
        now_ms: u64,
    ) -> Self {
        let index: HashMap<&SongId, usize> = ids.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let n = ids.len();
        let mut inlinks = vec![Vec::new(); n];
        let mut outdegree = vec![1.0; n];
        let mut external = vec![0.0; n];
        let mut boosts = vec![1.0; n];
        let mut scores = vec![0.0; n];

        for (i, id) in ids.iter().enumerate() {
            let Some(node) = graph.get(id) else { continue };
            outdegree[i] = node.share_divisor() as f64;
            boosts[i] = popularity_boost(&node.metadata, now_ms);
            scores[i] = seed(id);
            for inlink in &node.inlinks {
                match index.get(inlink) {
                    Some(&j) => inlinks[i].push(j),
                    None => external[i] += outside_contribution(inlink),
                }
            }
        }

        let teleport = if teleport_nodes == 0 {
            0.0
        } else {
            (1.0 - config.damping) / teleport_nodes as f64
        };

        Self {
            mode,
            ids,
            inlinks,
            outdegree,
            external,
            boosts,
            scores,
            teleport,
            damping: config.damping,
            threshold,
            max_iterations,
            boost_mode: config.boost_mode,
            iterations: 0,
            last_delta: 0.0,
            converged: n == 0,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> RecomputeMode {
        self.mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> &[SongId] {
        &self.ids
    }

    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    #[must_use]
    pub const fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Largest absolute per-node change of the last iteration.
    #[must_use]
    pub const fn last_delta(&self) -> f64 {
        self.last_delta
    }

    #[must_use]
    pub const fn converged(&self) -> bool {
        self.converged
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.converged || self.iterations >= self.max_iterations
    }

    /// Run at most `budget` iterations. Returns `true` once the run is finished.
    pub fn step(&mut self, budget: usize) -> bool {
        for _ in 0..budget {
            if self.is_finished() {
                break;
            }
            self.iterate();
        }
        self.is_finished()
    }

    /// Run until convergence or the iteration limit.
    pub fn run_to_end(&mut self) {
        while !self.step(usize::MAX) {}
    }

    fn iterate(&mut self) {
        let reapply_boost = self.boost_mode == BoostMode::EveryIteration;
        let scores = &self.scores;
        let next: Vec<f64> = (0..self.ids.len())
            .into_par_iter()
            .map(|i| {
                let mut score = self.teleport + self.external[i];
                for &j in &self.inlinks[i] {
                    score += self.damping * (scores[j] / self.outdegree[j]);
                }
                if reapply_boost {
                    score *= self.boosts[i];
                }
                score
            })
            .collect();

        self.last_delta = next
            .iter()
            .zip(&self.scores)
            .map(|(new, old)| (new - old).abs())
            .fold(0.0, f64::max);
        self.scores = next;
        self.iterations += 1;
        if self.last_delta < self.threshold {
            self.converged = true;
        }
    }

    /// Final `(id, score)` pairs of the run.
    #[must_use]
    pub fn into_scores(self) -> Vec<(SongId, f64)> {
        let boost_once = self.boost_mode == BoostMode::AfterConvergence;
        self.ids
            .into_iter()
            .zip(self.scores)
            .zip(self.boosts)
            .map(|((id, score), boost)| (id, if boost_once { score * boost } else { score }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::MetadataPatch;

    const OLD: u64 = 0;
    const NOW: u64 = 365 * DAY_MS;

    fn ring(n: usize) -> SongGraph {
        let mut graph = SongGraph::default();
        for i in 0..n {
            graph.add_edge(&format!("s{i}"), &format!("s{}", (i + 1) % n), 1.0, OLD);
        }
        graph
    }

    #[test]
    fn test_theoretical_bound_reference_values() {
        assert_eq!(theoretical_iteration_bound(0.85, 0.001), 47);
    }

    #[test]
    fn test_adaptive_threshold() {
        assert!((adaptive_threshold(0.001, 4) - 0.0005).abs() < 1e-15);
        assert_eq!(adaptive_threshold(0.001, 1_000_000), MIN_ADAPTIVE_THRESHOLD);
    }

    #[test]
    fn test_popularity_boost_neutral_for_old_unplayed_song() {
        let meta = SongMetadata { added_at: OLD, ..Default::default() };
        assert_eq!(popularity_boost(&meta, NOW), 1.0);
    }

    #[test]
    fn test_popularity_boost_counts_and_recency() {
        let meta = SongMetadata { play_count: 9, search_count: 3, added_at: OLD, ..Default::default() };
        let expected = 1.0 + 10f64.ln() * 0.08 + 4f64.ln() * 0.04;
        assert!((popularity_boost(&meta, NOW) - expected).abs() < 1e-12);

        let fresh = SongMetadata { added_at: NOW, ..Default::default() };
        assert!((popularity_boost(&fresh, NOW) - 1.07).abs() < 1e-12);
    }

    #[test]
    fn test_popularity_boost_is_capped() {
        let meta = SongMetadata { play_count: u64::MAX / 2, search_count: u64::MAX / 2, added_at: NOW, ..Default::default() };
        assert_eq!(popularity_boost(&meta, NOW), MAX_POPULARITY_BOOST);
    }

    #[test]
    fn test_full_iteration_on_ring_is_uniform() {
        let graph = ring(6);
        let mut run = PowerIteration::full(&graph, &RankingConfig::default(), NOW);
        run.run_to_end();
        assert!(run.converged());
        let scores = run.into_scores();
        for (_, score) in &scores {
            assert!((score - 1.0 / 6.0).abs() < 1e-9);
        }
        let total: f64 = scores.iter().map(|(_, s)| s).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hub_scores_highest() {
        let mut graph = SongGraph::default();
        for leaf in ["a", "b", "c", "d", "e"] {
            graph.add_edge(leaf, "hub", 1.0, OLD);
        }
        graph.add_edge("hub", "a", 1.0, OLD);
        let mut run = PowerIteration::full(&graph, &RankingConfig::default(), NOW);
        run.run_to_end();
        let scores: HashMap<_, _> = run.into_scores().into_iter().collect();
        assert!(scores["hub"] > scores["a"]);
        assert!(scores["a"] > scores["b"]);
        assert!(scores.values().all(|s| *s >= 0.0));
    }

    #[test]
    fn test_step_respects_budget() {
        let graph = ring(8);
        let config = RankingConfig { epsilon: 1e-12, ..Default::default() };
        let mut run = PowerIteration::full(&graph, &config, NOW);
        // Uniform start on a ring is already a fixed point, so it converges at once.
        assert!(run.step(5));
        assert_eq!(run.iterations(), 1);

        let mut graph = ring(8);
        graph.add_edge("s0", "s4", 1.0, OLD);
        let mut run = PowerIteration::full(&graph, &config, NOW);
        assert!(!run.step(5));
        assert_eq!(run.iterations(), 5);
        run.run_to_end();
        assert!(run.iterations() <= run.max_iterations());
    }

    #[test]
    fn test_incremental_only_covers_given_nodes() {
        let mut graph = ring(6);
        let mut full = PowerIteration::full(&graph, &RankingConfig::default(), NOW);
        full.run_to_end();
        let prior: HashMap<_, _> = full.into_scores().into_iter().collect();

        graph.upsert_song("s2", &MetadataPatch::default(), OLD);
        let nodes = vec!["s1".to_string(), "s2".to_string(), "s3".to_string(), "gone".to_string()];
        let mut inc = PowerIteration::incremental(&graph, &nodes, &prior, &RankingConfig::default(), NOW);
        assert_eq!(inc.len(), 3);
        inc.run_to_end();
        assert!(inc.iterations() <= 10);
        for (_, score) in inc.into_scores() {
            assert!((score - 1.0 / 6.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_boost_after_convergence_mode() {
        let mut graph = ring(5);
        graph.upsert_song("s0", &MetadataPatch::default(), OLD);
        for _ in 0..20 {
            graph.increment_play_count("s0");
        }
        let config = RankingConfig { boost_mode: BoostMode::AfterConvergence, ..Default::default() };
        let mut run = PowerIteration::full(&graph, &config, NOW);
        run.run_to_end();
        let scores: HashMap<_, _> = run.into_scores().into_iter().collect();
        let boost = 1.0 + 21f64.ln() * 0.08;
        assert!((scores["s0"] / scores["s1"] - boost).abs() < 1e-6);
    }

    #[test]
    fn test_empty_graph_finishes_immediately() {
        let graph = SongGraph::default();
        let mut run = PowerIteration::full(&graph, &RankingConfig::default(), NOW);
        assert!(run.is_empty());
        assert!(run.step(1));
        assert_eq!(run.iterations(), 0);
    }
}
