//! # Play-Order Optimisation
//!
//! Reorders a track list by ranking score, adjusted per strategy:
//!
//! - **Engagement**: the plain score.
//! - **Discovery**: favours less popular tracks, `score × (1 + 1/popularity)`.
//! - **Energy**: rewards popularity jumps between neighbouring tracks of the input
//!   order, `score × (1 + |pop(i) − pop(i−1)| / 100)`, as a proxy for energy changes.
//!
//! Missing popularity counts as 50. Ties keep their input order.

use crate::engine::RankingEngine;
use crate::song::TrackInfo;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Popularity assumed for tracks that do not report one.
pub const DEFAULT_POPULARITY: u32 = 50;

/// Score and popularity of one track, in input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderCandidate {
    pub score: f64,
    pub popularity: Option<u32>,
}

impl OrderCandidate {
    fn popularity_or_default(self) -> f64 {
        f64::from(self.popularity.unwrap_or(DEFAULT_POPULARITY))
    }
}

/// Scoring rule of a play-order strategy.
pub trait OrderStrategy {
    /// Adjusted score of `candidates[index]`.
    fn score(&self, candidates: &[OrderCandidate], index: usize) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngagementStrategy;

impl OrderStrategy for EngagementStrategy {
    fn score(&self, candidates: &[OrderCandidate], index: usize) -> f64 {
        candidates[index].score
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryStrategy;

impl OrderStrategy for DiscoveryStrategy {
    fn score(&self, candidates: &[OrderCandidate], index: usize) -> f64 {
        let candidate = candidates[index];
        candidate.score * (1.0 + 1.0 / candidate.popularity_or_default().max(1.0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyStrategy;

impl OrderStrategy for EnergyStrategy {
    fn score(&self, candidates: &[OrderCandidate], index: usize) -> f64 {
        let candidate = candidates[index];
        let flow = match index.checked_sub(1) {
            Some(prev) => {
                let delta = candidate.popularity_or_default() - candidates[prev].popularity_or_default();
                1.0 + delta.abs() / 100.0
            }
            None => 1.0,
        };
        candidate.score * flow
    }
}

/// Named strategies, for the CLI and settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OrderCriteria {
    #[default]
    Engagement,
    Discovery,
    Energy,
}

impl OrderCriteria {
    #[must_use]
    pub fn strategy(self) -> Box<dyn OrderStrategy> {
        match self {
            Self::Engagement => Box::new(EngagementStrategy),
            Self::Discovery => Box::new(DiscoveryStrategy),
            Self::Energy => Box::new(EnergyStrategy),
        }
    }
}

impl fmt::Display for OrderCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Engagement => "engagement",
            Self::Discovery => "discovery",
            Self::Energy => "energy",
        };
        f.write_str(name)
    }
}

/// Sort `items` by their strategy score, highest first. `candidates` must be
/// parallel to `items`.
#[must_use]
pub fn reorder<T>(items: Vec<T>, candidates: &[OrderCandidate], strategy: &dyn OrderStrategy) -> Vec<T> {
    debug_assert_eq!(items.len(), candidates.len());
    if items.len() < 2 {
        return items;
    }

    let mut scored: Vec<(f64, T)> = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| (strategy.score(candidates, i), item))
        .collect();
    // Stable sort, ties keep input order.
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, item)| item).collect()
}

/// Reorder general tracks by their ranking scores.
#[must_use]
pub fn optimize_play_order(engine: &RankingEngine, tracks: Vec<TrackInfo>, criteria: OrderCriteria) -> Vec<TrackInfo> {
    if tracks.len() < 2 {
        return tracks;
    }
    debug!("Optimizing play order for {} tracks ({criteria})", tracks.len());
    let candidates: Vec<OrderCandidate> = tracks
        .iter()
        .map(|t| OrderCandidate { score: engine.score(&t.song_id()), popularity: t.popularity })
        .collect();
    reorder(tracks, &candidates, criteria.strategy().as_ref())
}
