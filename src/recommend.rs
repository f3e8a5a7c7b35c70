//! Graph-neighbourhood recommendations.
//!
//! Candidates are the direct neighbours (both directions) of the seed songs. Each
//! candidate scores `score × connection_strength × user_preference_multiplier`;
//! candidates reached from several seeds keep their best score.

use crate::engine::RankingEngine;
use crate::graph::SongGraph;
use crate::song::{SongId, SongMetadata};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Upper bound of [`connection_strength`].
pub const MAX_CONNECTION_STRENGTH: f64 = 2.0;

/// Listening preferences supplied by the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserProfile {
    pub top_genres: Vec<String>,
    /// `Some(false)` penalises explicit tracks.
    pub explicit_filter: Option<bool>,
    /// Preferred track length in seconds.
    pub preferred_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub song_id: SongId,
    pub score: f64,
    pub metadata: SongMetadata,
    /// Seed that produced the best score.
    pub connected_to: SongId,
}

/// How strongly `candidate` is tied to `seed`: +1 for a direct edge, +0.5 more if
/// the edge goes both ways, +0.3 for the same artist. Capped at 2.0, 0 if either
/// song is unknown.
#[must_use]
pub fn connection_strength(graph: &SongGraph, seed: &str, candidate: &str) -> f64 {
    let (Some(from), Some(to)) = (graph.get(seed), graph.get(candidate)) else {
        return 0.0;
    };

    let mut strength: f64 = 0.0;
    let forward = from.outlinks.contains(candidate);
    if forward {
        strength += 1.0;
    }
    if forward && from.inlinks.contains(candidate) {
        strength += 0.5;
    }
    let artist = &from.metadata.artist;
    if !artist.is_empty() && *artist == to.metadata.artist {
        strength += 0.3;
    }
    strength.min(MAX_CONNECTION_STRENGTH)
}

/// Preference adjustment for one track.
#[must_use]
pub fn user_preference_multiplier(metadata: &SongMetadata, profile: &UserProfile) -> f64 {
    let mut multiplier = 1.0;

    if let Some(genre) = &metadata.genre {
        if profile.top_genres.contains(genre) {
            multiplier *= 1.2;
        }
    }
    if profile.explicit_filter == Some(false) && metadata.explicit == Some(true) {
        multiplier *= 0.5;
    }
    if let (Some(preferred), Some(duration)) = (profile.preferred_duration_secs, metadata.duration_ms) {
        if preferred > 0 && duration > 0 {
            let preferred_ms = preferred.saturating_mul(1000) as f64;
            let penalty = ((duration as f64 - preferred_ms).abs() / (preferred_ms * 2.0)).min(0.5);
            multiplier *= 1.0 - penalty;
        }
    }
    multiplier
}

/// Top `limit` neighbours of `seeds`, best first. Scores at or below the
/// configured floor are dropped.
#[must_use]
pub fn recommend(
    engine: &RankingEngine,
    seeds: &[SongId],
    profile: &UserProfile,
    limit: usize,
) -> Vec<Recommendation> {
    let graph = engine.graph();
    let floor = engine.config().recommendation_floor;
    let seed_set: HashSet<&str> = seeds.iter().map(String::as_str).collect();
    let mut best: HashMap<&str, Recommendation> = HashMap::new();

    for seed in seeds {
        let Some(seed_node) = graph.get(seed) else {
            continue;
        };
        for candidate in seed_node.outlinks.iter().chain(&seed_node.inlinks) {
            if seed_set.contains(candidate.as_str()) {
                continue;
            }
            let Some(node) = graph.get(candidate) else {
                continue;
            };

            let score = engine.score(candidate)
                * connection_strength(graph, seed, candidate)
                * user_preference_multiplier(&node.metadata, profile);
            if score <= floor {
                continue;
            }
            if best.get(candidate.as_str()).is_some_and(|r| r.score >= score) {
                continue;
            }
            best.insert(
                candidate,
                Recommendation {
                    song_id: candidate.clone(),
                    score,
                    metadata: node.metadata.clone(),
                    connected_to: seed.clone(),
                },
            );
        }
    }

    let mut ranked: Vec<Recommendation> = best.into_values().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.song_id.cmp(&b.song_id)));
    ranked.truncate(limit);
    debug!("Generated {} recommendations from {} seeds", ranked.len(), seeds.len());
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RankingConfig;
    use crate::recorder::RelationshipEvent;
    use crate::song::MetadataPatch;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn by(artist: &str) -> MetadataPatch {
        MetadataPatch { artist: Some(artist.into()), ..Default::default() }
    }

    fn scored_engine() -> RankingEngine {
        let mut engine = RankingEngine::with_clock(RankingConfig::default(), Arc::new(ManualClock::new(0)));
        engine.upsert_song("seed", &by("A"));
        engine.upsert_song("twin", &by("A"));
        engine.upsert_song("other", &by("B"));
        engine.enqueue_event(RelationshipEvent::Playlist {
            song_ids: ["seed", "twin", "x", "y", "z"].map(String::from).to_vec(),
            metadata: BTreeMap::new(),
        });
        engine.enqueue_event(RelationshipEvent::Queue { song_ids: vec!["seed".into(), "other".into()] });
        engine.enqueue_event(RelationshipEvent::Queue { song_ids: vec!["back".into(), "seed".into()] });
        engine.flush_pending();
        engine.recompute_blocking(true);
        engine
    }

    #[test]
    fn test_connection_strength_components() {
        let engine = scored_engine();
        let graph = engine.graph();
        // bidirectional + same artist
        assert!((connection_strength(graph, "seed", "twin") - 1.8).abs() < 1e-12);
        // forward only, different artist
        assert!((connection_strength(graph, "seed", "other") - 1.0).abs() < 1e-12);
        // inbound only
        assert_eq!(connection_strength(graph, "seed", "back"), 0.0);
        assert_eq!(connection_strength(graph, "seed", "missing"), 0.0);
    }

    #[test]
    fn test_user_preference_multiplier() {
        let profile = UserProfile {
            top_genres: vec!["jazz".into()],
            explicit_filter: Some(false),
            preferred_duration_secs: Some(200),
        };
        let exact = SongMetadata { genre: Some("jazz".into()), duration_ms: Some(200_000), ..Default::default() };
        assert!((user_preference_multiplier(&exact, &profile) - 1.2).abs() < 1e-12);

        let explicit_long = SongMetadata { explicit: Some(true), duration_ms: Some(400_000), ..Default::default() };
        // 0.5 for explicit, penalty min(0.5, 200000 / 400000) = 0.5
        assert!((user_preference_multiplier(&explicit_long, &profile) - 0.25).abs() < 1e-12);

        assert_eq!(user_preference_multiplier(&explicit_long, &UserProfile::default()), 1.0);
    }

    #[test]
    fn test_user_preference_multiplier_huge_preferred_duration() {
        let profile = UserProfile { preferred_duration_secs: Some(u64::MAX), ..Default::default() };
        let song = SongMetadata { duration_ms: Some(200_000), ..Default::default() };
        // penalty caps at 0.5
        assert!((user_preference_multiplier(&song, &profile) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_recommend_excludes_seeds_and_ranks() {
        let engine = scored_engine();
        let recs = recommend(&engine, &["seed".to_string(), "x".to_string()], &UserProfile::default(), 10);

        assert!(recs.iter().all(|r| r.song_id != "seed" && r.song_id != "x"));
        assert!(recs.iter().all(|r| r.song_id != "back"), "zero strength is dropped");
        assert!(recs.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(recs.iter().any(|r| r.song_id == "twin"));
        assert!(recs.iter().all(|r| r.score > 0.001));
    }

    #[test]
    fn test_recommend_keeps_best_score_per_candidate() {
        let engine = scored_engine();
        let recs = recommend(&engine, &["seed".to_string(), "x".to_string()], &UserProfile::default(), 10);
        let twin = recs.iter().find(|r| r.song_id == "twin").unwrap();
        // Same artist gives "seed" the stronger tie.
        assert_eq!(twin.connected_to, "seed");
        assert_eq!(recs.iter().filter(|r| r.song_id == "twin").count(), 1);
    }

    #[test]
    fn test_recommend_limit_and_unknown_seeds() {
        let engine = scored_engine();
        assert_eq!(recommend(&engine, &["seed".to_string()], &UserProfile::default(), 2).len(), 2);
        assert!(recommend(&engine, &["nope".to_string()], &UserProfile::default(), 5).is_empty());
    }
}
