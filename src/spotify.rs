//! # Spotify Integration
//!
//! Spotify-flavoured entry points on top of [`RankingEngine`]. Spotify tracks get
//! their own id namespace (`spotify_…`), a stronger search boost scaled by the
//! listener's context, and dedicated playlist and listening-session recording.

use crate::clock::DAY_MS;
use crate::engine::{Analytics, RankingEngine, TopSong, TOP_SONGS};
use crate::recorder::RelationshipEvent;
use crate::song::{normalize_title, MetadataPatch, PlaylistInfo, SongId, TITLE_ID_MAX_LEN};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const SPOTIFY_ID_PREFIX: &str = "spotify_";
pub const MAX_CONTEXTUAL_BOOST: f64 = 2.5;
/// Search results taken into a Spotify search co-occurrence event.
pub const SEARCH_PATTERN_RESULTS: usize = 10;

const RECENT_PLAY_WEIGHT: f64 = 1.2;
const FREQUENT_PLAY_WEIGHT: f64 = 1.5;
const SAVED_TRACK_WEIGHT: f64 = 1.3;
const NEW_RELEASE_DAYS: f64 = 30.0;
const ARTIST_ID_MAX_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyArtist {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyAlbum {
    pub name: String,
    /// `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub release_date: Option<String>,
}

/// Track object in the shape of the Spotify Web API, plus the ranking annotations
/// added by [`enhance_spotify_results`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyTrack {
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<SpotifyArtist>,
    pub album: Option<SpotifyAlbum>,
    pub popularity: Option<u32>,
    pub explicit: Option<bool>,
    pub duration_ms: Option<u64>,
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_rank_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_rank_boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contextual_multiplier: Option<f64>,
}

impl SpotifyTrack {
    #[must_use]
    pub fn first_artist(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }

    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[must_use]
    pub fn metadata_patch(&self) -> MetadataPatch {
        let mut patch = MetadataPatch {
            title: Some(self.name.clone()),
            artist: Some(self.artist_names()),
            album: self.album.as_ref().map(|a| a.name.clone()),
            source: Some("spotify".to_string()),
            popularity: self.popularity,
            explicit: self.explicit,
            duration_ms: self.duration_ms,
            ..Default::default()
        };
        if let Some(id) = &self.id {
            patch = patch.with_extra("spotifyId", id.clone());
        }
        patch
    }
}

/// What the listener has been doing lately.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyContext {
    pub recent_tracks: Vec<SpotifyTrack>,
    pub top_artists: Vec<SpotifyArtist>,
    pub saved_tracks: Vec<SpotifyTrack>,
}

/// Graph id of a Spotify track: `spotify_<id>`, or built from first artist and name.
#[must_use]
pub fn spotify_track_id(track: &SpotifyTrack) -> SongId {
    if let Some(id) = track.id.as_deref().filter(|id| !id.is_empty()) {
        return format!("{SPOTIFY_ID_PREFIX}{id}");
    }
    let name = normalize_title(&track.name, TITLE_ID_MAX_LEN);
    let artist = track
        .first_artist()
        .map(|a| normalize_title(a, ARTIST_ID_MAX_LEN))
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{SPOTIFY_ID_PREFIX}{artist}_{name}")
}

/// Age in days of a release, `None` if the date cannot be parsed.
#[must_use]
pub fn release_age_days(release_date: &str, now_ms: u64) -> Option<f64> {
    let date = NaiveDate::parse_from_str(release_date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{release_date}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{release_date}-01-01"), "%Y-%m-%d"))
        .ok()?;
    let released_ms = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    let age_ms = i128::from(now_ms) - i128::from(released_ms);
    Some((age_ms as f64 / DAY_MS as f64).max(0.0))
}

/// Listener-context multiplier, capped at [`MAX_CONTEXTUAL_BOOST`].
#[must_use]
pub fn contextual_boost(track: &SpotifyTrack, context: &SpotifyContext, now_ms: u64) -> f64 {
    let mut boost = 1.0;
    let artist = track.first_artist();

    if artist.is_some() && context.recent_tracks.iter().any(|t| t.first_artist() == artist) {
        boost *= RECENT_PLAY_WEIGHT;
    }
    if let Some(artist) = artist {
        if context.top_artists.iter().any(|a| a.name == artist) {
            boost *= FREQUENT_PLAY_WEIGHT;
        }
    }
    if track.id.is_some() && context.saved_tracks.iter().any(|t| t.id == track.id) {
        boost *= SAVED_TRACK_WEIGHT;
    }
    let age = track
        .album
        .as_ref()
        .and_then(|album| album.release_date.as_deref())
        .and_then(|date| release_age_days(date, now_ms));
    if let Some(age) = age.filter(|age| *age < NEW_RELEASE_DAYS) {
        boost *= 1.0 + (NEW_RELEASE_DAYS - age) * 0.01;
    }

    boost.min(MAX_CONTEXTUAL_BOOST)
}

/// Base confidence boost of a Spotify result with the given score.
#[must_use]
pub fn spotify_boost(score: f64) -> f64 {
    ((score * 3000.0 + 1.0).ln() * 15.0).min(100.0)
}

/// Register a track with its Spotify metadata.
pub fn record_spotify_track(engine: &mut RankingEngine, track: &SpotifyTrack) -> SongId {
    let id = spotify_track_id(track);
    engine.upsert_song(&id, &track.metadata_patch());
    id
}

/// Boost Spotify search results by score and listener context, record them, and
/// return them sorted by confidence.
pub fn enhance_spotify_results(
    engine: &mut RankingEngine,
    query: &str,
    tracks: Vec<SpotifyTrack>,
    context: &SpotifyContext,
) -> Vec<SpotifyTrack> {
    debug!("Enhancing {} Spotify results for '{query}'", tracks.len());
    let now = engine.now_ms();

    let mut enhanced: Vec<SpotifyTrack> = tracks
        .into_iter()
        .map(|mut track| {
            let id = spotify_track_id(&track);
            let score = engine.get_score(&id);
            if score > 0.0 {
                let multiplier = contextual_boost(&track, context, now);
                let total = spotify_boost(score) * multiplier;
                let base = track
                    .confidence
                    .or_else(|| track.popularity.map(f64::from))
                    .unwrap_or(50.0);
                track.confidence = Some(base + total);
                track.page_rank_score = Some(score);
                track.page_rank_boost = Some(total);
                track.contextual_multiplier = Some(multiplier);
            }
            record_spotify_track(engine, &track);
            track
        })
        .collect();

    let pattern: Vec<SongId> = enhanced
        .iter()
        .filter(|t| t.id.is_some())
        .take(SEARCH_PATTERN_RESULTS)
        .map(spotify_track_id)
        .collect();
    if pattern.len() > 1 {
        engine.enqueue_event(RelationshipEvent::Search { query: query.to_string(), song_ids: pattern });
    }

    enhanced.sort_by(|a, b| b.confidence.unwrap_or(0.0).total_cmp(&a.confidence.unwrap_or(0.0)));
    enhanced
}

/// Register a Spotify playlist and queue its co-occurrence event.
pub fn record_spotify_playlist(
    engine: &mut RankingEngine,
    playlist: &PlaylistInfo,
    tracks: &[SpotifyTrack],
) -> Vec<SongId> {
    if tracks.len() < 2 {
        return Vec::new();
    }
    info!("Recording Spotify playlist '{}' ({} tracks)", playlist.name, tracks.len());

    let mut metadata = playlist.event_metadata();
    metadata.insert("source".to_string(), "spotify".to_string());
    let ids: Vec<SongId> = tracks
        .iter()
        .enumerate()
        .map(|(position, track)| {
            let id = spotify_track_id(track);
            let patch = track
                .metadata_patch()
                .with_extra("playlistId", playlist.id.clone())
                .with_extra("playlistPosition", position.to_string());
            engine.upsert_song(&id, &patch);
            id
        })
        .collect();

    engine.enqueue_event(RelationshipEvent::Playlist { song_ids: ids.clone(), metadata });
    ids
}

/// Record a listening session: one play per track and a queue event for the order.
pub fn record_listening_session(engine: &mut RankingEngine, tracks: &[SpotifyTrack]) -> Vec<SongId> {
    if tracks.len() < 2 {
        return Vec::new();
    }
    debug!("Recording listening session of {} tracks", tracks.len());

    let ids: Vec<SongId> = tracks
        .iter()
        .enumerate()
        .map(|(position, track)| {
            let id = spotify_track_id(track);
            let patch = track
                .metadata_patch()
                .with_extra("sessionPosition", position.to_string());
            engine.record_play(&id, &patch);
            id
        })
        .collect();

    engine.enqueue_event(RelationshipEvent::Queue { song_ids: ids.clone() });
    ids
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationHealth {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifyAnalytics {
    #[serde(flatten)]
    pub general: Analytics,
    pub spotify_songs: usize,
    pub top_spotify_tracks: Vec<TopSong>,
    pub integration_health: IntegrationHealth,
}

#[must_use]
pub fn spotify_analytics(engine: &RankingEngine) -> SpotifyAnalytics {
    let is_spotify = |id: &str| id.starts_with(SPOTIFY_ID_PREFIX);
    let spotify_songs = engine.graph().iter().filter(|(id, _)| is_spotify(id.as_str())).count();
    SpotifyAnalytics {
        general: engine.analytics(),
        spotify_songs,
        top_spotify_tracks: engine.top_songs(TOP_SONGS, is_spotify),
        integration_health: if spotify_songs > 0 {
            IntegrationHealth::Active
        } else {
            IntegrationHealth::Inactive
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RankingConfig;
    use std::sync::Arc;

    // 2024-03-31T00:00:00Z
    const NOW: u64 = 1_711_843_200_000;

    fn track(id: Option<&str>, name: &str, artist: &str) -> SpotifyTrack {
        SpotifyTrack {
            id: id.map(String::from),
            name: name.into(),
            artists: vec![SpotifyArtist { id: None, name: artist.into() }],
            ..Default::default()
        }
    }

    fn engine() -> RankingEngine {
        RankingEngine::with_clock(RankingConfig::default(), Arc::new(ManualClock::new(NOW)))
    }

    #[test]
    fn test_spotify_track_id() {
        assert_eq!(spotify_track_id(&track(Some("4uLU6h"), "x", "y")), "spotify_4uLU6h");
        assert_eq!(
            spotify_track_id(&track(None, "Around the World", "Daft Punk")),
            "spotify_daft_punk_around_the_world"
        );
        let anonymous = SpotifyTrack { name: "Intro".into(), ..Default::default() };
        assert_eq!(spotify_track_id(&anonymous), "spotify_unknown_intro");
    }

    #[test]
    fn test_release_age_days_precisions() {
        assert_eq!(release_age_days("2024-03-21", NOW), Some(10.0));
        assert_eq!(release_age_days("2024-03", NOW), Some(30.0));
        assert!(release_age_days("2023", NOW).unwrap() > 365.0);
        assert_eq!(release_age_days("soon", NOW), None);
        assert_eq!(release_age_days("2030-01-01", NOW), Some(0.0));
    }

    #[test]
    fn test_contextual_boost_factors() {
        let mut t = track(Some("1"), "Song", "Artist");
        assert_eq!(contextual_boost(&t, &SpotifyContext::default(), NOW), 1.0);

        let context = SpotifyContext {
            recent_tracks: vec![track(Some("9"), "Other", "Artist")],
            top_artists: vec![],
            saved_tracks: vec![track(Some("1"), "Song", "Artist")],
        };
        assert!((contextual_boost(&t, &context, NOW) - 1.2 * 1.3).abs() < 1e-12);

        t.album = Some(SpotifyAlbum { name: "New".into(), release_date: Some("2024-03-21".into()) });
        let expected = 1.2 * 1.3 * 1.2;
        assert!((contextual_boost(&t, &context, NOW) - expected).abs() < 1e-12);

        let everything = SpotifyContext {
            top_artists: vec![SpotifyArtist { id: None, name: "Artist".into() }],
            ..context
        };
        assert_eq!(contextual_boost(&t, &everything, NOW), MAX_CONTEXTUAL_BOOST);
    }

    #[test]
    fn test_spotify_boost_is_capped() {
        assert!((spotify_boost(0.01) - 31f64.ln() * 15.0).abs() < 1e-12);
        assert_eq!(spotify_boost(10.0), 100.0);
    }

    #[test]
    fn test_enhance_spotify_results_sorts_and_records() {
        let mut engine = engine();
        let session: Vec<SpotifyTrack> = (0..6).map(|i| track(Some(&format!("t{i}")), "s", "a")).collect();
        record_listening_session(&mut engine, &session);
        engine.flush_pending();
        engine.recompute_blocking(true);

        let mut unknown = track(Some("new"), "Fresh", "b");
        unknown.confidence = Some(90.0);
        let mut known = track(Some("t5"), "s", "a");
        known.popularity = Some(40);

        let out = enhance_spotify_results(&mut engine, "q", vec![unknown, known], &SpotifyContext::default());
        assert_eq!(out[0].id.as_deref(), Some("t5"));
        let boost = out[0].page_rank_boost.unwrap();
        assert!((out[0].confidence.unwrap() - (40.0 + boost)).abs() < 1e-9);
        assert_eq!(out[0].contextual_multiplier, Some(1.0));
        assert_eq!(out[1].confidence, Some(90.0));
        assert!(engine.graph().contains("spotify_new"));
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn test_listening_session_records_plays() {
        let mut engine = engine();
        let tracks = vec![track(Some("a"), "A", "X"), track(Some("b"), "B", "Y")];
        let ids = record_listening_session(&mut engine, &tracks);
        assert_eq!(ids, vec!["spotify_a", "spotify_b"]);
        let meta = &engine.graph().get("spotify_a").unwrap().metadata;
        assert_eq!(meta.play_count, 1);
        assert_eq!(meta.source, "spotify");
        assert_eq!(meta.additional.get("spotifyId").map(String::as_str), Some("a"));

        assert!(record_listening_session(&mut engine, &tracks[..1]).is_empty());
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn test_spotify_playlist_recording() {
        let mut engine = engine();
        let playlist = PlaylistInfo { id: "pl".into(), name: "Mix".into(), ..Default::default() };
        let tracks = vec![track(Some("a"), "A", "X"), track(None, "B", "Y"), track(Some("c"), "C", "Z")];
        let ids = record_spotify_playlist(&mut engine, &playlist, &tracks);
        assert_eq!(ids[1], "spotify_y_b");
        engine.flush_pending();
        assert!(engine.graph().has_edge("spotify_c", "spotify_a"));
        let meta = &engine.graph().get("spotify_c").unwrap().metadata;
        assert_eq!(meta.additional.get("playlistPosition").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_spotify_analytics_health() {
        let mut engine = engine();
        assert_eq!(spotify_analytics(&engine).integration_health, IntegrationHealth::Inactive);
        engine.upsert_song("youtube_x", &MetadataPatch::default());
        record_spotify_track(&mut engine, &track(Some("a"), "A", "X"));
        let stats = spotify_analytics(&engine);
        assert_eq!(stats.spotify_songs, 1);
        assert_eq!(stats.general.song_count, 2);
        assert_eq!(stats.integration_health, IntegrationHealth::Active);
    }
}
