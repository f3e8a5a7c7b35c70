//! Relationship-based song ranking for multi-source music bots.
//!
//! Songs become nodes of a directed graph; playlists, play queues and search result
//! lists add edges between the songs that appear together. A damped iterative
//! ranking over that graph, boosted by popularity and recency, yields a score per
//! song, which is then used to re-rank search results, recommend related songs and
//! order playback.
//!
//! Core modules:
//! - [`graph`] - Song and artist adjacency maps, snapshot format
//! - [`recorder`] - Relationship events and their edge generators
//! - [`algorithm`] - Popularity boost and the chunked power iteration
//! - [`engine`] - Owner of graph, scores, pending events and cache
//! - [`service`] - Shareable handle with the single-flight recompute gate
//! - [`scheduler`] - Background flush, recompute, persist and eviction
//!
//! ### Supporting Modules
//!
//! - [`song`] - Song ids, metadata and the track shapes callers hand over
//! - [`cache`] - TTL score cache
//! - [`recommend`] - Seed-based recommendations
//! - [`queue`] - Play-order strategies
//! - [`spotify`] - Spotify-flavoured ids, boosts and analytics
//! - [`db`] - JSON file and `SQLite` snapshot stores
//! - [`config`] - Settings and data directory management
//! - [`clock`] - Time source
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use songrank::config::RankingConfig;
//! use songrank::engine::RankingEngine;
//! use songrank::service::RankingService;
//! use songrank::song::{PlaylistInfo, TrackInfo};
//!
//! let service = RankingService::new(RankingEngine::new(RankingConfig::default()), None);
//!
//! let playlist = PlaylistInfo { id: "p1".into(), name: "Road trip".into(), ..Default::default() };
//! let tracks: Vec<TrackInfo> = ["Intro", "Hold On", "Night Drive", "Outro", "Encore"]
//!     .into_iter()
//!     .map(|title| TrackInfo::new(title, "youtube"))
//!     .collect();
//! let ids = service.record_playlist(&playlist, &tracks);
//! service.flush_pending();
//!
//! if let Some(report) = service.recompute(false) {
//!     println!("{:?} recompute over {} songs", report.mode, report.nodes);
//! }
//! println!("score of {}: {:.4}", ids[0], service.get_score(&ids[0]));
//! ```
//!
//! ## Error Handling
//!
//! Ranking never fails towards its callers: unknown songs score 0, a failed save is
//! logged and retried, and an unreadable snapshot starts an empty graph. Only
//! configuration loading and the stores return `anyhow::Result`.

pub mod algorithm;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod completion;
pub mod config;
pub mod db;
pub mod engine;
pub mod graph;
pub mod queue;
pub mod recommend;
pub mod recorder;
pub mod scheduler;
pub mod service;
pub mod song;
pub mod spotify;
