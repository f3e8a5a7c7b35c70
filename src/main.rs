//! # Songrank
//!
//! Command-line front end over a persisted song graph. Loads settings and the
//! stored snapshot, runs one command and saves the graph again when it changed.
//!
//! ## Usage
//!
//! ```bash
//! # Record a playlist and recompute
//! songrank import-playlist road-trip.json
//! songrank recompute
//!
//! # Inspect
//! songrank stats
//! songrank score spotify_4uLU6hMCjMI75M1A2tKUQC
//!
//! # Keep ranking up to date in the background
//! songrank run
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use songrank::clock::{Clock, SystemClock};
use songrank::config::Settings;
use songrank::db::{self, SnapshotStore};
use songrank::recommend::UserProfile;
use songrank::service::RankingService;
use songrank::song::{PlaylistInfo, TrackInfo};
use songrank::{cli, completion, scheduler, spotify};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Contents of an `import-playlist` file.
#[derive(Debug, Deserialize)]
struct PlaylistImport {
    playlist: PlaylistInfo,
    tracks: Vec<TrackInfo>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

/// Flush queued events and write the graph back to the store.
fn save(service: &RankingService, store: &dyn SnapshotStore) -> Result<()> {
    service.flush_pending();
    let snapshot = service.with_engine(|engine| engine.snapshot());
    store
        .save(&snapshot)
        .with_context(|| format!("Failed to save graph to {}", store.location().display()))?;
    debug!("Saved {} songs to {}", snapshot.song_graph.len(), store.location().display());
    Ok(())
}

/// Main entry point.
///
/// Logging is controlled through `RUST_LOG`:
/// - `RUST_LOG=debug songrank recompute` - Enable debug logging
/// - `RUST_LOG=songrank::algorithm=trace songrank recompute --full` - Per-iteration output
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    // Completions need neither settings nor a store.
    if let cli::Command::Completion { shell } = args.command {
        let mut cmd = cli::Args::command();
        completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        return Ok(());
    }

    let mut settings = Settings::load_or_default(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        settings.storage.backend = backend;
    }
    if let Some(path) = args.store {
        settings.storage.path = Some(path);
    }

    let store = db::open_store(&settings.storage)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = db::load_engine(store.as_ref(), settings.ranking.clone(), clock);
    let service = RankingService::new(engine, Some(Arc::clone(&store)));

    match args.command {
        cli::Command::Stats { spotify } => {
            if spotify {
                print_json(&service.with_engine(|engine| spotify::spotify_analytics(engine)))?;
            } else {
                print_json(&service.analytics())?;
            }
        }
        cli::Command::Score { id } => {
            print_json(&serde_json::json!({ "songId": id, "score": service.get_score(&id) }))?;
        }
        cli::Command::Recompute { full } => {
            let flushed = service.flush_pending();
            debug!("Flushed {} pending events before recompute", flushed.events);
            match service.recompute(full) {
                Some(report) => print_json(&report)?,
                None => {
                    println!("Nothing to recompute");
                    save(&service, store.as_ref())?;
                }
            }
        }
        cli::Command::ImportPlaylist { file } => {
            let import: PlaylistImport = read_json(&file)?;
            let ids = service.record_playlist(&import.playlist, &import.tracks);
            save(&service, store.as_ref())?;
            info!("Imported playlist '{}' with {} tracks", import.playlist.name, ids.len());
            println!("Recorded {} tracks from playlist '{}'", ids.len(), import.playlist.name);
        }
        cli::Command::ImportQueue { file } => {
            let tracks: Vec<TrackInfo> = read_json(&file)?;
            let ids = service.record_queue_sequence(&tracks);
            save(&service, store.as_ref())?;
            println!("Recorded {} queued tracks", ids.len());
        }
        cli::Command::Recommend { seeds, limit, genres, no_explicit, duration } => {
            let profile = UserProfile {
                top_genres: genres,
                explicit_filter: no_explicit.then_some(false),
                preferred_duration_secs: duration,
            };
            print_json(&service.recommend(&seeds, &profile, limit))?;
        }
        cli::Command::Order { file, criteria } => {
            let tracks: Vec<TrackInfo> = read_json(&file)?;
            print_json(&service.optimize_play_order(tracks, criteria))?;
        }
        cli::Command::Sweep => {
            let removed = service.sweep_stale_songs();
            save(&service, store.as_ref())?;
            println!("Removed {removed} stale songs");
        }
        cli::Command::Run { for_secs } => {
            let handle = scheduler::spawn(service.clone(), settings.scheduler.clone())?;
            match for_secs {
                Some(secs) => {
                    info!("Running scheduler for {secs}s");
                    thread::sleep(Duration::from_secs(secs));
                    handle.stop()?;
                    save(&service, store.as_ref())?;
                }
                None => {
                    info!("Running scheduler until interrupted");
                    loop {
                        thread::park();
                    }
                }
            }
        }
        cli::Command::CompleteSongs { prefix } => {
            let ids = service.with_engine(|engine| completion::song_completions(engine.graph(), &prefix));
            for id in ids {
                println!("{id}");
            }
        }
        // Handled before the store was opened.
        cli::Command::Completion { .. } => {}
    }

    Ok(())
}
