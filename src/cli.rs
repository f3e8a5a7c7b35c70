//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `songrank` binary. Every command works on the
//! persisted graph snapshot; commands that change the graph save it again before
//! exiting.
//!
//! ## Commands
//!
//! - `stats`: Graph analytics and the current top songs
//! - `score`: Ranking score of one song
//! - `recompute`: Run an incremental or full recompute
//! - `import-playlist` / `import-queue`: Record relationships from a JSON file
//! - `recommend`: Songs related to one or more seed songs
//! - `order`: Reorder a JSON track list for playback
//! - `sweep`: Remove songs nobody touched within the retention window
//! - `run`: Keep the background scheduler running
//!
//! ## Examples
//!
//! ```bash
//! songrank import-playlist road-trip.json
//! songrank recompute --full
//! songrank recommend youtube_abc123 --limit 5 --genre rock
//! RUST_LOG=songrank=debug songrank run --for-secs 600
//! ```

use crate::config::StorageBackend;
use crate::queue::OrderCriteria;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "songrank")]
#[command(about = "Songrank: relationship-based song ranking for music bots")]
#[command(version)]
pub struct Args {
    /// Settings file (JSON). Defaults are used when omitted.
    #[arg(long, global = true, env = "SONGRANK_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Snapshot location, overriding the settings file
    #[arg(long, global = true, env = "SONGRANK_STORE", value_hint = clap::ValueHint::FilePath)]
    pub store: Option<PathBuf>,

    /// Snapshot backend, overriding the settings file
    #[arg(long, global = true, value_enum)]
    pub backend: Option<StorageBackend>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show graph analytics as JSON
    ///
    /// Song, relationship and artist counts, dirty and pending counters, the last
    /// full recompute time and the ten highest-ranked songs.
    Stats {
        /// Include the Spotify-specific view
        #[arg(long)]
        spotify: bool,
    },

    /// Print the ranking score of a song
    Score {
        /// Song id as stored in the graph
        #[arg(value_hint = clap::ValueHint::Other)]
        id: String,
    },

    /// Recompute ranking scores
    ///
    /// Pending events are flushed first. Without `--full` the engine decides
    /// between a full and an incremental run; small graphs are skipped.
    Recompute {
        /// Force a full recompute over the whole graph
        #[arg(long)]
        full: bool,
    },

    /// Record a playlist from a JSON file
    ///
    /// The file holds `{"playlist": {...}, "tracks": [...]}` with tracks in
    /// playlist order.
    ImportPlaylist {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Record a play queue from a JSON array of tracks
    ImportQueue {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Recommend songs related to the given seeds
    Recommend {
        /// Seed song ids
        #[arg(required = true)]
        seeds: Vec<String>,

        /// Maximum number of recommendations
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Preferred genre, may be repeated
        #[arg(long = "genre")]
        genres: Vec<String>,

        /// Penalise explicit songs
        #[arg(long)]
        no_explicit: bool,

        /// Preferred song length in seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Reorder a JSON array of tracks for playback
    Order {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Ordering strategy
        #[arg(short, long, value_enum, default_value_t = OrderCriteria::Engagement)]
        criteria: OrderCriteria,
    },

    /// Remove songs not updated within the retention window
    Sweep,

    /// Run the background scheduler in the foreground
    ///
    /// Flushes, recomputes, evicts and persists on the configured intervals until
    /// interrupted, or until `--for-secs` elapse.
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        for_secs: Option<u64>,
    },

    /// Generate shell completions
    ///
    /// Usage: songrank completion bash > ~/.local/share/bash-completion/completions/songrank
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List song ids for completion (hidden command)
    #[command(hide = true)]
    CompleteSongs {
        /// Only ids starting with this prefix
        #[arg(default_value = "")]
        prefix: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_recommend() {
        let args = Args::parse_from([
            "songrank", "--backend", "sqlite", "recommend", "a", "b", "-l", "3", "--genre", "rock", "--no-explicit",
        ]);
        assert_eq!(args.backend, Some(StorageBackend::Sqlite));
        match args.command {
            Command::Recommend { seeds, limit, genres, no_explicit, duration } => {
                assert_eq!(seeds, vec!["a", "b"]);
                assert_eq!(limit, 3);
                assert_eq!(genres, vec!["rock"]);
                assert!(no_explicit);
                assert_eq!(duration, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_order_criteria() {
        let args = Args::parse_from(["songrank", "order", "tracks.json", "--criteria", "energy"]);
        assert!(matches!(args.command, Command::Order { criteria: OrderCriteria::Energy, .. }));
    }

    #[test]
    fn test_recommend_requires_seed() {
        assert!(Args::try_parse_from(["songrank", "recommend"]).is_err());
    }
}
