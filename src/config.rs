//! # Configuration Module
//!
//! Tuning parameters for ranking and scheduling, plus data directory management.
//!
//! ## Data Storage
//!
//! The graph snapshot is stored in the platform-standard data directory:
//! - Linux: `~/.local/share/songrank/`
//! - macOS: `~/Library/Application Support/songrank/`
//! - Windows: `%APPDATA%\songrank\`
//!
//! ## Settings File
//!
//! All structs deserialize with defaults for missing fields, so a settings file only
//! needs the values it overrides:
//!
//! ```json
//! { "ranking": { "damping": 0.9 }, "scheduler": { "retention_enabled": true } }
//! ```

use crate::algorithm::{theoretical_iteration_bound, BoostMode};
use crate::clock::DAY_MS;
use crate::graph::DEFAULT_EDGE_THRESHOLD;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns the platform-appropriate data directory for songrank, creating it if
/// needed.
///
/// # Errors
///
/// Fails if the system data directory cannot be determined or the `songrank`
/// subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let songrank_dir = data_dir.join("songrank");
    fs::create_dir_all(&songrank_dir).with_context(|| {
        format!(
            "Failed to create songrank data directory at {}. Please check file permissions.",
            songrank_dir.display()
        )
    })?;

    Ok(songrank_dir)
}

/// Default location of the JSON graph snapshot.
pub fn get_snapshot_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("music_graph.json"))
}

/// Parameters of the score engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub damping: f64,
    /// Nominal convergence threshold ε.
    pub epsilon: f64,
    /// Requested iteration limit, clamped to the theoretical bound.
    pub max_iterations: usize,
    pub incremental_max_iterations: usize,
    /// Graphs smaller than this are never scored.
    pub min_graph_size: usize,
    pub full_recompute_interval_secs: u64,
    /// Dirty share of the graph above which a recompute becomes full.
    pub full_recompute_dirty_ratio: f64,
    /// Iterations between cooperative yields.
    pub yield_every_iterations: usize,
    pub score_cache_ttl_secs: u64,
    pub edge_threshold: f64,
    pub boost_mode: BoostMode,
    pub retention_max_age_days: u64,
    /// Recommendations scoring at or below this are dropped.
    pub recommendation_floor: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            epsilon: 0.001,
            max_iterations: 100,
            incremental_max_iterations: 10,
            min_graph_size: 5,
            full_recompute_interval_secs: 6 * 60 * 60,
            full_recompute_dirty_ratio: 0.1,
            yield_every_iterations: 5,
            score_cache_ttl_secs: 5 * 60,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            boost_mode: BoostMode::EveryIteration,
            retention_max_age_days: 30,
            recommendation_floor: 0.001,
        }
    }
}

impl RankingConfig {
    /// Iteration limit of a full recompute.
    #[must_use]
    pub fn effective_max_iterations(&self) -> usize {
        self.max_iterations
            .min(theoretical_iteration_bound(self.damping, self.epsilon))
            .max(1)
    }

    #[must_use]
    pub fn full_recompute_interval_ms(&self) -> u64 {
        self.full_recompute_interval_secs.saturating_mul(1000)
    }

    #[must_use]
    pub fn score_cache_ttl_ms(&self) -> u64 {
        self.score_cache_ttl_secs.saturating_mul(1000)
    }

    #[must_use]
    pub fn retention_max_age_ms(&self) -> u64 {
        self.retention_max_age_days.saturating_mul(DAY_MS)
    }
}

/// Periods of the background tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub flush_interval_secs: u64,
    pub incremental_interval_secs: u64,
    /// Dirty count the periodic incremental recompute waits for.
    pub incremental_dirty_threshold: usize,
    pub full_interval_secs: u64,
    pub persist_interval_secs: u64,
    pub cache_eviction_interval_secs: u64,
    pub retention_enabled: bool,
    pub retention_interval_secs: u64,
    /// Dirty count after a flush that arms the debounced incremental recompute.
    pub debounce_dirty_threshold: usize,
    pub debounce_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            incremental_interval_secs: 30 * 60,
            incremental_dirty_threshold: 5,
            full_interval_secs: 6 * 60 * 60,
            persist_interval_secs: 5 * 60,
            cache_eviction_interval_secs: 15 * 60,
            retention_enabled: false,
            retention_interval_secs: 24 * 60 * 60,
            debounce_dirty_threshold: 10,
            debounce_delay_secs: 5,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    #[must_use]
    pub const fn incremental_interval(&self) -> Duration {
        Duration::from_secs(self.incremental_interval_secs)
    }

    #[must_use]
    pub const fn full_interval(&self) -> Duration {
        Duration::from_secs(self.full_interval_secs)
    }

    #[must_use]
    pub const fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    #[must_use]
    pub const fn cache_eviction_interval(&self) -> Duration {
        Duration::from_secs(self.cache_eviction_interval_secs)
    }

    #[must_use]
    pub const fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    #[must_use]
    pub const fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }
}

/// Snapshot storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

/// Where the snapshot lives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Explicit snapshot location; the data directory is used when unset.
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved snapshot location for the configured backend.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dir = get_data_dir()?;
        Ok(match self.backend {
            StorageBackend::Json => dir.join("music_graph.json"),
            StorageBackend::Sqlite => dir.join("music_graph.db3"),
        })
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ranking: RankingConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
}

impl Settings {
    /// Load settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid settings JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }

    /// Settings from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}
