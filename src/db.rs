//! # Snapshot Persistence
//!
//! The ranking state is persisted as one [`GraphSnapshot`] document. Two backends:
//!
//! - [`JsonFileStore`]: a JSON file, written to a temporary file in the same
//!   directory and atomically renamed into place.
//! - [`SqliteStore`]: the same JSON document in a single-row `SQLite` table.
//!
//! In-memory state stays authoritative: a failed save is the caller's to log and
//! retry, and [`load_engine`] falls back to an empty engine on any load problem.

use crate::clock::Clock;
use crate::config::{RankingConfig, StorageBackend, StorageConfig};
use crate::engine::RankingEngine;
use crate::graph::GraphSnapshot;
use anyhow::{Context, Result};
use log::{debug, error, info, trace};
use rusqlite::{Connection, OptionalExtension};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Durable home of a [`GraphSnapshot`].
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Replace the stored snapshot.
    ///
    /// # Errors
    ///
    /// Fails on IO, serialisation or database errors.
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()>;

    /// Stored snapshot, `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Fails if the stored document cannot be read or parsed.
    fn load(&self) -> Result<Option<GraphSnapshot>>;

    fn location(&self) -> &Path;
}

/// Snapshot as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;

        let tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary snapshot in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, snapshot).context("Failed to serialize graph snapshot")?;
            writer.flush().context("Failed to write graph snapshot")?;
        }
        tmp.as_file().sync_all().context("Failed to sync graph snapshot")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to move snapshot into place at {}", self.path.display()))?;

        trace!("Saved snapshot with {} songs to {}", snapshot.song_graph.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<GraphSnapshot>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open snapshot {}", self.path.display()))
            }
        };
        let snapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed snapshot {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Snapshot as a JSON document in `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database and its `snapshot` table.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or the table cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        let conn = store.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshot (
                id         INTEGER PRIMARY KEY CHECK (id = 1),
                body       TEXT    NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .with_context(|| format!("Invalid SQL command when creating snapshot table in {}", store.path.display()))?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
        }
        Connection::open(&self.path)
            .with_context(|| format!("Rusqlite DB connection refused. DB location: {}", self.path.display()))
    }
}

impl SnapshotStore for SqliteStore {
    fn save(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let body = serde_json::to_string(snapshot).context("Failed to serialize graph snapshot")?;
        let updated_at = i64::try_from(snapshot.last_updated).unwrap_or(i64::MAX);
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO snapshot (id, body, updated_at) VALUES (1, ?1, ?2)",
            (&body, updated_at),
        )
        .context("Invalid SQL statement when saving snapshot")?;
        tx.commit().context("Committing snapshot transaction failed.")?;
        trace!("Saved snapshot ({} bytes) to {}", body.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<GraphSnapshot>> {
        let conn = self.connect()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM snapshot WHERE id = 1", [], |row| row.get(0))
            .optional()
            .context("Failed to query snapshot table")?;
        body.map(|body| serde_json::from_str(&body).context("Malformed snapshot in database"))
            .transpose()
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Open the store described by `config`.
///
/// # Errors
///
/// Fails if the data directory cannot be resolved or the database cannot be opened.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SnapshotStore>> {
    let path = config.resolved_path()?;
    debug!("Using {:?} snapshot store at {}", config.backend, path.display());
    Ok(match config.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(path)),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(path)?),
    })
}

/// Build an engine from the stored snapshot, or an empty one if there is none or it
/// cannot be read.
#[must_use]
pub fn load_engine(store: &dyn SnapshotStore, config: RankingConfig, clock: Arc<dyn Clock>) -> RankingEngine {
    match store.load() {
        Ok(Some(snapshot)) => RankingEngine::from_snapshot(snapshot, config, clock),
        Ok(None) => {
            info!("No snapshot at {}, starting with an empty graph", store.location().display());
            RankingEngine::with_clock(config, clock)
        }
        Err(e) => {
            error!("Failed to load snapshot, starting with an empty graph: {e:#}");
            RankingEngine::with_clock(config, clock)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::recorder::RelationshipEvent;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn populated_engine() -> RankingEngine {
        let mut engine = RankingEngine::with_clock(RankingConfig::default(), Arc::new(ManualClock::new(1_000)));
        let ids = (0..8).map(|i| format!("s{i}")).collect();
        engine.enqueue_event(RelationshipEvent::Playlist { song_ids: ids, metadata: BTreeMap::new() });
        engine.flush_pending();
        engine.recompute_blocking(true);
        engine
    }

    fn round_trip(store: &dyn SnapshotStore) -> Result<()> {
        assert!(store.load()?.is_none());
        let snapshot = populated_engine().snapshot();
        store.save(&snapshot)?;
        assert_eq!(store.load()?, Some(snapshot.clone()));

        // Second save replaces the first.
        let mut changed = snapshot;
        changed.last_full_calculation = 42;
        store.save(&changed)?;
        assert_eq!(store.load()?, Some(changed));
        Ok(())
    }

    #[test]
    fn test_json_store_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        round_trip(&JsonFileStore::new(dir.path().join("nested/music_graph.json")))
    }

    #[test]
    fn test_sqlite_store_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        round_trip(&SqliteStore::open(dir.path().join("music_graph.db3"))?)
    }

    #[test]
    fn test_json_store_leaves_no_temp_files() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonFileStore::new(dir.path().join("music_graph.json"));
        store.save(&populated_engine().snapshot())?;
        let entries: Vec<_> = fs::read_dir(dir.path())?.collect::<std::io::Result<_>>()?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_malformed_snapshot_yields_empty_engine() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("music_graph.json");
        fs::write(&path, "{\"songGraph\": [1, 2")?;
        let store = JsonFileStore::new(&path);
        assert!(store.load().is_err());

        let engine = load_engine(&store, RankingConfig::default(), Arc::new(ManualClock::new(0)));
        assert!(engine.graph().is_empty());
        Ok(())
    }

    #[test]
    fn test_load_engine_restores_scores() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonFileStore::new(dir.path().join("music_graph.json"));
        let original = populated_engine();
        store.save(&original.snapshot())?;

        let engine = load_engine(&store, RankingConfig::default(), Arc::new(ManualClock::new(1_000)));
        assert_eq!(engine.scores(), original.scores());
        assert_eq!(engine.last_full_recompute(), original.last_full_recompute());
        Ok(())
    }
}
