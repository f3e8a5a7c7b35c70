//! # Ranking Service
//!
//! [`RankingService`] is the shareable handle to a [`RankingEngine`]. It owns the
//! recompute gate: only one recompute runs at a time, and callers arriving while one
//! is in flight wait for it and receive its result instead of starting their own.
//!
//! A forced (full) request that arrives while an incremental run is in flight asks
//! the running caller for exactly one extra full run; every forced waiter returns
//! after that run.
//!
//! The engine lock is held only to plan and to apply a recompute. The iteration
//! itself runs on a frozen copy in chunks of `yield_every_iterations`, yielding the
//! thread between chunks, so record and query calls keep being served.

use crate::db::SnapshotStore;
use crate::engine::{Analytics, FlushReport, RankingEngine, RecomputeReport};
use crate::recommend::{self, Recommendation, UserProfile};
use crate::recorder::RelationshipEvent;
use crate::song::{MetadataPatch, PlaylistInfo, SearchResult, SongId, TrackInfo};
use crate::{algorithm::RecomputeMode, queue};
use log::{debug, error, trace};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    current_is_full: bool,
    rerun_full: bool,
    /// Bumped every time the running caller finishes a pass, run or not.
    generation: u64,
    /// Recomputes that actually ran.
    runs: u64,
    last_report: Option<RecomputeReport>,
}

#[derive(Debug, Default)]
struct RecomputeGate {
    state: Mutex<GateState>,
    done: Condvar,
}

impl RecomputeGate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe handle to the ranking engine.
#[derive(Debug, Clone)]
pub struct RankingService {
    engine: Arc<Mutex<RankingEngine>>,
    gate: Arc<RecomputeGate>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl RankingService {
    #[must_use]
    pub fn new(engine: RankingEngine, store: Option<Arc<dyn SnapshotStore>>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            gate: Arc::new(RecomputeGate::default()),
            store,
        }
    }

    fn lock_engine(&self) -> MutexGuard<'_, RankingEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut RankingEngine) -> R) -> R {
        f(&mut self.lock_engine())
    }

    // ---- façade ----

    pub fn get_score(&self, id: &str) -> f64 {
        self.lock_engine().get_score(id)
    }

    pub fn enhance_results(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        self.lock_engine().enhance_results(query, results)
    }

    pub fn record_play(&self, id: &str, patch: &MetadataPatch) {
        self.lock_engine().record_play(id, patch);
    }

    pub fn record_playlist(&self, playlist: &PlaylistInfo, tracks: &[TrackInfo]) -> Vec<SongId> {
        self.lock_engine().record_playlist(playlist, tracks)
    }

    pub fn record_queue_sequence(&self, tracks: &[TrackInfo]) -> Vec<SongId> {
        self.lock_engine().record_queue_sequence(tracks)
    }

    pub fn enqueue_event(&self, event: RelationshipEvent) {
        self.lock_engine().enqueue_event(event);
    }

    pub fn flush_pending(&self) -> FlushReport {
        self.lock_engine().flush_pending()
    }

    pub fn evict_cache(&self) -> usize {
        self.lock_engine().evict_cache()
    }

    #[must_use]
    pub fn analytics(&self) -> Analytics {
        self.lock_engine().analytics()
    }

    #[must_use]
    pub fn recommend(&self, seeds: &[SongId], profile: &UserProfile, limit: usize) -> Vec<Recommendation> {
        recommend::recommend(&self.lock_engine(), seeds, profile, limit)
    }

    #[must_use]
    pub fn optimize_play_order(&self, tracks: Vec<TrackInfo>, criteria: queue::OrderCriteria) -> Vec<TrackInfo> {
        queue::optimize_play_order(&self.lock_engine(), tracks, criteria)
    }

    // ---- recompute ----

    #[must_use]
    pub fn is_recomputing(&self) -> bool {
        self.gate.lock().running
    }

    /// Number of recomputes that ran through this service.
    #[must_use]
    pub fn completed_runs(&self) -> u64 {
        self.gate.lock().runs
    }

    /// Recompute scores, or join the recompute already in flight.
    ///
    /// Returns `None` when nothing needed recomputing.
    pub fn recompute(&self, force_full: bool) -> Option<RecomputeReport> {
        let mut state = self.gate.lock();
        if state.running {
            let mut target = state.generation + 1;
            if force_full && !state.current_is_full {
                state.rerun_full = true;
                target += 1;
            }
            debug!("Recompute already running, waiting for generation {target}");
            while state.generation < target {
                state = self.gate.done.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            return state.last_report.clone();
        }

        state.running = true;
        state.current_is_full = force_full;
        drop(state);

        let mut force = force_full;
        loop {
            let report = self.run_once(force);
            let mut state = self.gate.lock();
            state.generation += 1;
            if report.is_some() {
                state.runs += 1;
            }
            state.last_report.clone_from(&report);
            self.gate.done.notify_all();

            if state.rerun_full {
                state.rerun_full = false;
                state.current_is_full = true;
                force = true;
                continue;
            }
            state.running = false;
            return report;
        }
    }

    fn run_once(&self, force_full: bool) -> Option<RecomputeReport> {
        let (job, yield_every) = {
            let engine = self.lock_engine();
            (engine.begin_recompute(force_full), engine.config().yield_every_iterations.max(1))
        };
        let mut job = job?;
        if job.mode() == RecomputeMode::Full {
            self.gate.lock().current_is_full = true;
        }

        while !job.step(yield_every) {
            trace!("Yielding after {yield_every} iterations");
            thread::yield_now();
        }

        let report = self.lock_engine().finish_recompute(job);
        self.persist();
        Some(report)
    }

    // ---- maintenance ----

    /// Save a snapshot if a store is attached. Failures are logged; returns whether
    /// a snapshot was written.
    pub fn persist(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let snapshot = self.lock_engine().snapshot();
        match store.save(&snapshot) {
            Ok(()) => {
                debug!("Persisted {} songs to {}", snapshot.song_graph.len(), store.location().display());
                true
            }
            Err(e) => {
                error!("Failed to persist graph snapshot, will retry: {e:#}");
                false
            }
        }
    }

    /// Run the retention sweep; a full recompute follows when songs were removed.
    pub fn sweep_stale_songs(&self) -> usize {
        let removed = self.lock_engine().sweep_stale_songs();
        if removed > 0 {
            self.recompute(true);
        }
        removed
    }
}
