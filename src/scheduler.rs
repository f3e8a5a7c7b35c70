//! # Background Scheduler
//!
//! Runs the periodic maintenance of a [`RankingService`] on one background thread:
//!
//! | Task              | Default period | Condition                                  |
//! |-------------------|----------------|--------------------------------------------|
//! | flush queue       | 30 s           | pending events                             |
//! | incremental       | 30 min         | dirty > 5 and graph > minimum size         |
//! | full recompute    | 6 h            | graph ≥ minimum size                       |
//! | persist snapshot  | 5 min          | store attached                             |
//! | evict cache       | 15 min         | always                                     |
//! | retention sweep   | 24 h           | enabled in settings                        |
//!
//! A flush that leaves more than 10 dirty nodes arms a debounce timer; each further
//! large flush pushes it back. When it fires and no recompute is in flight, an
//! incremental recompute runs.
//!
//! Sleeping happens on a channel receive with timeout, so [`SchedulerHandle::stop`]
//! wakes the thread immediately.

use crate::config::SchedulerConfig;
use crate::service::RankingService;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shortest period a task can run at.
const MIN_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Flush,
    Incremental,
    Full,
    Persist,
    EvictCache,
    Retention,
}

#[derive(Debug)]
struct Periodic {
    task: Task,
    every: Duration,
    next: Instant,
}

/// Timer bookkeeping, separate from the thread so it can be driven in tests.
#[derive(Debug)]
struct Timetable {
    periodic: Vec<Periodic>,
    debounce: Option<Instant>,
    debounce_delay: Duration,
}

impl Timetable {
    fn new(config: &SchedulerConfig, start: Instant) -> Self {
        let mut periodic = vec![
            (Task::Flush, config.flush_interval()),
            (Task::Incremental, config.incremental_interval()),
            (Task::Full, config.full_interval()),
            (Task::Persist, config.persist_interval()),
            (Task::EvictCache, config.cache_eviction_interval()),
        ];
        if config.retention_enabled {
            periodic.push((Task::Retention, config.retention_interval()));
        }
        Self {
            periodic: periodic
                .into_iter()
                .map(|(task, every)| {
                    let every = every.max(MIN_PERIOD);
                    Periodic { task, every, next: start + every }
                })
                .collect(),
            debounce: None,
            debounce_delay: config.debounce_delay(),
        }
    }

    /// Earliest instant something is due.
    fn next_wakeup(&self) -> Option<Instant> {
        self.periodic.iter().map(|p| p.next).chain(self.debounce).min()
    }

    /// Tasks due at `now`, rescheduling each, and whether the debounce timer fired.
    fn take_due(&mut self, now: Instant) -> (Vec<Task>, bool) {
        let mut due = Vec::new();
        for p in &mut self.periodic {
            if p.next <= now {
                due.push(p.task);
                p.next = now + p.every;
            }
        }
        let debounce_fired = self.debounce.is_some_and(|at| at <= now);
        if debounce_fired {
            self.debounce = None;
        }
        (due, debounce_fired)
    }

    fn arm_debounce(&mut self, now: Instant) {
        self.debounce = Some(now + self.debounce_delay);
    }
}

/// Handle to the running scheduler thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for the thread to exit.
    ///
    /// # Errors
    ///
    /// Fails if the scheduler thread panicked.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        // The thread may already be gone; a failed send is fine.
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("Scheduler thread panicked"))?;
            info!("Scheduler stopped");
        }
        Ok(())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{e}");
        }
    }
}

/// Start the background scheduler for `service`.
///
/// # Errors
///
/// Fails if the thread cannot be spawned.
pub fn spawn(service: RankingService, config: SchedulerConfig) -> Result<SchedulerHandle> {
    let (stop, stop_rx) = mpsc::channel::<()>();
    let thread = thread::Builder::new()
        .name("songrank-scheduler".to_string())
        .spawn(move || {
            info!("Scheduler started");
            let mut timetable = Timetable::new(&config, Instant::now());
            loop {
                let timeout = timetable
                    .next_wakeup()
                    .map_or(Duration::from_secs(60), |at| at.saturating_duration_since(Instant::now()));
                match stop_rx.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let now = Instant::now();
                let (due, debounce_fired) = timetable.take_due(now);
                for task in due {
                    if run_task(&service, &config, task) {
                        timetable.arm_debounce(Instant::now());
                    }
                }
                if debounce_fired {
                    run_debounced(&service);
                }
            }
        })
        .context("Failed to spawn scheduler thread")?;

    Ok(SchedulerHandle { stop, thread: Some(thread) })
}

/// The incremental task only runs once the graph has grown past `min_graph_size`.
const fn incremental_due(config: &SchedulerConfig, dirty: usize, size: usize, min_graph_size: usize) -> bool {
    dirty > config.incremental_dirty_threshold && size > min_graph_size
}

/// Run one task. Returns `true` if the debounce timer should be (re)armed.
fn run_task(service: &RankingService, config: &SchedulerConfig, task: Task) -> bool {
    debug!("Running scheduled task {task:?}");
    match task {
        Task::Flush => {
            let report = service.flush_pending();
            let dirty = service.with_engine(|engine| engine.dirty_count());
            return report.events > 0 && dirty > config.debounce_dirty_threshold;
        }
        Task::Incremental => {
            let (dirty, size, min) = service.with_engine(|engine| {
                (engine.dirty_count(), engine.graph().len(), engine.config().min_graph_size)
            });
            if incremental_due(config, dirty, size, min) {
                service.recompute(false);
            }
        }
        Task::Full => {
            service.recompute(true);
        }
        Task::Persist => {
            service.persist();
        }
        Task::EvictCache => {
            service.evict_cache();
        }
        Task::Retention => {
            service.sweep_stale_songs();
        }
    }
    false
}

fn run_debounced(service: &RankingService) {
    if service.is_recomputing() {
        debug!("Debounced recompute skipped, one is already running");
        return;
    }
    if service.with_engine(|engine| engine.dirty_count()) > 0 {
        debug!("Running debounced incremental recompute");
        service.recompute(false);
    }
}
