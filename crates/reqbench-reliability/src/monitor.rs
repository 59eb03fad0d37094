//! Resource monitor and graceful degradation.
//!
//! # States
//!
//! Each signal moves independently through `Normal → Warning → Critical`.
//! Entering `Critical` adds the signal to the trigger set of every
//! degradation knob it drives; leaving `Critical` removes it. A knob is
//! active while its trigger set is non-empty, so recovery of one signal only
//! clears the knobs no other critical signal still holds.

use parking_lot::{Mutex, RwLock};
use reqbench_core::{HarnessError, MonitorConfig, PoolStatsSource};
use reqbench_metrics::{ProcessSampler, Reclaimer};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Sampled resource signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    MemoryMb,
    Tasks,
    DbConnections,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Self::MemoryMb, Self::Tasks, Self::DbConnections];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryMb => "memory_mb",
            Self::Tasks => "tasks",
            Self::DbConnections => "db_connections",
        }
    }

    /// Knobs this signal activates when it turns critical.
    fn knobs(&self) -> &'static [Knob] {
        match self {
            Self::MemoryMb => &[
                Knob::ReduceConcurrency,
                Knob::SkipNonEssential,
                Knob::ForceReclaim,
                Knob::SimplifiedData,
            ],
            Self::Tasks => &[
                Knob::ReduceConcurrency,
                Knob::SkipNonEssential,
                Knob::ForceReclaim,
            ],
            Self::DbConnections => &[Knob::ReduceConcurrency, Knob::SkipNonEssential],
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Knob {
    ReduceConcurrency,
    SkipNonEssential,
    ForceReclaim,
    SimplifiedData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub fn level(&self, value: f64) -> Level {
        if value >= self.critical {
            Level::Critical
        } else if value >= self.warning {
            Level::Warning
        } else {
            Level::Normal
        }
    }
}

/// One sample of every signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceReading {
    pub memory_mb: f64,
    pub tasks: f64,
    pub db_connections: f64,
}

impl ResourceReading {
    pub fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::MemoryMb => self.memory_mb,
            Signal::Tasks => self.tasks,
            Signal::DbConnections => self.db_connections,
        }
    }
}

/// Active graceful-degradation knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DegradationConfig {
    pub reduce_concurrency: bool,
    pub skip_non_essential: bool,
    pub force_reclaim: bool,
    pub simplified_data: bool,
}

impl DegradationConfig {
    pub fn is_active(&self) -> bool {
        self.reduce_concurrency || self.skip_non_essential || self.force_reclaim || self.simplified_data
    }
}

/// A level change for one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub signal: Signal,
    pub from: Level,
    pub to: Level,
    pub value: f64,
}

/// Source of resource readings.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceReading;
}

/// Probe over the current process: heap, live tokio tasks and the attached
/// connection pool.
#[derive(Default)]
pub struct ProcessProbe {
    pool: RwLock<Option<Arc<dyn PoolStatsSource>>>,
    sampler: ProcessSampler,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_pool(&self, pool: Arc<dyn PoolStatsSource>) {
        *self.pool.write() = Some(pool);
    }

    pub fn detach_pool(&self) {
        *self.pool.write() = None;
    }
}

impl ResourceProbe for ProcessProbe {
    fn sample(&self) -> ResourceReading {
        let runtime = self.sampler.snapshot(None);
        let db_connections = self
            .pool
            .read()
            .as_ref()
            .map_or(0.0, |pool| f64::from(pool.pool_stats().open));

        ResourceReading {
            memory_mb: runtime.heap_mb(),
            tasks: runtime.alive_tasks as f64,
            db_connections,
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    levels: BTreeMap<Signal, Level>,
    triggers: BTreeMap<Knob, BTreeSet<Signal>>,
    last_reading: Option<ResourceReading>,
}

impl MonitorState {
    fn level(&self, signal: Signal) -> Level {
        self.levels.get(&signal).copied().unwrap_or_default()
    }

    fn knob_active(&self, knob: Knob) -> bool {
        self.triggers.get(&knob).is_some_and(|set| !set.is_empty())
    }

    fn degradation(&self) -> DegradationConfig {
        DegradationConfig {
            reduce_concurrency: self.knob_active(Knob::ReduceConcurrency),
            skip_non_essential: self.knob_active(Knob::SkipNonEssential),
            force_reclaim: self.knob_active(Knob::ForceReclaim),
            simplified_data: self.knob_active(Knob::SimplifiedData),
        }
    }

    fn set_level(&mut self, signal: Signal, to: Level) {
        let from = self.level(signal);
        self.levels.insert(signal, to);

        if to == Level::Critical && from != Level::Critical {
            for knob in signal.knobs() {
                self.triggers.entry(*knob).or_default().insert(signal);
            }
        } else if from == Level::Critical && to != Level::Critical {
            for knob in signal.knobs() {
                if let Some(set) = self.triggers.get_mut(knob) {
                    set.remove(&signal);
                }
            }
        }
    }
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic sampler driving the degradation state machine.
pub struct ResourceMonitor {
    config: MonitorConfig,
    thresholds: BTreeMap<Signal, Thresholds>,
    probe: Arc<dyn ResourceProbe>,
    reclaimer: Option<Arc<Reclaimer>>,
    state: Mutex<MonitorState>,
    running: Mutex<Option<Running>>,
}

impl ResourceMonitor {
    pub fn new(
        config: MonitorConfig,
        probe: Arc<dyn ResourceProbe>,
        reclaimer: Option<Arc<Reclaimer>>,
    ) -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            Signal::MemoryMb,
            Thresholds {
                warning: config.memory_warning_mb,
                critical: config.memory_critical_mb,
            },
        );
        thresholds.insert(
            Signal::Tasks,
            Thresholds {
                warning: config.tasks_warning,
                critical: config.tasks_critical,
            },
        );
        thresholds.insert(
            Signal::DbConnections,
            Thresholds {
                warning: config.db_connections_warning,
                critical: config.db_connections_critical,
            },
        );

        Self {
            config,
            thresholds,
            probe,
            reclaimer,
            state: Mutex::new(MonitorState::default()),
            running: Mutex::new(None),
        }
    }

    pub fn thresholds(&self, signal: Signal) -> Option<Thresholds> {
        self.thresholds.get(&signal).copied()
    }

    pub fn level(&self, signal: Signal) -> Level {
        self.state.lock().level(signal)
    }

    /// Highest level across all signals.
    pub fn overall_level(&self) -> Level {
        let state = self.state.lock();
        Signal::ALL
            .into_iter()
            .map(|s| state.level(s))
            .max()
            .unwrap_or_default()
    }

    pub fn degradation(&self) -> DegradationConfig {
        self.state.lock().degradation()
    }

    pub fn last_reading(&self) -> Option<ResourceReading> {
        self.state.lock().last_reading
    }

    /// Applies one reading and returns the signals whose level changed.
    pub fn evaluate(&self, reading: ResourceReading) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let before = {
            let mut state = self.state.lock();
            let before = state.degradation();
            state.last_reading = Some(reading);

            for signal in Signal::ALL {
                let Some(thresholds) = self.thresholds.get(&signal) else {
                    continue;
                };
                let value = reading.get(signal);
                let from = state.level(signal);
                let to = thresholds.level(value);
                if from != to {
                    state.set_level(signal, to);
                    transitions.push(Transition {
                        signal,
                        from,
                        to,
                        value,
                    });
                }
            }
            before
        };

        for t in &transitions {
            self.log_transition(t);
        }
        self.log_degradation_change(before);
        transitions
    }

    /// Drives `signal` straight to `Critical`, as if a reading had crossed
    /// its threshold.
    pub fn force_critical(&self, signal: Signal) -> Option<Transition> {
        let (transition, before) = {
            let mut state = self.state.lock();
            let before = state.degradation();
            let from = state.level(signal);
            if from == Level::Critical {
                return None;
            }
            state.set_level(signal, Level::Critical);
            let value = self.thresholds.get(&signal).map_or(0.0, |t| t.critical);
            (
                Transition {
                    signal,
                    from,
                    to: Level::Critical,
                    value,
                },
                before,
            )
        };

        self.log_transition(&transition);
        self.log_degradation_change(before);
        Some(transition)
    }

    /// Returns `signal` to `Normal`, clearing whatever it was holding.
    pub fn clear(&self, signal: Signal) -> Option<Transition> {
        let (transition, before) = {
            let mut state = self.state.lock();
            let before = state.degradation();
            let from = state.level(signal);
            if from == Level::Normal {
                return None;
            }
            state.set_level(signal, Level::Normal);
            (
                Transition {
                    signal,
                    from,
                    to: Level::Normal,
                    value: 0.0,
                },
                before,
            )
        };

        self.log_transition(&transition);
        self.log_degradation_change(before);
        Some(transition)
    }

    fn log_transition(&self, t: &Transition) {
        match t.to {
            Level::Critical => {
                let err = HarnessError::ResourceExhaustion(format!(
                    "{} at {:.1} crossed critical threshold",
                    t.signal, t.value
                ));
                warn!(signal = %t.signal, value = t.value, error = %err, "resource critical, degrading");
            }
            Level::Warning => {
                warn!(signal = %t.signal, value = t.value, from = ?t.from, "resource warning");
            }
            Level::Normal => {
                info!(signal = %t.signal, value = t.value, from = ?t.from, "resource back to normal");
            }
        }
    }

    fn log_degradation_change(&self, before: DegradationConfig) {
        let after = self.degradation();
        if before != after {
            warn!(
                reduce_concurrency = after.reduce_concurrency,
                skip_non_essential = after.skip_non_essential,
                force_reclaim = after.force_reclaim,
                simplified_data = after.simplified_data,
                "degradation changed"
            );
        }
    }

    /// Samples the probe once and applies the reading. Runs a reclaim cycle
    /// when forced reclaim has just become active.
    pub async fn tick(&self) -> Vec<Transition> {
        let was_reclaiming = self.degradation().force_reclaim;
        let reading = self.probe.sample();
        let transitions = self.evaluate(reading);

        if !was_reclaiming && self.degradation().force_reclaim {
            if let Some(reclaimer) = &self.reclaimer {
                let cycle = reclaimer.reclaim().await;
                info!(
                    pause_us = cycle.pause.as_micros() as u64,
                    bytes_freed = cycle.bytes_freed,
                    "forced reclaim cycle"
                );
            }
        }

        transitions
    }

    /// Starts periodic sampling. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let period = self.config.interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.tick().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("resource monitor stopped");
        });

        *running = Some(Running { stop, handle });
        debug!(interval_ms = period.as_millis() as u64, "resource monitor started");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stops sampling and waits for the sampler task to exit.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { stop, handle }) = running {
            let _ = stop.send(true);
            if let Err(err) = handle.await {
                warn!(error = %err, "resource monitor task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Mutex<ResourceReading>);

    impl ResourceProbe for FixedProbe {
        fn sample(&self) -> ResourceReading {
            *self.0.lock()
        }
    }

    fn monitor() -> ResourceMonitor {
        ResourceMonitor::new(
            MonitorConfig::default(),
            Arc::new(FixedProbe(Mutex::new(ResourceReading::default()))),
            None,
        )
    }

    #[test]
    fn test_levels_are_edge_triggered() {
        let monitor = monitor();
        let warm = ResourceReading {
            memory_mb: 1500.0,
            ..Default::default()
        };

        let first = monitor.evaluate(warm);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].to, Level::Warning);

        // Same reading again: no transition.
        assert!(monitor.evaluate(warm).is_empty());
        assert!(!monitor.degradation().is_active());
    }

    #[test]
    fn test_critical_memory_sets_every_knob() {
        let monitor = monitor();
        monitor.evaluate(ResourceReading {
            memory_mb: 4096.0,
            ..Default::default()
        });

        let degradation = monitor.degradation();
        assert!(degradation.reduce_concurrency);
        assert!(degradation.skip_non_essential);
        assert!(degradation.force_reclaim);
        assert!(degradation.simplified_data);
        assert_eq!(monitor.overall_level(), Level::Critical);
    }

    #[test]
    fn test_recovery_clears_only_released_knobs() {
        let monitor = monitor();
        monitor.evaluate(ResourceReading {
            memory_mb: 4096.0,
            db_connections: 25.0,
            ..Default::default()
        });

        // Memory recovers, db connections stay critical.
        monitor.evaluate(ResourceReading {
            memory_mb: 100.0,
            db_connections: 25.0,
            ..Default::default()
        });

        let degradation = monitor.degradation();
        assert!(degradation.reduce_concurrency);
        assert!(degradation.skip_non_essential);
        assert!(!degradation.force_reclaim);
        assert!(!degradation.simplified_data);

        monitor.evaluate(ResourceReading::default());
        assert!(!monitor.degradation().is_active());
        assert_eq!(monitor.overall_level(), Level::Normal);
    }

    #[test]
    fn test_force_critical_and_clear() {
        let monitor = monitor();
        assert!(monitor.force_critical(Signal::Tasks).is_some());
        assert!(monitor.force_critical(Signal::Tasks).is_none());
        assert!(monitor.degradation().force_reclaim);
        assert!(!monitor.degradation().simplified_data);

        monitor.clear(Signal::Tasks);
        assert!(!monitor.degradation().is_active());
    }

    #[tokio::test]
    async fn test_tick_reclaims_on_entry() {
        let reclaimer = Arc::new(Reclaimer::new());
        let probe = Arc::new(FixedProbe(Mutex::new(ResourceReading {
            tasks: 20_000.0,
            ..Default::default()
        })));
        let monitor = ResourceMonitor::new(MonitorConfig::default(), probe, Some(Arc::clone(&reclaimer)));

        monitor.tick().await;
        monitor.tick().await;

        assert_eq!(reclaimer.cycles(), 1);
    }

    #[tokio::test]
    async fn test_process_readings_repeat() {
        let process = ProcessProbe::new();
        let first = process.sample();
        let second = process.sample();

        assert!(first.memory_mb > 0.0);
        assert!(second.memory_mb > 0.0);
        assert_eq!(second.db_connections, 0.0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let config = MonitorConfig {
            interval_ms: 10,
            ..MonitorConfig::default()
        };
        let monitor = Arc::new(ResourceMonitor::new(config, Arc::new(ProcessProbe::new()), None));

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        monitor.stop().await;

        assert!(!monitor.is_running());
        assert!(monitor.last_reading().is_some());
    }
}
