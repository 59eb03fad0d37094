//! Workload execution: request-count batches for fixed and ratio mixes,
//! worker pools for sustained load, and periodic fan-out bursts.

use crate::operations::WorkloadContext;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reqbench_client::HarnessClient;
use reqbench_core::{
    HarnessResult, MetricSample, OpClass, RequestRecord, ResponseRecord, Scenario, WorkloadShape,
};
use reqbench_metrics::MetricsCollector;
use reqbench_reliability::{panic_message, ReliabilityManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Request-count workloads are issued in slices of this many slots.
const BATCH_SLOTS: usize = 1024;

/// Pause before a worker re-checks a skipped op class.
const SKIP_BACKOFF: Duration = Duration::from_millis(10);

/// Disposable epics reserved per worker for timed workloads that delete.
const TIMED_DELETE_RESERVE: usize = 64;

/// Operation for `slot` of a request-count workload.
fn counted_op(shape: &WorkloadShape, slot: usize) -> Option<OpClass> {
    match shape {
        WorkloadShape::FixedMix { ops } => ops.get(slot % ops.len().max(1)).copied(),
        WorkloadShape::ReadWriteRatio {
            read_ratio,
            reads,
            writes,
        } => {
            let set = if ((slot % 100) as f64 / 100.0) < *read_ratio {
                reads
            } else {
                writes
            };
            set.get(slot % set.len().max(1)).copied()
        }
        WorkloadShape::Sustained { .. } | WorkloadShape::BurstOverlay { .. } => None,
    }
}

/// What the driver did, independent of response outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveReport {
    /// Requests handed to the client.
    pub issued: u64,
    /// Slots not issued because degradation skipped their op class.
    pub skipped: u64,
    /// Attempts across all issued requests, retries included.
    pub attempts: u64,
    /// Samples lost to a full sample channel.
    pub dropped: u64,
    pub bursts: u64,
    pub effective_concurrency: usize,
}

impl DriveReport {
    fn merge(&mut self, other: &DriveReport) {
        self.issued += other.issued;
        self.skipped += other.skipped;
        self.attempts += other.attempts;
        self.dropped += other.dropped;
        self.bursts += other.bursts;
    }
}

pub struct WorkloadDriver {
    client: Arc<HarnessClient>,
    collector: Arc<MetricsCollector>,
    reliability: Arc<ReliabilityManager>,
    context: Arc<WorkloadContext>,
    sample_capacity: usize,
    grace: Duration,
}

impl WorkloadDriver {
    pub fn new(
        client: Arc<HarnessClient>,
        collector: Arc<MetricsCollector>,
        reliability: Arc<ReliabilityManager>,
        context: WorkloadContext,
        sample_capacity: usize,
        grace: Duration,
    ) -> Self {
        Self {
            client,
            collector,
            reliability,
            context: Arc::new(context),
            sample_capacity: sample_capacity.max(1),
            grace,
        }
    }

    /// Runs the scenario's workload to completion and records every
    /// response in the collector.
    pub async fn drive(&self, scenario: &Scenario) -> HarnessResult<DriveReport> {
        let concurrency = self
            .reliability
            .adjust_concurrency_for_constraints(scenario.concurrency_target);
        if concurrency < scenario.concurrency_target {
            warn!(
                requested = scenario.concurrency_target,
                effective = concurrency,
                "concurrency reduced under resource pressure"
            );
        }

        let mut report = match &scenario.workload {
            shape @ (WorkloadShape::FixedMix { .. } | WorkloadShape::ReadWriteRatio { .. }) => {
                let pick = |slot: usize| counted_op(shape, slot);
                self.drive_counted(scenario.request_count, concurrency, pick).await?
            }
            WorkloadShape::Sustained { ops } => {
                let duration = scenario.duration.unwrap_or_default();
                self.drive_timed(ops, None, concurrency, duration, scenario.seed).await?
            }
            WorkloadShape::BurstOverlay {
                steady,
                burst_ops,
                burst_size,
                burst_delay,
            } => {
                let duration = scenario.duration.unwrap_or_default();
                let burst = BurstPlan {
                    ops: burst_ops.clone(),
                    size: *burst_size,
                    delay: *burst_delay,
                };
                self.drive_timed(steady, Some(burst), concurrency, duration, scenario.seed)
                    .await?
            }
        };

        report.effective_concurrency = concurrency;
        info!(
            scenario = %scenario.name,
            workload = scenario.workload.name(),
            issued = report.issued,
            skipped = report.skipped,
            dropped = report.dropped,
            bursts = report.bursts,
            "workload finished"
        );
        Ok(report)
    }

    /// Creates the rows the workload will delete so that happens before
    /// the measurement window opens. Returns how many were reserved.
    pub async fn prepare(&self, scenario: &Scenario) -> HarnessResult<usize> {
        let deletes = match &scenario.workload {
            shape @ (WorkloadShape::FixedMix { .. } | WorkloadShape::ReadWriteRatio { .. }) => {
                (0..scenario.request_count)
                    .filter(|slot| counted_op(shape, *slot) == Some(OpClass::DeleteEpic))
                    .count()
            }
            WorkloadShape::Sustained { ops } | WorkloadShape::BurstOverlay { steady: ops, .. } => {
                let deletes_in_burst = matches!(
                    &scenario.workload,
                    WorkloadShape::BurstOverlay { burst_ops, .. } if burst_ops.contains(&OpClass::DeleteEpic)
                );
                if ops.contains(&OpClass::DeleteEpic) || deletes_in_burst {
                    scenario.concurrency_target * TIMED_DELETE_RESERVE
                } else {
                    0
                }
            }
        };
        if deletes > 0 {
            self.context.reserve_disposable_epics(deletes).await?;
        }
        Ok(deletes)
    }

    async fn drive_counted(
        &self,
        total: usize,
        concurrency: usize,
        pick: impl Fn(usize) -> Option<OpClass>,
    ) -> HarnessResult<DriveReport> {
        let mut report = DriveReport::default();
        let mut start = 0;

        while start < total {
            let end = (start + BATCH_SLOTS).min(total);
            let mut ops = Vec::with_capacity(end - start);
            let mut requests = Vec::with_capacity(end - start);

            for slot in start..end {
                let Some(op) = pick(slot) else {
                    continue;
                };
                if self.reliability.should_skip_operation(op) {
                    report.skipped += 1;
                    continue;
                }
                requests.push(self.context.build(op, slot).await?);
                ops.push(op);
            }

            debug!(from = start, to = end, requests = requests.len(), "issuing batch");
            let responses = self.client.run_parallel(requests, concurrency).await;
            report.merge(&record_all(&self.collector, &ops, &responses));
            start = end;
        }

        Ok(report)
    }

    async fn drive_timed(
        &self,
        ops: &[OpClass],
        burst: Option<BurstPlan>,
        concurrency: usize,
        duration: Duration,
        seed: u64,
    ) -> HarnessResult<DriveReport> {
        if duration.is_zero() {
            return Ok(DriveReport::default());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (sample_tx, mut sample_rx) = mpsc::channel::<MetricSample>(self.sample_capacity);
        let next_slot = Arc::new(AtomicUsize::new(0));

        let collector = Arc::clone(&self.collector);
        let sink = tokio::spawn(async move {
            while let Some(sample) = sample_rx.recv().await {
                collector.record_sample(sample);
            }
        });

        let mut workers: JoinSet<HarnessResult<DriveReport>> = JoinSet::new();
        for worker in 0..concurrency {
            let mut order = ops.to_vec();
            order.shuffle(&mut StdRng::seed_from_u64(seed.wrapping_add(worker as u64)));
            let steady = SteadyWorker {
                id: worker,
                ops: order,
                client: Arc::clone(&self.client),
                reliability: Arc::clone(&self.reliability),
                context: Arc::clone(&self.context),
                samples: sample_tx.clone(),
                next_slot: Arc::clone(&next_slot),
                stop: stop_rx.clone(),
            };
            workers.spawn(steady.run());
        }
        if let Some(plan) = burst {
            let bursts = BurstWorker {
                plan,
                client: Arc::clone(&self.client),
                collector: Arc::clone(&self.collector),
                reliability: Arc::clone(&self.reliability),
                context: Arc::clone(&self.context),
                next_slot: Arc::clone(&next_slot),
                stop: stop_rx.clone(),
            };
            workers.spawn(bursts.run());
        }
        drop(sample_tx);
        drop(stop_rx);

        sleep(duration).await;
        let _ = stop_tx.send(true);

        let mut report = DriveReport::default();
        let mut first_error = None;
        let deadline = Instant::now() + self.grace;
        loop {
            match timeout_at(deadline, workers.join_next()).await {
                Ok(Some(Ok(Ok(tally)))) => report.merge(&tally),
                Ok(Some(Ok(Err(err)))) => {
                    warn!(error = %err, "workload worker failed");
                    first_error.get_or_insert(err);
                }
                Ok(Some(Err(join_err))) if join_err.is_panic() => {
                    warn!(panic = %panic_message(join_err.into_panic()), "workload worker panicked");
                }
                Ok(Some(Err(_))) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = workers.len(),
                        grace_ms = self.grace.as_millis() as u64,
                        "workers outlived the grace window, aborting"
                    );
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}
                    break;
                }
            }
        }

        if let Err(err) = sink.await {
            warn!(error = %err, "sample sink ended abnormally");
        }
        self.collector.record_dropped(report.dropped);
        if report.dropped > 0 {
            warn!(dropped = report.dropped, "sample channel overflowed");
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

fn record_all(collector: &MetricsCollector, ops: &[OpClass], responses: &[ResponseRecord]) -> DriveReport {
    let mut report = DriveReport::default();
    for (op, response) in ops.iter().zip(responses) {
        report.issued += 1;
        report.attempts += u64::from(response.attempts);
        collector.record_sample(MetricSample::classify(*op, response));
    }
    report
}

struct SteadyWorker {
    id: usize,
    ops: Vec<OpClass>,
    client: Arc<HarnessClient>,
    reliability: Arc<ReliabilityManager>,
    context: Arc<WorkloadContext>,
    samples: mpsc::Sender<MetricSample>,
    next_slot: Arc<AtomicUsize>,
    stop: watch::Receiver<bool>,
}

impl SteadyWorker {
    async fn run(self) -> HarnessResult<DriveReport> {
        let mut tally = DriveReport::default();
        let mut cursor = 0usize;

        while !*self.stop.borrow() {
            let op = self.ops[cursor % self.ops.len()];
            cursor += 1;

            if self.reliability.should_skip_operation(op) {
                tally.skipped += 1;
                sleep(SKIP_BACKOFF).await;
                continue;
            }

            let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
            let request = self.context.build(op, slot).await?;
            let response = self.client.execute(&request).await;
            tally.issued += 1;
            tally.attempts += u64::from(response.attempts);

            if self.samples.try_send(MetricSample::classify(op, &response)).is_err() {
                tally.dropped += 1;
            }
        }

        debug!(worker = self.id, issued = tally.issued, "worker stopped");
        Ok(tally)
    }
}

struct BurstPlan {
    ops: Vec<OpClass>,
    size: usize,
    delay: Duration,
}

/// Fires `size` concurrent requests every `delay` until stopped.
struct BurstWorker {
    plan: BurstPlan,
    client: Arc<HarnessClient>,
    collector: Arc<MetricsCollector>,
    reliability: Arc<ReliabilityManager>,
    context: Arc<WorkloadContext>,
    next_slot: Arc<AtomicUsize>,
    stop: watch::Receiver<bool>,
}

impl BurstWorker {
    async fn run(mut self) -> HarnessResult<DriveReport> {
        let mut tally = DriveReport::default();
        let mut ticker = interval_at(Instant::now() + self.plan.delay, self.plan.delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.stop.borrow() {
                break;
            }
            // None once the stop sender is gone.
            let due = tokio::select! {
                _ = ticker.tick() => Some(true),
                changed = self.stop.changed() => changed.ok().map(|()| false),
            };
            match due {
                Some(true) => {
                    let fired = self.fire().await?;
                    tally.merge(&fired);
                    tally.bursts += 1;
                }
                Some(false) => {}
                None => break,
            }
        }

        debug!(bursts = tally.bursts, issued = tally.issued, "burst worker stopped");
        Ok(tally)
    }

    async fn fire(&self) -> HarnessResult<DriveReport> {
        let mut ops = Vec::with_capacity(self.plan.size);
        let mut requests: Vec<RequestRecord> = Vec::with_capacity(self.plan.size);
        let mut skipped = 0;

        for i in 0..self.plan.size {
            let op = self.plan.ops[i % self.plan.ops.len()];
            if self.reliability.should_skip_operation(op) {
                skipped += 1;
                continue;
            }
            let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
            requests.push(self.context.build(op, slot).await?);
            ops.push(op);
        }

        debug!(size = requests.len(), "burst fired");
        let responses = self.client.run_parallel(requests, self.plan.size).await;
        let mut fired = record_all(&self.collector, &ops, &responses);
        fired.skipped = skipped;
        Ok(fired)
    }
}
