//! End-to-end scenario execution.
//!
//! One run provisions a database, seeds it, serves the application on an
//! ephemeral port, runs preflight checks, drives the workload and writes
//! reports. Every resource is registered with the cleanup manager as soon
//! as it exists, and cleanup runs exactly once whether the run completed,
//! failed or was interrupted.

use crate::driver::{DriveReport, WorkloadDriver};
use crate::operations::WorkloadContext;
use crate::server::HarnessServer;
use reqbench_app::mint_token;
use reqbench_client::{HarnessClient, HttpTracker};
use reqbench_core::{
    HarnessConfig, HarnessError, HarnessResult, PoolStatsSource, RequestObserver, Scenario, Stage,
};
use reqbench_db::{
    container_teardown_task, DataGenerator, DatabaseBackend, DatabaseTracker, Provisioner, Store,
};
use reqbench_metrics::{
    process_rss_bytes, MetricsCollector, ReportFormat, ResultWriter, RunSummary, RuntimeSnapshot,
};
use reqbench_reliability::{
    priority, CleanupManager, CleanupReport, CleanupTask, MemoryTracker, PreflightCheck,
    PreflightReport, ReliabilityManager,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub scenario: String,
    pub summary: Option<RunSummary>,
    pub drive: Option<DriveReport>,
    pub preflight: Option<PreflightReport>,
    /// Row counts right after seeding, keyed by table.
    pub seeded_counts: BTreeMap<String, u64>,
    pub reports: Vec<PathBuf>,
    pub cleanup: CleanupReport,
    pub error: Option<HarnessError>,
    pub interrupted: bool,
}

impl RunOutcome {
    fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            summary: None,
            drive: None,
            preflight: None,
            seeded_counts: BTreeMap::new(),
            reports: Vec::new(),
            cleanup: CleanupReport::default(),
            error: None,
            interrupted: false,
        }
    }

    /// The workload ran to completion and every required cleanup task
    /// succeeded. Per-request errors do not count against a run.
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.error.is_none() && !self.cleanup.failed_required
    }

    /// 0 on success, 130 when interrupted, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            130
        } else if self.is_success() {
            0
        } else {
            1
        }
    }
}

pub struct ScenarioRunner {
    config: HarnessConfig,
    backend: DatabaseBackend,
    extra_preflight: Vec<PreflightCheck>,
}

impl ScenarioRunner {
    pub fn new(config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let backend = DatabaseBackend::from_config(&config.database)?;
        Ok(Self {
            config,
            backend,
            extra_preflight: Vec::new(),
        })
    }

    /// Registers a check that runs after the built-in ones.
    #[must_use]
    pub fn with_preflight(mut self, check: PreflightCheck) -> Self {
        self.extra_preflight.push(check);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub async fn run(&self, scenario: &Scenario) -> RunOutcome {
        self.run_until(scenario, std::future::pending()).await
    }

    /// Runs `scenario`, abandoning the workload as soon as `shutdown`
    /// resolves. Cleanup runs either way.
    pub async fn run_until<F>(&self, scenario: &Scenario, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        let mut outcome = RunOutcome::new(&scenario.name);
        if let Err(err) = scenario.validate() {
            error!(scenario = %scenario.name, error = %err, "invalid scenario");
            outcome.error = Some(err);
            return outcome;
        }

        let reliability = Arc::new(ReliabilityManager::from_config(&self.config.reliability));
        reliability.apply_overrides(&scenario.reliability_overrides);
        let cleanup = CleanupManager::new(
            Some(Arc::clone(reliability.reclaimer())),
            self.config.metrics.cleanup_reclaim_cycles,
            reliability.timeout_for(Stage::Cleanup),
        );

        info!(
            scenario = %scenario.name,
            backend = %self.backend,
            dataset = %scenario.dataset_size,
            workload = scenario.workload.name(),
            concurrency = scenario.concurrency_target,
            "starting scenario"
        );

        let result = tokio::select! {
            result = self.execute(scenario, &reliability, &cleanup, &mut outcome) => Some(result),
            () = shutdown => None,
        };

        match result {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                error!(scenario = %scenario.name, error = %err, "scenario failed");
                outcome.error = Some(err);
            }
            None => {
                warn!(scenario = %scenario.name, "interrupted, cleaning up");
                outcome.interrupted = true;
            }
        }

        outcome.cleanup = cleanup.execute_cleanup().await;
        if outcome.cleanup.failed_required {
            error!(scenario = %scenario.name, "required cleanup task failed");
        }

        info!(
            scenario = %scenario.name,
            exit_code = outcome.exit_code(),
            cleanup_ms = outcome.cleanup.elapsed.as_millis() as u64,
            "scenario finished"
        );
        outcome
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        reliability: &Arc<ReliabilityManager>,
        cleanup: &CleanupManager,
        outcome: &mut RunOutcome,
    ) -> HarnessResult<()> {
        let db = Provisioner::new(self.config.database.clone(), Arc::clone(reliability))
            .provision(&self.backend)
            .await?;
        cleanup.add_cleanup_task(container_teardown_task(Arc::clone(&db.teardown)));
        cleanup.add_resource_tracker(Arc::new(DatabaseTracker::new(Arc::clone(&db.store))));
        if let Some(pool) = &db.pool {
            reliability.attach_pool_stats(Arc::clone(pool) as Arc<dyn PoolStatsSource>);
        }
        {
            let reliability = Arc::clone(reliability);
            cleanup.add_cleanup_task(CleanupTask::new(
                "resource-monitor",
                priority::MONITOR,
                move || async move {
                    reliability.monitor().stop().await;
                    reliability.detach_pool_stats();
                    Ok(())
                },
            ));
        }
        let backend = db.store.backend();
        reliability.reclaimer().register("database", move || async move {
            debug!(backend, "database reclaim hook has nothing to release on a live pool");
        });

        let mut generator = DataGenerator::new(Arc::clone(&db.store), scenario.seed)
            .simplified(reliability.is_simplified_data());
        let seed = reliability
            .execute_with_timeout(Stage::Database, "seed", async {
                generator
                    .generate(scenario.dataset_size)
                    .await
                    .map_err(HarnessError::from)
            })
            .await?;
        outcome.seeded_counts = db.store.counts().await?;
        info!(
            dataset = %scenario.dataset_size,
            epics = seed.epics.len(),
            requirements = seed.requirements.len(),
            relationships = seed.relationships,
            elapsed_ms = seed.elapsed.as_millis() as u64,
            "dataset seeded"
        );

        let server = HarnessServer::start(Arc::clone(&db.store), &self.config).await?;
        cleanup.add_cleanup_task(server.cleanup_task());

        let collector = Arc::new(MetricsCollector::new(
            self.config.metrics.slow_request_threshold(),
        ));
        let client = Arc::new(
            HarnessClient::new(
                server.base_url(),
                self.config.client.clone(),
                Arc::clone(reliability),
            )?
            .with_observer(Arc::clone(&collector) as Arc<dyn RequestObserver>),
        );
        let http = HttpTracker::new();
        http.track(Arc::clone(&client));
        cleanup.add_resource_tracker(Arc::new(http));
        {
            let client = Arc::downgrade(&client);
            reliability.reclaimer().register("http-client", move || {
                let client = client.clone();
                async move {
                    let Some(client) = client.upgrade() else {
                        return;
                    };
                    if client.is_closed() {
                        return;
                    }
                    if let Err(err) = client.reset_pool() {
                        debug!(error = %err, "http client pool reset failed");
                    }
                }
            });
        }
        cleanup.add_resource_tracker(Arc::new(MemoryTracker::new(Arc::clone(
            reliability.reclaimer(),
        ))));

        let identity = &scenario.auth_identity;
        let token = mint_token(
            &self.config.auth,
            identity.user_id.unwrap_or(db.system_user),
            &identity.username,
        )
        .map_err(|e| HarnessError::config(e.to_string()))?;
        client.set_token(token);

        self.register_preflight(reliability, &db.store, &server, &client);
        let preflight = reliability.run_preflight().await;
        outcome.preflight = Some(preflight.clone());
        if let Some(err) = preflight.required_failure() {
            return Err(err);
        }
        if preflight.optional_failures() > 0 {
            warn!(
                failed = preflight.optional_failures(),
                "optional preflight checks failed, continuing"
            );
        }

        reliability.monitor().start();

        let context = WorkloadContext::new(Arc::clone(&db.store), &seed)
            .simplified(reliability.is_simplified_data());
        let driver = WorkloadDriver::new(
            Arc::clone(&client),
            Arc::clone(&collector),
            Arc::clone(reliability),
            context,
            self.config.metrics.sample_channel_capacity,
            self.config.server.shutdown_grace(),
        );

        let reserved = driver.prepare(scenario).await?;
        if reserved > 0 {
            debug!(reserved, "disposable rows created before measurement");
        }

        collector.start_measurement(
            scenario.name.as_str(),
            db.store.pool_stats(),
            RuntimeSnapshot::capture(Some(reliability.reclaimer().as_ref())),
        );
        let drive = driver.drive(scenario).await?;
        let summary = collector.end_measurement(
            db.store.pool_stats(),
            RuntimeSnapshot::capture(Some(reliability.reclaimer().as_ref())),
        );
        outcome.drive = Some(drive);

        let writer = ResultWriter::new(summary.clone());
        for raw in &self.config.output.formats {
            let format: ReportFormat = raw.parse().map_err(HarnessError::config)?;
            let path = writer.write_report(&self.config.output.dir, format)?;
            info!(path = %path.display(), "report written");
            outcome.reports.push(path);
        }
        outcome.summary = Some(summary);

        Ok(())
    }

    fn register_preflight(
        &self,
        reliability: &ReliabilityManager,
        store: &Arc<dyn Store>,
        server: &Arc<HarnessServer>,
        client: &Arc<HarnessClient>,
    ) {
        let registry = reliability.preflight();

        let store = Arc::clone(store);
        registry.register(PreflightCheck::required("database-reachable", move || {
            let store = Arc::clone(&store);
            async move { store.ping().await.map_err(HarnessError::from) }
        }));

        let server = Arc::clone(server);
        registry.register(PreflightCheck::required("server-health", move || {
            let server = Arc::clone(&server);
            async move { server.check_health().await }
        }));

        let client = Arc::clone(client);
        registry.register(PreflightCheck::optional("token-present", move || {
            let present = client.has_token();
            async move {
                if present {
                    Ok(())
                } else {
                    Err(HarnessError::config("no bearer token configured"))
                }
            }
        }));

        let warning_mb = self.config.reliability.monitor.memory_warning_mb;
        registry.register(PreflightCheck::optional("memory-headroom", move || async move {
            let rss_mb = process_rss_bytes() as f64 / BYTES_PER_MB;
            if rss_mb < warning_mb {
                Ok(())
            } else {
                Err(HarnessError::ResourceExhaustion(format!(
                    "rss {rss_mb:.0} MB is above the {warning_mb:.0} MB warning threshold"
                )))
            }
        }));

        for check in &self.extra_preflight {
            registry.register(check.clone());
        }
    }
}
