//! In-process server for the application under test.

use parking_lot::Mutex;
use reqbench_app::{build_router, AppConfig, AppState, HEALTH_PATH};
use reqbench_core::{HarnessConfig, HarnessError, HarnessResult, ServerConfig, Stage};
use reqbench_db::Store;
use reqbench_reliability::{priority, CleanupTask};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

type ServeHandle = JoinHandle<std::io::Result<()>>;

/// The application router served on an ephemeral local port.
///
/// Each instance owns its listener; two harness runs never share a port.
pub struct HarnessServer {
    addr: SocketAddr,
    base_url: String,
    grace: Duration,
    probe: reqwest::Client,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<ServeHandle>>,
}

impl HarnessServer {
    /// Binds `server.host:0`, serves the router over `store` and returns
    /// once `/health` answers 200 or the probe window closes.
    pub async fn start(store: Arc<dyn Store>, config: &HarnessConfig) -> HarnessResult<Arc<Self>> {
        let router = build_router(AppState::new(store), &AppConfig::from_harness(config));

        let listener = TcpListener::bind((config.server.host.as_str(), 0)).await?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{addr}");

        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        let probe = reqwest::Client::builder()
            .timeout(config.server.health_probe_interval().max(MIN_PROBE_TIMEOUT))
            .build()
            .map_err(|e| HarnessError::Transport(e.to_string()))?;

        let server = Arc::new(Self {
            addr,
            base_url,
            grace: config.server.shutdown_grace(),
            probe,
            shutdown: Mutex::new(Some(shutdown)),
            handle: Mutex::new(Some(handle)),
        });

        if let Err(err) = server.wait_ready(&config.server).await {
            server.stop().await.ok();
            return Err(err);
        }

        info!(base_url = %server.base_url, "harness server ready");
        Ok(server)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// One `GET /health` probe.
    pub async fn check_health(&self) -> HarnessResult<()> {
        let url = format!("{}{HEALTH_PATH}", self.base_url);
        let response = self
            .probe
            .get(&url)
            .send()
            .await
            .map_err(|e| HarnessError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(()),
            status => Err(HarnessError::UnexpectedStatus {
                op: "HealthCheck".to_string(),
                status,
            }),
        }
    }

    async fn wait_ready(&self, config: &ServerConfig) -> HarnessResult<()> {
        let window = config.health_probe_window();
        let cadence = config.health_probe_interval();
        let started = Instant::now();
        let mut probes = 0u32;

        loop {
            if !self.is_running() {
                return Err(HarnessError::Provision(
                    "server task exited before becoming healthy".to_string(),
                ));
            }

            probes += 1;
            match self.check_health().await {
                Ok(()) => {
                    debug!(probes, elapsed_ms = started.elapsed().as_millis() as u64, "health probe passed");
                    return Ok(());
                }
                Err(err) if started.elapsed() + cadence < window => {
                    debug!(probes, error = %err, "health probe failed, retrying");
                    sleep(cadence).await;
                }
                Err(err) => {
                    warn!(probes, error = %err, "server did not become healthy");
                    return Err(HarnessError::timeout(Stage::ServerStart.as_str(), window));
                }
            }
        }
    }

    /// Graceful shutdown bounded by the grace window. Later calls are
    /// no-ops.
    pub async fn stop(&self) -> HarnessResult<()> {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let Some(mut handle) = self.handle.lock().take() else {
            return Ok(());
        };

        match timeout(self.grace, &mut handle).await {
            Ok(Ok(Ok(()))) => {
                info!(addr = %self.addr, "harness server stopped");
                Ok(())
            }
            Ok(Ok(Err(err))) => Err(HarnessError::Io(err)),
            Ok(Err(join_err)) => Err(HarnessError::panic("harness-server", join_err.to_string())),
            Err(_) => {
                handle.abort();
                warn!(grace_ms = self.grace.as_millis() as u64, "in-flight requests outlived the grace window");
                Err(HarnessError::timeout("server_shutdown", self.grace))
            }
        }
    }

    /// Shutdown step run first during cleanup.
    pub fn cleanup_task(self: &Arc<Self>) -> CleanupTask {
        let server = Arc::clone(self);
        let budget = self.grace + Duration::from_secs(1);
        CleanupTask::new("harness-server", priority::SERVER, move || async move { server.stop().await })
            .with_timeout(budget)
            .required()
    }
}

impl Drop for HarnessServer {
    /// Signals shutdown if nobody called `stop`; the serve task then exits
    /// on its own.
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.get_mut().take() {
            let _ = shutdown.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqbench_db::MemoryStore;

    async fn memory_store() -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.seed_defaults().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_start_probe_and_stop() {
        let server = HarnessServer::start(memory_store().await, &HarnessConfig::default())
            .await
            .unwrap();

        assert!(server.base_url().starts_with("http://127.0.0.1:"));
        assert!(server.is_running());
        server.check_health().await.unwrap();

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(server.check_health().await.is_err());

        // Second stop is a no-op.
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_instances_use_distinct_ports() {
        let config = HarnessConfig::default();
        let first = HarnessServer::start(memory_store().await, &config).await.unwrap();
        let second = HarnessServer::start(memory_store().await, &config).await.unwrap();

        assert_ne!(first.local_addr(), second.local_addr());

        first.stop().await.unwrap();
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_is_first_and_required() {
        let server = HarnessServer::start(memory_store().await, &HarnessConfig::default())
            .await
            .unwrap();
        let task = server.cleanup_task();

        assert_eq!(task.priority, priority::SERVER);
        assert!(task.required);
        server.stop().await.unwrap();
    }
}
