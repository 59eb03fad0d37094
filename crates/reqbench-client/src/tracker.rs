use crate::client::HarnessClient;
use async_trait::async_trait;
use reqbench_core::HarnessResult;
use reqbench_reliability::{ResourceTracker, TrackerReport};
use std::sync::Arc;

/// Closes tracked clients so their keep-alive pools are released.
pub struct HttpTracker {
    clients: parking_lot::Mutex<Vec<Arc<HarnessClient>>>,
}

impl HttpTracker {
    pub fn new() -> Self {
        Self {
            clients: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn track(&self, client: Arc<HarnessClient>) {
        self.clients.lock().push(client);
    }
}

impl Default for HttpTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceTracker for HttpTracker {
    fn name(&self) -> &str {
        "http"
    }

    async fn cleanup(&self) -> HarnessResult<TrackerReport> {
        let clients = std::mem::take(&mut *self.clients.lock());
        let mut released = 0;
        let mut requests = 0;

        for client in &clients {
            requests += client.requests_sent();
            if !client.is_closed() {
                client.close()?;
                released += 1;
            }
        }

        // Anything else still holding a client keeps its pool alive.
        let residual = clients
            .iter()
            .filter(|c| Arc::strong_count(c) > 1)
            .count() as u64;

        Ok(TrackerReport {
            name: self.name().to_string(),
            released,
            residual,
            detail: format!("{} client(s), {requests} request(s) sent", clients.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqbench_core::ClientConfig;
    use reqbench_reliability::ReliabilityManager;

    #[tokio::test]
    async fn test_http_tracker_closes_clients() {
        let client = Arc::new(
            HarnessClient::new(
                "http://127.0.0.1:1",
                ClientConfig::default(),
                Arc::new(ReliabilityManager::default()),
            )
            .unwrap(),
        );
        let tracker = HttpTracker::new();
        tracker.track(Arc::clone(&client));

        let report = tracker.cleanup().await.unwrap();

        assert!(client.is_closed());
        assert_eq!(report.released, 1);
        assert_eq!(report.residual, 1);

        let again = tracker.cleanup().await.unwrap();
        assert_eq!(again.released, 0);
    }
}
