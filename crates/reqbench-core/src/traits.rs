use crate::record::PoolStats;

/// Receives in-flight notifications from the HTTP client.
pub trait RequestObserver: Send + Sync {
    fn request_started(&self);
    fn request_finished(&self);
}

/// Anything that can report connection-pool statistics.
pub trait PoolStatsSource: Send + Sync {
    fn pool_stats(&self) -> PoolStats;
}
