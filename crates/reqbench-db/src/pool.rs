//! Postgres pool wrapper that records acquisition waits.
//!
//! sqlx does not expose wait statistics, so every acquisition that starts
//! while the pool is saturated (no idle connection and `size == max`)
//! counts as one wait, and its latency is added to the wait duration.

use crate::error::{StoreError, StoreResult};
use crate::transactions::{Abandon, RegisteredTransaction, TransactionRegistry};
use async_trait::async_trait;
use reqbench_core::{DatabaseConfig, PoolStats, PoolStatsSource};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMappedMutexGuard;

type PgTransaction = Transaction<'static, Postgres>;

/// A transaction locked for one statement. Derefs to the transaction, and
/// through it to the connection.
pub type TxConn = OwnedMappedMutexGuard<Option<PgTransaction>, PgTransaction>;

/// Connections above `min_connections` are closed after this long idle.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Opens a pool sized from `config`. `max_idle` maps onto
/// `min_connections`, the closest knob sqlx offers.
pub async fn connect_pool(url: &str, config: &DatabaseConfig) -> Result<TrackedPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_open)
        .min_connections(config.max_idle.min(config.max_open))
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(config.conn_lifetime())
        .connect(url)
        .await?;
    Ok(TrackedPool::new(pool, config.max_open))
}

#[async_trait]
impl Abandon for PgTransaction {
    async fn abandon(self) -> StoreResult<()> {
        self.rollback().await.map_err(StoreError::from)
    }
}

/// A transaction registered with its pool until committed, rolled back or
/// dropped. Dropping rolls back, and so does database cleanup when the
/// owner never finished it.
pub struct TrackedTransaction {
    inner: RegisteredTransaction<PgTransaction>,
}

impl TrackedTransaction {
    /// Use as `&mut **tx.conn().await?` for one statement.
    pub async fn conn(&self) -> StoreResult<TxConn> {
        self.inner.lock().await
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.inner.take().await?.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.inner.take().await?.rollback().await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct TrackedPool {
    pool: PgPool,
    max_connections: u32,
    wait_count: AtomicU64,
    wait_micros: AtomicU64,
    transactions: Arc<TransactionRegistry<PgTransaction>>,
}

impl TrackedPool {
    pub fn new(pool: PgPool, max_connections: u32) -> Self {
        Self {
            pool,
            max_connections,
            wait_count: AtomicU64::new(0),
            wait_micros: AtomicU64::new(0),
            transactions: Arc::new(TransactionRegistry::new()),
        }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    fn is_saturated(&self) -> bool {
        self.pool.num_idle() == 0 && self.pool.size() >= self.max_connections
    }

    fn record_wait(&self, waited: Duration) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        let saturated = self.is_saturated();
        let started = Instant::now();
        let conn = self.pool.acquire().await;
        if saturated {
            self.record_wait(started.elapsed());
        }
        conn
    }

    pub async fn begin(&self) -> Result<TrackedTransaction, sqlx::Error> {
        let saturated = self.is_saturated();
        let started = Instant::now();
        let tx = self.pool.begin().await;
        if saturated {
            self.record_wait(started.elapsed());
        }
        Ok(TrackedTransaction {
            inner: self.transactions.register(tx?),
        })
    }

    pub fn open_transactions(&self) -> u64 {
        self.transactions.len() as u64
    }

    /// Rolls back transactions whose owners never finished them.
    pub async fn rollback_open_transactions(&self) -> u64 {
        self.transactions.rollback_all().await
    }

    pub fn stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            open,
            in_use: open.saturating_sub(idle),
            idle,
            wait_count: self.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_micros(self.wait_micros.load(Ordering::Relaxed)),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl PoolStatsSource for TrackedPool {
    fn pool_stats(&self) -> PoolStats {
        self.stats()
    }
}
