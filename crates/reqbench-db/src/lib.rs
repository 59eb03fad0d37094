//! Persistence for the requirements-management service: the `Store` seam
//! with in-memory and Postgres implementations, ephemeral database
//! provisioning, and the relational dataset generator.

mod error;
pub mod generator;
mod memory;
pub mod model;
mod pool;
mod postgres;
mod provision;
mod store;
mod tracker;
mod transactions;

pub use error::{StoreError, StoreResult};
pub use generator::{DataGenerator, SeedSummary, SizeProfile};
pub use memory::MemoryStore;
pub use model::{
    Entity, EntityPatch, ListQuery, NewEntity, NewRelationship, Relationship, SearchHit, User,
};
pub use pool::{connect_pool, TrackedPool, TrackedTransaction, TxConn};
pub use postgres::{PgStore, MIGRATOR};
pub use provision::{redact_url, DatabaseBackend, ProvisionedDatabase, Provisioner, TeardownHandle};
pub use store::Store;
pub use tracker::{container_teardown_task, DatabaseTracker};
pub use transactions::{Abandon, RegisteredTransaction, TransactionRegistry};
