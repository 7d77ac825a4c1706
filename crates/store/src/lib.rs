#![warn(clippy::unwrap_used)]

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryMetricsStore;
pub use postgres::PostgresMetricsStore;
pub use store::MetricsStore;
