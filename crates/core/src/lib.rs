pub mod config;
pub mod error;
pub mod period;
pub mod types;

pub use config::AppConfig;
pub use error::{DashboardError, DashboardResult};
