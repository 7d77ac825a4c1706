#![warn(clippy::unwrap_used)]

pub mod client;
pub mod normalize;

pub use client::{AnalyticsGateway, GatewayRequest, HttpAnalyticsGateway};
pub use normalize::{normalize_response, DatasetKind, NormalizedResponse, RowRejection};
