//! Dashboard reporting: per-channel metrics with year-over-year comparison
//! and the cross-channel campaign view.

#![warn(clippy::unwrap_used)]

pub mod campaigns;
pub mod direct_mail;
pub mod email;
pub mod inflight;
pub mod rollup;
pub mod web;

#[cfg(test)]
mod testing;

pub use campaigns::{
    CampaignAggregationService, CampaignJoin, EmailCampaignFeed, MailCampaignFeed,
};
pub use direct_mail::{DirectMailMetricsService, MailMetricsReport};
pub use email::{EmailMetricsReport, EmailMetricsService};
pub use web::{WebMetricsReport, WebMetricsService};
