//! Disruption metrics over classified samples.
//!
//! This module reduces classified samples into per-day scores, category
//! shares, group breakdowns, disruption events and station impact counts,
//! answers calculator queries, and publishes the resulting report locally
//! and to S3.

pub mod aggregate;
pub mod analyzer;
pub mod calculator;
pub mod events;
pub mod score;
pub mod types;
pub mod utility;
pub mod writetos3;
