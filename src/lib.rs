//! Core library for the distributed service-monitoring platform: probes,
//! the agent scheduler, the coordinator ingest surface, the analytics
//! engine, the persistence facade and the notifier. The `guardia-hub` and
//! `guardia-agent` binaries wire these together.

pub mod agent;
pub mod analytics;
pub mod config;
pub mod coordinator;
pub mod model;
pub mod notifier;
pub mod persistence;
pub mod probes;
