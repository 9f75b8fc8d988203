//! Scheduled ingestion of Instagram posts into SQLite.
//!
//! A run refreshes each account's long-lived token when it nears expiry,
//! pages through the account's media newest-first until it reaches the stored
//! watermark, and records one row per media id. All remote calls in a run
//! share a single [`budget::RequestBudget`].

pub mod budget;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod graph;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod token;
pub mod trigger;
