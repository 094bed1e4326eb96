//! # Repo Tracker
//!
//! Watches a set of GitHub repositories, stores a snapshot of each, and on a
//! fixed schedule re-fetches them. When a repository's `last_updated`
//! advances the new snapshot is persisted and every subscribed WebSocket
//! connection is told which repository changed.

pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod github;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod repositories;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod snapshot;
pub mod telemetry;
pub mod workflow;
pub use migration;
