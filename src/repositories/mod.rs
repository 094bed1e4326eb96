//! # Repository Layer
//!
//! SeaORM-backed implementations of the snapshot store and the connection
//! registry used by the refresh workflow and the HTTP handlers.

pub mod connection;
pub mod snapshot;

pub use connection::ConnectionRepository;
pub use snapshot::SnapshotRepository;
