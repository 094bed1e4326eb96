//! Database migrations for the repo tracker.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_repositories;
mod m2025_01_10_000002_create_connections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_repositories::Migration),
            Box::new(m2025_01_10_000002_create_connections::Migration),
        ]
    }
}
