// src/capability/database.rs

//! The database control contract: the local operations the core invokes
//! on the managed database instance. Implementations (initdb scripts,
//! replication setup, etc.) are out of this core's scope per the
//! specification's system overview.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    None,
    Master,
    Replica,
}

/// Required, `single` arity.
#[async_trait]
pub trait DatabaseControl: Send + Sync {
    async fn start(&self) -> Result<(), String>;
    async fn stop(&self) -> Result<(), String>;
    async fn initdb(&self) -> Result<(), String>;

    /// Makes the local database unusable; used after an irrecoverable
    /// bootstrap failure so a subsequent restart re-bootstraps cleanly.
    async fn reset(&self) -> Result<(), String>;

    async fn backup(&self) -> Result<(), String>;
    async fn restore(&self) -> Result<(), String>;

    async fn setup_replication(&self, primary: Option<&str>) -> Result<(), String>;
    async fn stop_replication(&self) -> Result<(), String>;
    async fn reload(&self) -> Result<(), String>;

    async fn get_database_identifier(&self) -> Result<String, String>;
    async fn get_timeline(&self) -> Result<u64, String>;
    async fn replication_role(&self) -> Result<ReplicationRole, String>;
}
