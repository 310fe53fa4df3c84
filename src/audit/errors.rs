//! Error type for the audit store.

/// Failures surfaced by [`super::AuditStore`].
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The underlying SQLite connection pool or a query failed.
    #[error("audit store error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Schema migrations failed to apply at startup; fatal.
    #[error("audit store migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
