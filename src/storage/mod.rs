mod repository;

pub use repository::*;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Ordered list of `(version, sql)` pairs applied by [`Repository::migrate`].
pub const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_001_INITIAL)];
