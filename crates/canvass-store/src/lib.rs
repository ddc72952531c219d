//! Relational store contract.
//!
//! The engine never talks to a database directly; everything goes through
//! [`RelationalStore`]. Continuous-edit expressions are passed through
//! verbatim in the store's native SQL dialect, and imputation output is
//! written through the same seam, so any SQL-speaking backend can be
//! plugged in. [`MemoryStore`] is the bundled reference implementation.

pub mod memory;

use polars::prelude::DataFrame;

use canvass_model::StoreError;

/// Storage and query seam consumed by the checker and the imputation
/// orchestrator.
pub trait RelationalStore {
    /// Runs a read-only SQL query and returns the result rows.
    fn query(&self, sql: &str) -> Result<DataFrame, StoreError>;

    /// Creates a table holding the given rows. Errors if the table
    /// already exists.
    fn create_table(&self, name: &str, frame: &DataFrame) -> Result<(), StoreError>;

    /// Appends rows to an existing table. The schema must match.
    fn append(&self, name: &str, rows: &DataFrame) -> Result<(), StoreError>;

    fn drop_table(&self, name: &str) -> Result<(), StoreError>;

    fn exists(&self, name: &str) -> bool;

    /// Opens a transaction. Writes after `begin` become visible to other
    /// readers only at `commit`; a `begin` while a transaction is open
    /// discards the uncommitted writes and starts fresh.
    fn begin(&self) -> Result<(), StoreError>;

    /// Publishes all writes since `begin` atomically.
    fn commit(&self) -> Result<(), StoreError>;
}

pub use memory::MemoryStore;
