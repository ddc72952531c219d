//! In-memory reference store.
//!
//! Tables are eager DataFrames; queries run through the polars SQL
//! context, so the dialect matches what continuous edits are written in.
//! A transaction works on a private copy of the table map and swaps it in
//! at commit. DataFrame clones share column buffers, so the copy is
//! shallow.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use polars::prelude::{DataFrame, IntoLazy};
use polars::sql::SQLContext;
use tracing::trace;

use canvass_model::StoreError;

use crate::RelationalStore;

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, DataFrame>,
    /// Working copy while a transaction is open.
    txn: Option<BTreeMap<String, DataFrame>>,
}

impl Inner {
    fn active(&self) -> &BTreeMap<String, DataFrame> {
        self.txn.as_ref().unwrap_or(&self.tables)
    }

    fn active_mut(&mut self) -> &mut BTreeMap<String, DataFrame> {
        self.txn.as_mut().unwrap_or(&mut self.tables)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with an initial table outside any transaction.
    pub fn with_table(self, name: impl Into<String>, frame: DataFrame) -> Self {
        self.lock().tables.insert(name.into(), frame);
        self
    }

    /// Committed snapshot of a table, mainly for tests and report output.
    pub fn table(&self, name: &str) -> Option<DataFrame> {
        self.lock().tables.get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RelationalStore for MemoryStore {
    fn query(&self, sql: &str) -> Result<DataFrame, StoreError> {
        let inner = self.lock();
        let mut ctx = SQLContext::new();
        for (name, frame) in inner.active() {
            ctx.register(name, frame.clone().lazy());
        }
        trace!(sql, "memory store query");
        ctx.execute(sql)
            .and_then(polars::prelude::LazyFrame::collect)
            .map_err(|e| StoreError::query(sql, e))
    }

    fn create_table(&self, name: &str, frame: &DataFrame) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let tables = inner.active_mut();
        if tables.contains_key(name) {
            return Err(StoreError::TableExists(name.to_string()));
        }
        tables.insert(name.to_string(), frame.clone());
        Ok(())
    }

    fn append(&self, name: &str, rows: &DataFrame) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let tables = inner.active_mut();
        let Some(existing) = tables.get_mut(name) else {
            return Err(StoreError::NoSuchTable(name.to_string()));
        };
        existing
            .vstack_mut(rows)
            .map_err(|e| StoreError::Message(format!("append to {name}: {e}")))?;
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.active_mut().remove(name).is_none() {
            return Err(StoreError::NoSuchTable(name.to_string()));
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.lock().active().contains_key(name)
    }

    fn begin(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let committed = inner.tables.clone();
        inner.txn = Some(committed);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(txn) = inner.txn.take() else {
            return Err(StoreError::NoTransaction);
        };
        inner.tables = txn;
        Ok(())
    }
}
