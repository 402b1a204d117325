//! # Catalog Stores
//!
//! Keyed tables for the exchanges, queues and bindings of a virtual host.
//! Durable entries are written to a [`RowStore`] before they become visible in
//! memory, and are read back when the catalog is constructed, so a restarted
//! broker sees the same topology it had before.
//!
//! Each catalog guards its in-memory map with a single mutex; reads and writes
//! take the same lock. Persistence happens under that lock, so a failed write
//! leaves both the table and the map untouched.
//!
//! - [`ExchangeCatalog`] and [`QueueCatalog`] are instances of the generic
//!   [`Catalog`] over [`Exchange`] and [`MsgQueue`] entries.
//! - [`BindingCatalog`] indexes bindings by exchange, then by queue.

pub mod binding;
pub mod exchange;
pub mod queue;
pub mod table;


pub use binding::{Binding, BindingCatalog, QueueBindings};
pub use exchange::{Exchange, ExchangeCatalog};
pub use queue::{MsgQueue, QueueCatalog};
pub use table::{JsonTable, MemoryTable, RowStore};

use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// An entry stored in a [`Catalog`]
pub trait CatalogEntry: Clone + Send + Sync + 'static {
    /// Kind of entry, used in log lines
    const KIND: &'static str;

    fn key(&self) -> &str;
    fn durable(&self) -> bool;
}

/// Name-keyed catalog with durable rows
pub struct Catalog<T: CatalogEntry> {
    table: Box<dyn RowStore<T>>,
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: CatalogEntry> Catalog<T> {
    /// Open the catalog and load every persisted row
    pub fn new(table: Box<dyn RowStore<T>>) -> Result<Self> {
        table.create_table()?;
        let catalog = Self {
            table,
            entries: Mutex::new(HashMap::new()),
        };

        let recovered = catalog.recover()?;
        {
            let mut entries = catalog.entries.lock();
            for entry in recovered {
                entries.insert(entry.key().to_string(), Arc::new(entry));
            }
            if !entries.is_empty() {
                info!("Recovered {} {} entries", entries.len(), T::KIND);
            }
        }
        Ok(catalog)
    }

    /// Add `entry` unless its key already exists. Durable entries are
    /// persisted first; a persistence failure aborts the declare.
    pub fn declare(&self, entry: T) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(entry.key()) {
            debug!("{} '{}' already declared", T::KIND, entry.key());
            return Ok(());
        }
        if entry.durable() {
            self.table.insert(entry.key(), &entry)?;
        }
        info!("Declared {} '{}'", T::KIND, entry.key());
        entries.insert(entry.key().to_string(), Arc::new(entry));
        Ok(())
    }

    /// Remove `key`; returns the removed entry, or `None` if it did not exist
    pub fn delete(&self, key: &str) -> Result<Option<Arc<T>>> {
        let mut entries = self.entries.lock();
        let durable = match entries.get(key) {
            Some(entry) => entry.durable(),
            None => return Ok(None),
        };
        if durable {
            self.table.delete(key)?;
        }
        info!("Deleted {} '{}'", T::KIND, key);
        Ok(entries.remove(key))
    }

    pub fn select(&self, key: &str) -> Option<Arc<T>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// All persisted rows
    pub fn recover(&self) -> Result<Vec<T>> {
        self.table.scan()
    }

    pub fn all(&self) -> Vec<Arc<T>> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop the table and forget every entry
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        self.table.drop_table()?;
        entries.clear();
        Ok(())
    }
}
