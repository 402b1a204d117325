//! Keyed row tables backing the durable catalogs.
//!
//! A table supports exactly what catalog recovery needs: create, insert by
//! key, delete by key, full scan and drop. [`JsonTable`] keeps one JSON
//! document per table and replaces it atomically on every write;
//! [`MemoryTable`] is a non-persistent stand-in.

use crate::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait RowStore<R>: Send + Sync {
    fn create_table(&self) -> Result<()>;

    /// Insert or replace the row stored under `key`
    fn insert(&self, key: &str, row: &R) -> Result<()>;

    /// Remove the row stored under `key`; absent keys are not an error
    fn delete(&self, key: &str) -> Result<()>;

    fn scan(&self) -> Result<Vec<R>>;

    fn drop_table(&self) -> Result<()>;
}

/// File-backed table: `<dir>/<name>.json`, a JSON object of key → row
pub struct JsonTable<R> {
    path: PathBuf,
    rows: Mutex<Option<BTreeMap<String, R>>>,
}

impl<R> JsonTable<R>
where
    R: Serialize + DeserializeOwned + Clone + Send,
{
    pub fn new<P: AsRef<Path>>(dir: P, name: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", name)),
            rows: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, R>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(&self.path)?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write to a sibling temp file, then rename over the table
    fn persist(&self, rows: &BTreeMap<String, R>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(rows)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `f` to a copy of the rows and commit it only if persisting succeeds
    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, R>),
    {
        let mut guard = self.rows.lock();
        let mut rows = match guard.as_ref() {
            Some(rows) => rows.clone(),
            None => self.load()?,
        };
        f(&mut rows);
        self.persist(&rows)?;
        *guard = Some(rows);
        Ok(())
    }
}

impl<R> RowStore<R> for JsonTable<R>
where
    R: Serialize + DeserializeOwned + Clone + Send,
{
    fn create_table(&self) -> Result<()> {
        let mut guard = self.rows.lock();
        if guard.is_some() {
            return Ok(());
        }
        let rows = self.load()?;
        if !self.path.exists() {
            self.persist(&rows)?;
        }
        debug!("Opened table {} with {} rows", self.path.display(), rows.len());
        *guard = Some(rows);
        Ok(())
    }

    fn insert(&self, key: &str, row: &R) -> Result<()> {
        let row = row.clone();
        self.mutate(|rows| {
            rows.insert(key.to_string(), row);
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(|rows| {
            rows.remove(key);
        })
    }

    fn scan(&self) -> Result<Vec<R>> {
        let mut guard = self.rows.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard
            .as_ref()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn drop_table(&self) -> Result<()> {
        let mut guard = self.rows.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *guard = None;
        debug!("Dropped table {}", self.path.display());
        Ok(())
    }
}

/// In-memory table for catalogs that do not need to survive a restart
pub struct MemoryTable<R> {
    rows: Mutex<BTreeMap<String, R>>,
}

impl<R> MemoryTable<R> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl<R> Default for MemoryTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone + Send> RowStore<R> for MemoryTable<R> {
    fn create_table(&self) -> Result<()> {
        Ok(())
    }

    fn insert(&self, key: &str, row: &R) -> Result<()> {
        self.rows.lock().insert(key.to_string(), row.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.rows.lock().remove(key);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<R>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    fn drop_table(&self) -> Result<()> {
        self.rows.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: u32,
    }

    fn row(name: &str, value: u32) -> Row {
        Row {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_json_table_survives_reopen() {
        let dir = tempdir().expect("Failed to create temp dir");

        {
            let table = JsonTable::<Row>::new(dir.path(), "rows");
            table.create_table().expect("Failed to create table");
            table.insert("a", &row("a", 1)).expect("Failed to insert");
            table.insert("b", &row("b", 2)).expect("Failed to insert");
            table.delete("a").expect("Failed to delete");
            table.insert("b", &row("b", 3)).expect("Failed to replace");
        }

        let table = JsonTable::<Row>::new(dir.path(), "rows");
        table.create_table().expect("Failed to reopen table");
        assert_eq!(table.scan().expect("Failed to scan"), vec![row("b", 3)]);
    }

    #[test]
    fn test_json_table_drop_removes_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let table = JsonTable::<Row>::new(dir.path().join("meta"), "rows");
        table.create_table().expect("Failed to create table");
        table.insert("a", &row("a", 1)).expect("Failed to insert");
        assert!(table.path().exists());

        table.drop_table().expect("Failed to drop table");
        assert!(!table.path().exists());
        assert!(table.scan().expect("Failed to scan").is_empty());
    }

    #[test]
    fn test_json_table_delete_missing_key_is_ok() {
        let dir = tempdir().expect("Failed to create temp dir");
        let table = JsonTable::<Row>::new(dir.path(), "rows");
        table.create_table().expect("Failed to create table");
        assert!(table.delete("missing").is_ok());
    }

    #[test]
    fn test_memory_table() {
        let table = MemoryTable::<Row>::new();
        table.insert("a", &row("a", 1)).expect("Failed to insert");
        table.insert("a", &row("a", 2)).expect("Failed to insert");
        assert_eq!(table.len(), 1);
        table.drop_table().expect("Failed to drop");
        assert!(table.is_empty());
    }
}
