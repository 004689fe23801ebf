//! Backing media for the session store.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::history::record::SessionRecord;

/// Keyed storage for session records.
///
/// Implementations do not order or cap records; the store does that.
pub trait SessionRepository: Send {
    /// Fetches one record.
    ///
    /// # Errors
    /// Returns an error if the medium cannot be read.
    fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Inserts or replaces the record with the same id.
    ///
    /// # Errors
    /// Returns an error if the medium cannot be written.
    fn put(&mut self, record: SessionRecord) -> Result<()>;

    /// Removes a record. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the medium cannot be written.
    fn delete(&mut self, id: &str) -> Result<bool>;

    /// All records, in no particular order.
    ///
    /// # Errors
    /// Returns an error if the medium cannot be read.
    fn list(&self) -> Result<Vec<SessionRecord>>;
}

/// All records in a single JSON array file, rewritten atomically.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<SessionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read sessions from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("parse sessions from {}", self.path.display()))
    }

    fn write_all(&self, records: &[SessionRecord]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;

        let tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, records).context("serialize sessions")?;
            writer.flush().context("flush sessions")?;
        }
        tmp.persist(&self.path)
            .with_context(|| format!("write sessions to {}", self.path.display()))?;
        Ok(())
    }
}

impl SessionRepository for JsonFileRepository {
    fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id == id))
    }

    fn put(&mut self, record: SessionRecord) -> Result<()> {
        let mut records = self.read_all()?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
        self.write_all(&records)
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let mut records = self.read_all()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<SessionRecord>> {
        self.read_all()
    }
}

/// In-process repository, used for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    records: Vec<SessionRecord>,
}

impl SessionRepository for MemoryRepository {
    fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    fn put(&mut self, record: SessionRecord) -> Result<()> {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        Ok(self.records.len() != before)
    }

    fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.records.clone())
    }
}
