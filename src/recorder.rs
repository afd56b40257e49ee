use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::PersistenceError;
use crate::place::PlaceRecord;

/// Records committed so far in this run, in extraction order, plus every
/// name the run has already tried.
#[derive(Debug, Default)]
pub struct RunState {
    records: Vec<PlaceRecord>,
    committed: HashSet<String>,
    attempted: HashSet<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a previous store. Seeded names count as attempted.
    pub fn resume(previous: Vec<PlaceRecord>) -> Self {
        let mut state = Self::new();
        for mut place in previous {
            place.normalize();
            state.append(place);
        }
        state.attempted = state.committed.clone();
        state
    }

    pub fn records(&self) -> &[PlaceRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<PlaceRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns false when `name` was already attempted.
    pub fn mark_attempted(&mut self, name: &str) -> bool {
        self.attempted.insert(name.to_string())
    }

    /// Drop the newest record after its flush failed; it stays attempted.
    fn rollback_last(&mut self) {
        if let Some(place) = self.records.pop() {
            self.committed.remove(&place.name);
        }
    }

    fn append(&mut self, place: PlaceRecord) -> bool {
        if place.name.trim().is_empty() || self.committed.contains(&place.name) {
            return false;
        }
        self.committed.insert(place.name.clone());
        self.attempted.insert(place.name.clone());
        self.records.push(place);
        true
    }
}

/// Writes the run's records to the output store after every append.
pub struct Recorder {
    path: PathBuf,
}

impl Recorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Recorder { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `place` and flush. Returns `Ok(false)` without touching the
    /// store when the name is blank or already committed.
    pub fn record(&self, state: &mut RunState, place: PlaceRecord) -> Result<bool, PersistenceError> {
        let name = place.name.clone();
        if !state.append(place) {
            debug!("Not recording {:?}: blank or already stored", name);
            return Ok(false);
        }
        if let Err(e) = self.flush(state) {
            state.rollback_last();
            return Err(e);
        }
        Ok(true)
    }

    /// Rewrite the whole store: serialize to a temp file beside the target,
    /// sync it, then rename over the target.
    pub fn flush(&self, state: &RunState) -> Result<(), PersistenceError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        let mut bytes = serde_json::to_vec_pretty(state.records())?;
        bytes.push(b'\n');

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
        tmp.write_all(&bytes).map_err(|e| io_error(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
        tmp.persist(&self.path).map_err(|e| PersistenceError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;

        debug!("Flushed {} places to {}", state.len(), self.path.display());
        Ok(())
    }
}

/// Read an output store back.
pub fn load(path: &Path) -> Result<Vec<PlaceRecord>, PersistenceError> {
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let mut places: Vec<PlaceRecord> = serde_json::from_str(&text)?;
    for p in &mut places {
        p.normalize();
    }
    Ok(places)
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}
