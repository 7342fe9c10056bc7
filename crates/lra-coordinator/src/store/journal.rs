//! Append-only JSON-lines journal backed by a file.
//!
//! Every mutation appends one entry; opening the store replays the journal
//! and the last entry per id wins. Good enough for a single coordinator
//! instance to survive restarts. The journal grows without bound until a
//! rewrite; `compact` rewrites it from live records.

use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{LraStore, StoreError};
use crate::types::{LraId, LraRecord};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
enum JournalEntry {
    Put { record: LraRecord },
    Remove { id: LraId },
}

/// File-backed store. All state is also held in memory; the file exists to
/// replay it after a restart.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    data: Mutex<HashMap<LraId, LraRecord>>,
    writer: Mutex<BufWriter<fs_err::File>>,
}

impl JournalStore {
    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut data = HashMap::new();

        if path.exists() {
            let raw = fs_err::read_to_string(&path).map_err(io_err)?;
            for (lineno, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: JournalEntry = serde_json::from_str(line).map_err(|e| {
                    StoreError::Serialization(format!(
                        "journal line {}: {e}",
                        lineno + 1
                    ))
                })?;
                match entry {
                    JournalEntry::Put { record } => {
                        data.insert(record.id.clone(), record);
                    }
                    JournalEntry::Remove { id } => {
                        data.remove(&id);
                    }
                }
            }
            info!(
                path = %path.display(),
                records = data.len(),
                "replayed lra journal"
            );
        }

        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(JournalStore {
            path,
            data: Mutex::new(data),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the journal so it holds exactly one `Put` per live record.
    pub fn compact(&self) -> Result<(), StoreError> {
        let data = self.data.lock().unwrap();
        let mut writer = self.writer.lock().unwrap();

        let tmp = self.path.with_extension("journal.tmp");
        {
            let mut fresh = BufWriter::new(fs_err::File::create(&tmp).map_err(io_err)?);
            for record in data.values() {
                write_entry(
                    &mut fresh,
                    &JournalEntry::Put {
                        record: record.clone(),
                    },
                )?;
            }
            fresh.flush().map_err(io_err)?;
        }
        fs_err::rename(&tmp, &self.path).map_err(io_err)?;

        let file = fs_err::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        *writer = BufWriter::new(file);
        debug!(path = %self.path.display(), records = data.len(), "compacted lra journal");
        Ok(())
    }

    fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().unwrap();
        write_entry(&mut *writer, entry)?;
        writer.flush().map_err(io_err)
    }
}

fn write_entry(writer: &mut impl Write, entry: &JournalEntry) -> Result<(), StoreError> {
    let line = serde_json::to_string(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
    writeln!(writer, "{line}").map_err(io_err)
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

#[async_trait]
impl LraStore for JournalStore {
    async fn insert(&self, record: LraRecord) -> Result<(), StoreError> {
        {
            let data = self.data.lock().unwrap();
            if data.contains_key(&record.id) {
                return Err(StoreError::Duplicate);
            }
        }
        self.append(&JournalEntry::Put {
            record: record.clone(),
        })?;
        self.data.lock().unwrap().insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &LraId) -> Result<Option<LraRecord>, StoreError> {
        Ok(self.data.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, record: LraRecord) -> Result<(), StoreError> {
        {
            let data = self.data.lock().unwrap();
            if !data.contains_key(&record.id) {
                return Err(StoreError::NotFound);
            }
        }
        self.append(&JournalEntry::Put {
            record: record.clone(),
        })?;
        self.data.lock().unwrap().insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<LraId>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect())
    }

    async fn list_terminal_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LraId>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status.is_terminal())
            .filter(|r| r.ended_at.is_some_and(|ended| ended < cutoff))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn remove(&self, id: &LraId) -> Result<(), StoreError> {
        self.append(&JournalEntry::Remove { id: id.clone() })?;
        self.data.lock().unwrap().remove(id);
        Ok(())
    }
}
