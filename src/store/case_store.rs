//! JSON-document store, one file per case.
//!
//! Every writer goes through `load_merge_save`, which re-reads the current
//! document under the store's lock, merges and writes it back atomically
//! (temp file + rename).

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::merge::merge_case;
use super::types::{PersistedCase, StoreError, StoreResult};
use crate::model::{TestCase, TestResult};

#[derive(Debug)]
pub struct CaseStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CaseStore {
    /// Open (and create if needed) a store directory
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }

    pub fn load(&self, id: &str) -> StoreResult<Option<PersistedCase>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        read_document(&path).map(Some)
    }

    /// Every parseable document, sorted by id. Unparseable files are skipped.
    pub fn load_all(&self) -> StoreResult<Vec<PersistedCase>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut docs = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!("skipping unreadable store entry: {}", e);
                    continue;
                }
            };
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match read_document(&path) {
                Ok(doc) => docs.push(doc),
                Err(e) => tracing::warn!("skipping {}", e),
            }
        }
        docs.sort_by(|a, b| a.case.id.cmp(&b.case.id));
        Ok(docs)
    }

    pub fn save(&self, doc: &PersistedCase) -> StoreResult<()> {
        let path = self.path_for(doc.id());
        let body = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Serialize {
            id: doc.id().to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }

    /// Write a new case definition with no result
    pub fn create(&self, case: TestCase) -> StoreResult<PersistedCase> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.path_for(&case.id).exists() {
            return Err(StoreError::AlreadyExists(case.id));
        }
        let doc = PersistedCase::new(case);
        self.save(&doc)?;
        Ok(doc)
    }

    /// Re-read the current document, merge the run into it and write it back
    pub fn load_merge_save(
        &self,
        case: &TestCase,
        run: &TestResult,
        api_records: &BTreeMap<String, Value>,
    ) -> StoreResult<PersistedCase> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.load(&case.id)?;
        let merged = merge_case(current, case, run, api_records);
        self.save(&merged)?;
        Ok(merged)
    }
}

fn read_document(path: &Path) -> StoreResult<PersistedCase> {
    let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Case ids become file names. Bytes outside `[A-Za-z0-9._-]` are
/// percent-encoded (`%` included), so distinct ids never share a file.
fn sanitize_id(id: &str) -> String {
    let mut name = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => name.push(byte as char),
            _ => name.push_str(&format!("%{:02X}", byte)),
        }
    }
    name
}
