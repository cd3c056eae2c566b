use crate::audit::AuditReport;
use crate::error::StoreError;
use crate::graph::{GraphExport, GraphStatistics};
use crate::providers::AnalysisMethod;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A persisted audit result. Immutable once saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub method: AnalysisMethod,
    pub graph: GraphExport,
    pub statistics: GraphStatistics,
}

impl AnalysisRecord {
    pub fn from_report(report: &AuditReport, repository: Option<&str>, action: Option<&str>) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            repository: repository.map(String::from),
            action: action.map(String::from),
            method: report.method,
            graph: report.export(),
            statistics: report.statistics.clone(),
        }
    }

    /// What was audited, for listings.
    pub fn subject(&self) -> &str {
        self.repository
            .as_deref()
            .or(self.action.as_deref())
            .unwrap_or("workflow")
    }
}

/// 16 random bytes, hex-encoded.
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Ids are generated by [`new_id`]; anything else cannot name a record.
fn is_valid_id(id: &str) -> bool {
    id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Flat directory of `<id>.json` records.
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write the record, replacing the file atomically.
    pub fn save(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(record)?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&json)?;
        file.persist(self.path_for(&record.id))
            .map_err(|e| StoreError::Io(e.error))?;

        debug!(id = %record.id, dir = %self.dir.display(), "saved analysis");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<AnalysisRecord, StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let content = match fs::read_to_string(self.path_for(id)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// All readable records, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if !is_valid_id(id) {
                continue;
            }
            match self.get(id) {
                Ok(record) => records.push(record),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
