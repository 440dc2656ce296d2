use crate::error::PersistenceError;
use crate::incidents::Incident;
use crate::persistence::{read_json, write_json_atomic};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Durable storage for incident records
#[cfg_attr(test, mockall::automock)]
pub trait IncidentSink: Send + Sync {
    /// Write (or overwrite) the record of one incident
    fn save(&self, incident: &Incident) -> Result<(), PersistenceError>;

    /// Every stored incident, open or closed
    fn load_all(&self) -> Result<Vec<Incident>, PersistenceError>;

    /// Where records are written, used as the incident record target
    fn location(&self) -> String;
}

/// One `<incident-id>.json` file per incident in a directory
#[derive(Debug, Clone)]
pub struct FileIncidentStore {
    directory: PathBuf,
}

impl FileIncidentStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Create the directory if needed
    pub fn ensure_directory(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", id))
    }
}

impl IncidentSink for FileIncidentStore {
    fn save(&self, incident: &Incident) -> Result<(), PersistenceError> {
        self.ensure_directory()?;
        write_json_atomic(&self.path_for(&incident.id), incident)?;
        debug!("Saved incident {} to {}", incident.id, self.directory.display());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Incident>, PersistenceError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut incidents = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Incident>(&path) {
                Ok(incident) => incidents.push(incident),
                Err(e) => warn!("Skipping unreadable incident record {}: {}", path.display(), e),
            }
        }
        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(incidents)
    }

    fn location(&self) -> String {
        self.directory.display().to_string()
    }
}
