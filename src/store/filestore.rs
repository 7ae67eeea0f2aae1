use super::error::{Result, StoreError};
use super::traits::CredentialStore;
use crate::transport::Credentials;
use log::{debug, warn};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const CREDS_FILE: &str = "creds.json";
const CREDS_TMP_FILE: &str = "creds.json.tmp";

/// Stores credentials as JSON inside a session directory.
///
/// A session is considered present when the directory exists and is not
/// empty, so a directory left behind by a partial wipe still triggers a
/// resume attempt rather than being silently ignored.
pub struct FileCredentialStore {
    base_path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn read_json(&self, path: &Path) -> Result<Option<Credentials>> {
        match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(StoreError::from),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write_json(&self, path: &Path, value: &Credentials) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        let tmp = self.path_for(CREDS_TMP_FILE);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn persist(&self, credentials: &Credentials) -> Result<()> {
        fs::create_dir_all(&self.base_path)?;
        self.write_json(&self.path_for(CREDS_FILE), credentials)?;
        debug!(target: "Relay/Store", "Persisted credentials to {}", self.base_path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<Credentials>> {
        self.read_json(&self.path_for(CREDS_FILE))
    }

    fn exists(&self) -> bool {
        match fs::read_dir(&self.base_path) {
            Ok(mut entries) => entries.next().is_some(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(target: "Relay/Store", "Cannot inspect {}: {e}", self.base_path.display());
                false
            }
        }
    }

    fn wipe(&self) -> Result<()> {
        match fs::remove_dir_all(&self.base_path) {
            Ok(()) => {
                debug!(target: "Relay/Store", "Removed session directory {}", self.base_path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
