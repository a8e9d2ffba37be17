//! Device identity persisted in a small JSON file.
//!
//! The file holds `{"device_id": "<uuid>"}`. It is created on first start and
//! read on every start after that, so the id survives restarts and software
//! updates.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::IdentityProvider;

/// Prefix of an id that was generated only for this process.
pub const TEMPORARY_ID_PREFIX: &str = "temp-";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

/// Whether `id` is a real, persisted device id.
pub fn is_stable_device_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with(TEMPORARY_ID_PREFIX)
}

/// Resolve the device id, failing if only a temporary one is available.
pub fn resolve_device_id(provider: &dyn IdentityProvider) -> Result<String> {
    let id = provider.device_id();
    if is_stable_device_id(&id) {
        Ok(id)
    } else {
        Err(Error::UnstableIdentity(id))
    }
}

/// [`IdentityProvider`] backed by a JSON file.
///
/// The id is resolved once and cached for the lifetime of the provider.
#[derive(Debug)]
pub struct FileIdentity {
    path: PathBuf,
    cached: OnceLock<String>,
}

impl FileIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_or_create(&self) -> Result<String> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            let file: IdentityFile = serde_json::from_str(&content).map_err(|e| {
                Error::InvalidConfig(format!("{}: {e}", self.path.display()))
            })?;
            match file.device_id {
                Some(id) if !id.trim().is_empty() => {
                    info!("Retrieved existing device ID: {}", id);
                    return Ok(id);
                }
                _ => warn!(
                    "device_id missing in {}; generating a new one",
                    self.path.display()
                ),
            }
        }

        let id = Uuid::new_v4().to_string();
        let file = IdentityFile {
            device_id: Some(id.clone()),
        };
        let content = serde_json::to_string(&file)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        info!("Generated new device ID {} in {}", id, self.path.display());
        Ok(id)
    }
}

impl IdentityProvider for FileIdentity {
    fn device_id(&self) -> String {
        self.cached
            .get_or_init(|| match self.load_or_create() {
                Ok(id) => id,
                Err(e) => {
                    error!("Error managing device ID file {}: {}", self.path.display(), e);
                    let temp = format!("{TEMPORARY_ID_PREFIX}{}", Uuid::new_v4());
                    warn!("Falling back to temporary device ID: {}", temp);
                    temp
                }
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("device_id.json");

        let first = FileIdentity::new(&path).device_id();
        assert!(is_stable_device_id(&first));
        assert!(Uuid::parse_str(&first).is_ok());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&first));

        // A new provider reads the same id back.
        let second = FileIdentity::new(&path).device_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reads_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_id.json");
        std::fs::write(&path, r#"{"device_id": "rack-7"}"#).unwrap();

        assert_eq!(FileIdentity::new(&path).device_id(), "rack-7");
    }

    #[test]
    fn test_missing_key_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_id.json");
        std::fs::write(&path, r#"{"other": 1}"#).unwrap();

        let id = FileIdentity::new(&path).device_id();
        assert!(is_stable_device_id(&id));
        let stored: IdentityFile =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.device_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_corrupt_file_gives_temporary_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_id.json");
        std::fs::write(&path, "{not json").unwrap();

        let provider = FileIdentity::new(&path);
        let id = provider.device_id();
        assert!(id.starts_with(TEMPORARY_ID_PREFIX));
        // Cached: the same temporary id for the lifetime of the provider.
        assert_eq!(provider.device_id(), id);

        let err = resolve_device_id(&provider).unwrap_err();
        assert!(matches!(err, Error::UnstableIdentity(_)));
    }

    #[test]
    fn test_stable_id_check() {
        assert!(is_stable_device_id("abc"));
        assert!(!is_stable_device_id(""));
        assert!(!is_stable_device_id("temp-123"));
    }
}
