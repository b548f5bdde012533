use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::SwiftConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Uploads of large bundles over slow links take a while.
const WRITE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub(crate) enum DepositError {
    #[error("storage authentication failed with status {status}")]
    Auth { status: u16 },

    #[error("storage auth response is missing the {name} header")]
    MissingHeader { name: &'static str },

    #[error("storage upload failed with status {status}")]
    Http { status: u16 },

    #[error("storage transport failure: {message}")]
    Transport { message: String },

    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// What the storage service accepted, as recorded in the preservation
/// event.
#[derive(Debug, Clone)]
pub(crate) struct DepositedObject {
    pub(crate) name: String,
    pub(crate) last_modified: String,
    pub(crate) checksum: String,
    pub(crate) metadata: BTreeMap<String, String>,
}

/// Uploads finished bundles into a Swift container using the v1.0 auth
/// handshake: one GET trades credentials for a storage URL and token,
/// then the tarball is PUT under the entity's uuid with the preservation
/// metadata tags attached.
pub(crate) struct SwiftDepositer {
    agent: ureq::Agent,
    config: SwiftConfig,
    aip_version: String,
}

impl SwiftDepositer {
    pub(crate) fn new(config: &SwiftConfig, aip_version: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(WRITE_TIMEOUT)
            .build();
        Self {
            agent,
            config: config.clone(),
            aip_version: aip_version.to_string(),
        }
    }

    pub(crate) fn deposit_file(
        &self,
        path: &Path,
        uuid: &str,
    ) -> Result<DepositedObject, DepositError> {
        let checksum = sha256_file(path)?;
        let metadata = deposit_metadata(&self.config.project, uuid, &self.aip_version);

        let (storage_url, token) = self.authenticate()?;
        let object_url = format!("{storage_url}/{}/{uuid}", self.config.container);

        let file = std::fs::File::open(path).map_err(|source| DepositError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut request = self
            .agent
            .put(&object_url)
            .set("X-Auth-Token", &token)
            .set("Content-Type", "application/x-tar");
        for (tag, value) in &metadata {
            request = request.set(&format!("X-Object-Meta-{tag}"), value);
        }
        let response = match request.send(file) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return Err(DepositError::Http { status }),
            Err(ureq::Error::Transport(err)) => {
                return Err(DepositError::Transport {
                    message: err.to_string(),
                });
            }
        };

        let last_modified = response
            .header("Last-Modified")
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        Ok(DepositedObject {
            name: uuid.to_string(),
            last_modified,
            checksum,
            metadata,
        })
    }

    fn authenticate(&self) -> Result<(String, String), DepositError> {
        let response = match self
            .agent
            .get(&self.config.auth_url)
            .set("X-Auth-User", &self.config.username)
            .set("X-Auth-Key", &self.config.password)
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return Err(DepositError::Auth { status }),
            Err(ureq::Error::Transport(err)) => {
                return Err(DepositError::Transport {
                    message: err.to_string(),
                });
            }
        };
        let storage_url = response
            .header("X-Storage-Url")
            .ok_or(DepositError::MissingHeader {
                name: "X-Storage-Url",
            })?
            .trim_end_matches('/')
            .to_string();
        let token = response
            .header("X-Auth-Token")
            .ok_or(DepositError::MissingHeader {
                name: "X-Auth-Token",
            })?
            .to_string();
        Ok((storage_url, token))
    }
}

/// The metadata tags every deposited bundle carries.
fn deposit_metadata(project: &str, uuid: &str, aip_version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("project".to_string(), project.to_string()),
        ("project-id".to_string(), uuid.to_string()),
        ("aip-version".to_string(), aip_version.to_string()),
        ("promise".to_string(), "bronze".to_string()),
    ])
}

fn sha256_file(path: &Path) -> Result<String, DepositError> {
    let mut file = std::fs::File::open(path).map_err(|source| DepositError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|source| DepositError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_tags_identify_the_bundle() {
        let metadata = deposit_metadata("ERA", "noid1", "lightaip-2.0");
        assert_eq!(metadata.get("project").map(String::as_str), Some("ERA"));
        assert_eq!(metadata.get("project-id").map(String::as_str), Some("noid1"));
        assert_eq!(
            metadata.get("aip-version").map(String::as_str),
            Some("lightaip-2.0")
        );
        assert_eq!(metadata.get("promise").map(String::as_str), Some("bronze"));
        assert_eq!(metadata.len(), 4);
    }

    #[test]
    fn checksum_matches_known_digest() {
        let dir = std::env::temp_dir().join(format!(
            "magpie_test_deposit_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bundle.tar");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
