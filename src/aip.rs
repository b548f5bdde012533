use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{
    AipCreator, AipDownloader, Config, CreatorError, DepositError, DownloadError, Entity,
    RepositoryFetcher,
};

#[derive(Debug, Error)]
pub(crate) enum AipError {
    /// The entity cannot be preserved as described. Retrying will never
    /// help.
    #[error("entity {entity} is not preservable: {reason}")]
    EntityInvalid { entity: String, reason: String },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Creator(#[from] CreatorError),

    #[error(transparent)]
    Deposit(#[from] DepositError),
}

impl AipError {
    /// Whether a later attempt could plausibly succeed. Malformed
    /// entities and malformed repository metadata stay broken; transport
    /// and packaging failures are transient.
    pub(crate) fn retryable(&self) -> bool {
        !matches!(
            self,
            AipError::EntityInvalid { .. }
                | AipError::Download(DownloadError::NoFileSets { .. })
                | AipError::Download(DownloadError::NoMemberFiles { .. })
                | AipError::Download(DownloadError::NoOriginalFile { .. })
                | AipError::Download(DownloadError::NoContentFilename { .. })
                | AipError::Download(DownloadError::Ordering(_))
        )
    }
}

pub(crate) fn aip_directory(config: &Config, entity: &Entity) -> PathBuf {
    config.workdir.join(entity.sanitized_uuid())
}

pub(crate) fn aip_filename(config: &Config, entity: &Entity) -> PathBuf {
    config
        .workdir
        .join(format!("{}.tar", entity.sanitized_uuid()))
}

/// Assemble the entity's bundle and hand it to `deposit`. The workspace
/// and the tarball are removed on every exit path, deposit failure and
/// panic included, so a crashed attempt leaves nothing behind for the
/// next one to trip over. With `clean_work_directories` off both are
/// kept for inspection.
pub(crate) fn create<T>(
    entity: &Entity,
    config: &Config,
    fetcher: &RepositoryFetcher,
    deposit: impl FnOnce(&Path, &Path) -> Result<T, AipError>,
) -> Result<T, AipError> {
    if !entity.is_valid() {
        return Err(AipError::EntityInvalid {
            entity: entity.to_string(),
            reason: "missing type or unusable uuid".to_string(),
        });
    }
    let directory = aip_directory(config, entity);
    let filename = aip_filename(config, entity);
    let mut paths = Vec::new();
    if config.clean_work_directories {
        paths.push(filename.clone());
        paths.push(directory.clone());
    }
    let _teardown = Teardown { paths };

    let uuid = entity.sanitized_uuid();
    AipDownloader::new(&uuid, &directory, fetcher).run()?;
    // The workspace must outlive the deposit so the preservation event
    // can inventory its payload files; teardown removes it afterwards.
    AipCreator::new(&uuid, &directory, &filename, &config.aip_version).run(false)?;

    deposit(&filename, &directory)
}

/// Remove any on-disk remains of an entity's assembly.
pub(crate) fn destroy(config: &Config, entity: &Entity) -> std::io::Result<()> {
    remove_path(&aip_directory(config, entity))?;
    remove_path(&aip_filename(config, entity))
}

struct Teardown {
    paths: Vec<PathBuf>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(err) = remove_path(path) {
                tracing::warn!("could not remove {}: {err}", path.display());
            }
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        Ok(())
    }
}
