use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{BagError, bag};

#[derive(Debug, Error)]
pub(crate) enum CreatorError {
    #[error(transparent)]
    Bag(#[from] BagError),

    #[error("packaging failed at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Turns a fully fetched workspace into the deliverable: bag it, verify
/// it, tar it to the target path, then optionally remove the workspace.
pub(crate) struct AipCreator<'a> {
    uuid: &'a str,
    aip_directory: &'a Path,
    aip_filename: &'a Path,
    aip_version: &'a str,
}

impl<'a> AipCreator<'a> {
    pub(crate) fn new(
        uuid: &'a str,
        aip_directory: &'a Path,
        aip_filename: &'a Path,
        aip_version: &'a str,
    ) -> Self {
        Self {
            uuid,
            aip_directory,
            aip_filename,
            aip_version,
        }
    }

    pub(crate) fn run(&self, clean_work_directories: bool) -> Result<(), CreatorError> {
        self.bag_aip()?;
        self.tar_bag()?;
        if clean_work_directories {
            self.clean_directories()?;
        }
        Ok(())
    }

    fn bag_aip(&self) -> Result<(), CreatorError> {
        tracing::debug!("{}: bagging workspace ...", self.uuid);
        bag::make_bag(self.aip_directory, self.aip_version)?;
        bag::validate_bag(self.aip_directory)?;
        Ok(())
    }

    /// Archive entries are rooted at the workspace's basename (the
    /// sanitized entity uuid) so the bundle unpacks into one directory.
    fn tar_bag(&self) -> Result<(), CreatorError> {
        tracing::debug!("{}: writing {} ...", self.uuid, self.aip_filename.display());
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CreatorError::Io {
                path: path.clone(),
                source,
            }
        };
        let root = self
            .aip_directory
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.uuid.to_string());
        let file =
            std::fs::File::create(self.aip_filename).map_err(io_err(self.aip_filename))?;
        let mut builder = tar::Builder::new(file);
        builder
            .append_dir_all(&root, self.aip_directory)
            .map_err(io_err(self.aip_directory))?;
        builder.finish().map_err(io_err(self.aip_filename))?;
        Ok(())
    }

    fn clean_directories(&self) -> Result<(), CreatorError> {
        tracing::debug!("{}: removing workspace ...", self.uuid);
        std::fs::remove_dir_all(self.aip_directory).map_err(|source| CreatorError::Io {
            path: self.aip_directory.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "magpie_test_creator_{}_{name}",
            std::process::id()
        ));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn populate_workspace(root: &Path, uuid: &str) -> PathBuf {
        let workspace = root.join(uuid);
        std::fs::create_dir_all(workspace.join("data/objects/metadata")).unwrap();
        std::fs::create_dir_all(workspace.join("data/logs")).unwrap();
        std::fs::write(
            workspace.join("data/objects/metadata/object_metadata.nt"),
            b"<http://x/a> <http://p/b> <http://x/c> .\n",
        )
        .unwrap();
        std::fs::write(workspace.join("data/logs/aipcreation.log"), b"fetched\n").unwrap();
        workspace
    }

    #[test]
    fn run_produces_tarball_and_cleans_workspace() {
        let dir = scratch("run");
        let workspace = populate_workspace(&dir, "noid1");
        let tarball = dir.join("noid1.tar");

        AipCreator::new("noid1", &workspace, &tarball, "lightaip-2.0")
            .run(true)
            .unwrap();

        assert!(tarball.is_file());
        assert!(!workspace.exists());

        let mut archive = tar::Archive::new(std::fs::File::open(&tarball).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|n| n.starts_with("noid1")));
        assert!(names.contains(&"noid1/bagit.txt".to_string()));
        assert!(names.contains(&"noid1/manifest-sha256.txt".to_string()));
        assert!(
            names.contains(&"noid1/data/objects/metadata/object_metadata.nt".to_string())
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn workspace_survives_when_cleaning_is_off() {
        let dir = scratch("keep");
        let workspace = populate_workspace(&dir, "noid2");
        let tarball = dir.join("noid2.tar");

        AipCreator::new("noid2", &workspace, &tarball, "lightaip-2.0")
            .run(false)
            .unwrap();

        assert!(tarball.is_file());
        assert!(workspace.join("bag-info.txt").is_file());
        std::fs::remove_dir_all(&dir).ok();
    }
}
