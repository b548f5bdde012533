use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{
    FetchError, FetchOutcome, FileSetOrdering, Graph, OrderingError, PathSpec, RepositoryFetcher,
    log_aip_activity,
};

const FILENAME: &str = "http://purl.org/dc/terms/title";
const MEMBER_FILES: &str = "http://pcdm.org/models#hasFile";
const MEMBER_FILE_SETS: &str = "http://pcdm.org/models#hasMember";
const ORIGINAL_FILE: &str = "http://pcdm.org/use#OriginalFile";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

#[derive(Debug, Error)]
pub(crate) enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Ordering(#[from] OrderingError),

    /// The entity's metadata names no member file sets; nothing to
    /// preserve means the entity is malformed.
    #[error("{uuid} has no member file sets")]
    NoFileSets { uuid: String },

    #[error("file set {file_set} has no member files")]
    NoMemberFiles { file_set: String },

    #[error("file set {file_set} has no file typed as the original")]
    NoOriginalFile { file_set: String },

    #[error("file set {file_set} metadata carries no content filename")]
    NoContentFilename { file_set: String },

    #[error("cannot prepare {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Pulls everything a bundle needs out of the repository: the entity's
/// metadata, the reconstructed file ordering, and per file set its
/// metadata, original-file content, and fixity report. Lays it all out in
/// the fixed workspace shape the packager expects.
pub(crate) struct AipDownloader<'a> {
    uuid: &'a str,
    aip_directory: &'a Path,
    fetcher: &'a RepositoryFetcher,
}

impl<'a> AipDownloader<'a> {
    pub(crate) fn new(
        uuid: &'a str,
        aip_directory: &'a Path,
        fetcher: &'a RepositoryFetcher,
    ) -> Self {
        Self {
            uuid,
            aip_directory,
            fetcher,
        }
    }

    pub(crate) fn run(&self) -> Result<(), DownloadError> {
        self.make_directories()?;

        tracing::info!("{}: retrieving data from the repository ...", self.uuid);

        let object_metadata = self.metadata_dir().join("object_metadata.nt");
        self.download_and_log(
            self.uuid,
            &PathSpec {
                remote: None,
                local: object_metadata.clone(),
                optional: false,
                rdf: true,
            },
        )?;

        let object_graph = RepositoryFetcher::load_graph(&object_metadata)?;
        let file_set_uuids = self.member_file_set_uuids(&object_graph)?;

        self.write_file_ordering(&file_set_uuids)?;

        for file_set_uuid in &file_set_uuids {
            self.download_file_set(file_set_uuid)?;
        }
        Ok(())
    }

    fn download_file_set(&self, file_set_uuid: &str) -> Result<(), DownloadError> {
        self.make_file_set_directories(file_set_uuid)?;

        let metadata_dir = self.files_metadata_dir().join(file_set_uuid);
        let file_set_metadata = metadata_dir.join("file_set_metadata.nt");
        self.download_and_log(
            file_set_uuid,
            &PathSpec {
                remote: None,
                local: file_set_metadata.clone(),
                optional: false,
                rdf: true,
            },
        )?;
        let file_set_graph = RepositoryFetcher::load_graph(&file_set_metadata)?;

        // Probe each member file's metadata into one scratch file until a
        // file typed as the original turns up. The scratch file is
        // clobbered on each probe and the winner's metadata stays behind.
        let scratch = metadata_dir.join("original_file_metadata.nt");
        let mut original_remote_base = None;
        for file_path in self.member_files(file_set_uuid, &file_set_graph)? {
            let outcome = self.download_and_log(
                file_set_uuid,
                &PathSpec {
                    remote: Some(format!("/files/{file_path}/fcr:metadata")),
                    local: scratch.clone(),
                    optional: true,
                    rdf: true,
                },
            )?;
            if outcome == FetchOutcome::OptionalMiss {
                continue;
            }
            if is_original_file(&RepositoryFetcher::load_graph(&scratch)?) {
                original_remote_base = Some(format!("/files/{file_path}"));
                break;
            }
        }
        let original_remote_base =
            original_remote_base.ok_or_else(|| DownloadError::NoOriginalFile {
                file_set: file_set_uuid.to_string(),
            })?;

        let filename = content_filename(&file_set_graph).ok_or_else(|| {
            DownloadError::NoContentFilename {
                file_set: file_set_uuid.to_string(),
            }
        })?;
        self.download_and_log(
            file_set_uuid,
            &PathSpec {
                remote: Some(original_remote_base.clone()),
                local: self.files_dir().join(file_set_uuid).join(filename),
                optional: false,
                rdf: false,
            },
        )?;
        self.download_and_log(
            file_set_uuid,
            &PathSpec {
                remote: Some(format!("{original_remote_base}/fcr:fixity")),
                local: self
                    .file_logs_dir()
                    .join(file_set_uuid)
                    .join("content_fixity_report.nt"),
                optional: false,
                rdf: true,
            },
        )?;
        Ok(())
    }

    /// Fetch the list source (consulted, never stored), rebuild the file
    /// ordering against the membership list, and write the ordering
    /// manifest into the workspace.
    fn write_file_ordering(&self, file_set_uuids: &[String]) -> Result<(), DownloadError> {
        let list_source_url = self.fetcher.object_url(self.uuid, Some("/list_source"));
        let graph = self.fetcher.fetch_graph(&list_source_url)?;
        let ordering = FileSetOrdering::reconstruct(&graph, &list_source_url, file_set_uuids)?;
        let manifest = self.files_metadata_dir().join("file_order.xml");
        ordering
            .write_manifest(&manifest)
            .map_err(|source| DownloadError::Io {
                path: manifest,
                source,
            })?;
        Ok(())
    }

    fn download_and_log(
        &self,
        uuid: &str,
        spec: &PathSpec,
    ) -> Result<FetchOutcome, DownloadError> {
        let url = self.fetcher.object_url(uuid, spec.remote.as_deref());
        log_aip_activity(
            self.aip_directory,
            &format!(
                "{}: {} -- fetching from {url} ...",
                self.uuid,
                spec.local.display()
            ),
        );
        let outcome = self.fetcher.download(uuid, spec)?;
        let verdict = match outcome {
            FetchOutcome::Saved => "saved",
            FetchOutcome::OptionalMiss => "not_found",
        };
        log_aip_activity(
            self.aip_directory,
            &format!("{}: {} -- {verdict}", self.uuid, spec.local.display()),
        );
        Ok(outcome)
    }

    fn member_file_set_uuids(&self, graph: &Graph) -> Result<Vec<String>, DownloadError> {
        let uuids: Vec<String> = graph
            .objects(None, MEMBER_FILE_SETS)
            .map(|term| term.last_path_segment().to_string())
            .collect();
        if uuids.is_empty() {
            return Err(DownloadError::NoFileSets {
                uuid: self.uuid.to_string(),
            });
        }
        Ok(uuids)
    }

    fn member_files(
        &self,
        file_set_uuid: &str,
        graph: &Graph,
    ) -> Result<Vec<String>, DownloadError> {
        let files: Vec<String> = graph
            .objects(None, MEMBER_FILES)
            .map(|term| term.last_path_segment().to_string())
            .collect();
        if files.is_empty() {
            return Err(DownloadError::NoMemberFiles {
                file_set: file_set_uuid.to_string(),
            });
        }
        Ok(files)
    }

    // Workspace layout. The packager and the event inventory both depend
    // on these exact paths.

    fn metadata_dir(&self) -> PathBuf {
        self.aip_directory.join("data/objects/metadata")
    }

    fn files_metadata_dir(&self) -> PathBuf {
        self.aip_directory.join("data/objects/metadata/files_metadata")
    }

    fn files_dir(&self) -> PathBuf {
        self.aip_directory.join("data/objects/files")
    }

    fn file_logs_dir(&self) -> PathBuf {
        self.aip_directory.join("data/logs/files_logs")
    }

    /// Destroy-before-create: a leftover workspace from an interrupted
    /// run is removed wholesale so assembly always starts clean.
    fn make_directories(&self) -> Result<(), DownloadError> {
        if self.aip_directory.exists() {
            tracing::debug!("{}: removing stale workspace ...", self.uuid);
            std::fs::remove_dir_all(self.aip_directory).map_err(|source| DownloadError::Io {
                path: self.aip_directory.to_path_buf(),
                source,
            })?;
        }
        tracing::debug!("{}: creating directories ...", self.uuid);
        for dir in [
            self.metadata_dir(),
            self.files_metadata_dir(),
            self.files_dir(),
            self.aip_directory.join("data/logs"),
            self.file_logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| DownloadError::Io { path: dir, source })?;
        }
        Ok(())
    }

    fn make_file_set_directories(&self, file_set_uuid: &str) -> Result<(), DownloadError> {
        for dir in [
            self.files_metadata_dir().join(file_set_uuid),
            self.files_dir().join(file_set_uuid),
            self.file_logs_dir().join(file_set_uuid),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| DownloadError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

fn is_original_file(graph: &Graph) -> bool {
    graph
        .objects(None, RDF_TYPE)
        .any(|term| term.as_str() == ORIGINAL_FILE)
}

/// The content's filename is the file set's title literal.
fn content_filename(graph: &Graph) -> Option<String> {
    graph
        .first_object(None, FILENAME)
        .map(|term| term.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepositoryConfig;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "magpie_test_downloader_{}_{name}",
            std::process::id()
        ));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    fn downloader_parts() -> RepositoryFetcher {
        RepositoryFetcher::new(&RepositoryConfig {
            url: "http://repo.example".into(),
            base_path: "/dev".into(),
            user: String::new(),
            password: String::new(),
        })
    }

    #[test]
    fn workspace_layout_is_created_and_stale_state_removed() {
        let dir = scratch("layout");
        std::fs::create_dir_all(dir.join("data/objects/files/old_fs")).unwrap();
        std::fs::write(dir.join("data/objects/files/old_fs/stale.bin"), b"x").unwrap();

        let fetcher = downloader_parts();
        let downloader = AipDownloader::new("noid1", &dir, &fetcher);
        downloader.make_directories().unwrap();
        downloader.make_file_set_directories("fs1").unwrap();

        assert!(dir.join("data/objects/metadata/files_metadata/fs1").is_dir());
        assert!(dir.join("data/objects/files/fs1").is_dir());
        assert!(dir.join("data/logs/files_logs/fs1").is_dir());
        assert!(!dir.join("data/objects/files/old_fs").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn member_file_sets_come_from_has_member_edges() {
        let dir = scratch("members");
        let fetcher = downloader_parts();
        let downloader = AipDownloader::new("noid1", &dir, &fetcher);

        let graph = Graph::parse(&format!(
            "<http://repo/e1> <{MEMBER_FILE_SETS}> <http://repo/file_sets/fs1> .\n\
             <http://repo/e1> <{MEMBER_FILE_SETS}> <http://repo/file_sets/fs2> .\n"
        ))
        .unwrap();
        assert_eq!(
            downloader.member_file_set_uuids(&graph).unwrap(),
            ["fs1", "fs2"]
        );

        let empty = Graph::parse("").unwrap();
        assert!(matches!(
            downloader.member_file_set_uuids(&empty).unwrap_err(),
            DownloadError::NoFileSets { .. }
        ));
    }

    #[test]
    fn file_set_with_no_member_files_is_malformed() {
        let dir = scratch("nofiles");
        let fetcher = downloader_parts();
        let downloader = AipDownloader::new("noid1", &dir, &fetcher);
        let empty = Graph::parse("").unwrap();
        assert!(matches!(
            downloader.member_files("fs1", &empty).unwrap_err(),
            DownloadError::NoMemberFiles { .. }
        ));
    }

    #[test]
    fn original_file_detection_checks_rdf_type() {
        let original = Graph::parse(&format!(
            "<http://repo/f1> <{RDF_TYPE}> <{ORIGINAL_FILE}> .\n"
        ))
        .unwrap();
        assert!(is_original_file(&original));

        let derivative = Graph::parse(&format!(
            "<http://repo/f1> <{RDF_TYPE}> <http://pcdm.org/use#ThumbnailImage> .\n"
        ))
        .unwrap();
        assert!(!is_original_file(&derivative));
    }

    #[test]
    fn content_filename_is_the_title_literal() {
        let graph = Graph::parse(&format!(
            "<http://repo/fs1> <{FILENAME}> \"thesis.pdf\" .\n"
        ))
        .unwrap();
        assert_eq!(content_filename(&graph).as_deref(), Some("thesis.pdf"));
        assert_eq!(content_filename(&Graph::parse("").unwrap()), None);
    }
}
