use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub(crate) enum BagError {
    #[error("bagging failed at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// The finished bundle does not verify against its own manifests.
    #[error("bag at {path} is invalid: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },
}

const BAGIT_TXT: &str = "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n";
const TAG_FILES: [&str; 3] = ["bag-info.txt", "bagit.txt", "manifest-sha256.txt"];

/// Turn a populated workspace into a BagIt bag in place: checksum every
/// payload file under `data/`, then write the declaration, bag-info,
/// payload manifest, and tag manifest at the top of the directory.
pub(crate) fn make_bag(aip_directory: &Path, aip_version: &str) -> Result<(), BagError> {
    let payload = payload_checksums(aip_directory)?;

    let mut octets = 0u64;
    let mut manifest = String::new();
    for (rel, (digest, size)) in &payload {
        octets += size;
        let _ = writeln!(manifest, "{digest}  {rel}");
    }

    let bag_info = format!(
        "AIP-Version: {aip_version}\nBagging-Date: {}\nPayload-Oxum: {octets}.{}\n",
        Utc::now().format("%Y-%m-%d"),
        payload.len(),
    );

    write_file(aip_directory, "bagit.txt", BAGIT_TXT)?;
    write_file(aip_directory, "bag-info.txt", &bag_info)?;
    write_file(aip_directory, "manifest-sha256.txt", &manifest)?;

    let mut tag_manifest = String::new();
    for name in TAG_FILES {
        let path = aip_directory.join(name);
        let (digest, _) = sha256_file(&path)?;
        let _ = writeln!(tag_manifest, "{digest}  {name}");
    }
    write_file(aip_directory, "tagmanifest-sha256.txt", &tag_manifest)?;
    Ok(())
}

/// Verify a bag against its manifests before it leaves the machine. Every
/// manifest line must re-hash to the same digest, and every payload file
/// on disk must be accounted for in the payload manifest.
pub(crate) fn validate_bag(aip_directory: &Path) -> Result<(), BagError> {
    verify_manifest(aip_directory, "manifest-sha256.txt")?;
    verify_manifest(aip_directory, "tagmanifest-sha256.txt")?;

    let listed = manifest_entries(aip_directory, "manifest-sha256.txt")?;
    for entry in WalkDir::new(aip_directory.join("data")) {
        let entry = entry.map_err(|err| walk_error(aip_directory, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_path(aip_directory, entry.path());
        if !listed.contains_key(&rel) {
            return Err(BagError::ManifestInvalid {
                path: aip_directory.to_path_buf(),
                reason: format!("payload file {rel} missing from manifest"),
            });
        }
    }
    Ok(())
}

fn verify_manifest(aip_directory: &Path, manifest_name: &str) -> Result<(), BagError> {
    for (rel, expected) in manifest_entries(aip_directory, manifest_name)? {
        let (actual, _) = sha256_file(&aip_directory.join(&rel))?;
        if actual != expected {
            return Err(BagError::ManifestInvalid {
                path: aip_directory.to_path_buf(),
                reason: format!("checksum mismatch for {rel}"),
            });
        }
    }
    Ok(())
}

fn manifest_entries(
    aip_directory: &Path,
    manifest_name: &str,
) -> Result<BTreeMap<String, String>, BagError> {
    let path = aip_directory.join(manifest_name);
    let text = std::fs::read_to_string(&path).map_err(|source| BagError::Io {
        path: path.clone(),
        source,
    })?;
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let Some((digest, rel)) = line.split_once("  ") else {
            return Err(BagError::ManifestInvalid {
                path: aip_directory.to_path_buf(),
                reason: format!("malformed line in {manifest_name}: {line}"),
            });
        };
        entries.insert(rel.to_string(), digest.to_string());
    }
    Ok(entries)
}

/// Checksums and sizes of every file under `data/`, keyed by the
/// slash-joined path relative to the bag root, in sorted order.
fn payload_checksums(aip_directory: &Path) -> Result<BTreeMap<String, (String, u64)>, BagError> {
    let mut payload = BTreeMap::new();
    for entry in WalkDir::new(aip_directory.join("data")).sort_by_file_name() {
        let entry = entry.map_err(|err| walk_error(aip_directory, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let (digest, size) = sha256_file(entry.path())?;
        payload.insert(relative_path(aip_directory, entry.path()), (digest, size));
    }
    Ok(payload)
}

fn sha256_file(path: &Path) -> Result<(String, u64), BagError> {
    let mut file = std::fs::File::open(path).map_err(|source| BagError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher).map_err(|source| BagError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn relative_path(aip_directory: &Path, path: &Path) -> String {
    path.strip_prefix(aip_directory)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_file(aip_directory: &Path, name: &str, contents: &str) -> Result<(), BagError> {
    let path = aip_directory.join(name);
    std::fs::write(&path, contents).map_err(|source| BagError::Io { path, source })
}

fn walk_error(aip_directory: &Path, err: walkdir::Error) -> BagError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| aip_directory.to_path_buf());
    BagError::Io {
        path,
        source: err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "magpie_test_bag_{}_{name}",
            std::process::id()
        ));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(dir.join("data/objects")).unwrap();
        dir
    }

    #[test]
    fn bag_carries_manifests_and_oxum() {
        let dir = scratch("make");
        std::fs::write(dir.join("data/objects/metadata"), b"hello").unwrap();
        std::fs::write(dir.join("data/objects/extra"), b"world!!").unwrap();

        make_bag(&dir, "lightaip-2.0").unwrap();

        let bagit = std::fs::read_to_string(dir.join("bagit.txt")).unwrap();
        assert!(bagit.starts_with("BagIt-Version: 0.97"));

        let info = std::fs::read_to_string(dir.join("bag-info.txt")).unwrap();
        assert!(info.contains("AIP-Version: lightaip-2.0"));
        assert!(info.contains("Payload-Oxum: 12.2"));

        let manifest = std::fs::read_to_string(dir.join("manifest-sha256.txt")).unwrap();
        assert!(manifest.contains("  data/objects/metadata"));
        assert!(manifest.contains("  data/objects/extra"));

        let tags = std::fs::read_to_string(dir.join("tagmanifest-sha256.txt")).unwrap();
        assert!(tags.contains("  bag-info.txt"));
        assert!(tags.contains("  bagit.txt"));
        assert!(tags.contains("  manifest-sha256.txt"));

        validate_bag(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let dir = scratch("tamper");
        std::fs::write(dir.join("data/objects/metadata"), b"hello").unwrap();
        make_bag(&dir, "lightaip-2.0").unwrap();

        std::fs::write(dir.join("data/objects/metadata"), b"HELLO").unwrap();
        let err = validate_bag(&dir).unwrap_err();
        assert!(matches!(err, BagError::ManifestInvalid { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unmanifested_payload_file_fails_validation() {
        let dir = scratch("extra");
        std::fs::write(dir.join("data/objects/metadata"), b"hello").unwrap();
        make_bag(&dir, "lightaip-2.0").unwrap();

        std::fs::write(dir.join("data/objects/stray"), b"sneaky").unwrap();
        let err = validate_bag(&dir).unwrap_err();
        let BagError::ManifestInvalid { reason, .. } = err else {
            panic!("expected ManifestInvalid");
        };
        assert!(reason.contains("data/objects/stray"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
