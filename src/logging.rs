use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use super::{DepositedObject, Entity};

/// Process-wide subscriber: RUST_LOG wins, otherwise info (debug with
/// the -D flag).
pub(crate) fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

/// Log one fetch-activity line to the process stream and to the activity
/// log that ships inside the bundle (`data/logs/aipcreation.log`).
pub(crate) fn log_aip_activity(aip_directory: &Path, message: &str) {
    tracing::info!("{message}");
    let log_file = aip_directory.join("data/logs/aipcreation.log");
    if let Err(err) = append_line(&log_file, message) {
        tracing::warn!("could not append to {}: {err}", log_file.display());
    }
}

/// One payload file as inventoried for the preservation event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FileDetail {
    pub(crate) fileset_uuid: String,
    pub(crate) file_name: String,
    pub(crate) file_type: String,
    pub(crate) file_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PreservationEventRecord {
    do_uuid: String,
    aip_deposited_at: String,
    aip_sha256: String,
    aip_metadata: serde_json::Value,
    aip_file_details: Vec<FileDetail>,
}

/// Record a successful deposit in both audit streams: the human-readable
/// `preservation_events.log` and the line-delimited JSON
/// `preservation_events.json`. Called while the workspace still exists so
/// the file inventory can be gathered.
pub(crate) fn log_preservation_event(
    logdir: &Path,
    deposited: &DepositedObject,
    aip_directory: &Path,
) {
    let details = file_log_details(aip_directory);

    let mut message = format!(
        "{} was successfully deposited into Swift storage!\n\
         Here are the details of this preservation event:\n\
         \tUUID: '{}'\n\
         \tTimestamp of Completion: '{}'\n\
         \tAIP Checksum: '{}'\n\
         \tMetadata: {:?}\n",
        deposited.name, deposited.name, deposited.last_modified, deposited.checksum,
        deposited.metadata,
    );
    if !details.is_empty() {
        message.push_str("\tFile Details:\n");
        for detail in &details {
            message.push_str(&format!(
                "\t\t{{\"fileset_uuid\": \"{}\", \"file_name\": \"{}\", \
                 \"file_type\": \"{}\", \"file_size\": {}}}\n",
                detail.fileset_uuid, detail.file_name, detail.file_type, detail.file_size
            ));
        }
    }
    tracing::info!("{message}");
    let human_log = logdir.join("preservation_events.log");
    if let Err(err) = append_line(&human_log, &message) {
        tracing::warn!("could not append to {}: {err}", human_log.display());
    }

    let record = PreservationEventRecord {
        do_uuid: deposited.name.clone(),
        aip_deposited_at: deposited.last_modified.clone(),
        aip_sha256: deposited.checksum.clone(),
        aip_metadata: serde_json::json!(deposited.metadata),
        aip_file_details: details,
    };
    let json_log = logdir.join("preservation_events.json");
    match serde_json::to_string(&record) {
        Ok(line) => {
            if let Err(err) = append_line(&json_log, &line) {
                tracing::warn!("could not append to {}: {err}", json_log.display());
            }
        }
        Err(err) => tracing::warn!("could not serialize preservation event: {err}"),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PreservationFailureRecord {
    do_uuid: String,
    entity_type: String,
    attempt: u64,
    outcome: String,
    error: String,
}

/// Record a failed attempt in the same two audit streams as successful
/// deposits, so retries and permanent failures can be audited after the
/// fact. `terminal` marks an item that will not be retried.
pub(crate) fn log_preservation_failure(
    logdir: &Path,
    entity: &Entity,
    attempt: u64,
    terminal: bool,
    error: &str,
) {
    let outcome = if terminal { "dropped" } else { "requeued" };
    let message =
        format!("{entity} failed preservation attempt {attempt} and was {outcome}: {error}");
    let human_log = logdir.join("preservation_events.log");
    if let Err(err) = append_line(&human_log, &message) {
        tracing::warn!("could not append to {}: {err}", human_log.display());
    }

    let record = PreservationFailureRecord {
        do_uuid: entity.uuid.clone(),
        entity_type: entity.entity_type.clone(),
        attempt,
        outcome: outcome.to_string(),
        error: error.to_string(),
    };
    let json_log = logdir.join("preservation_events.json");
    match serde_json::to_string(&record) {
        Ok(line) => {
            if let Err(err) = append_line(&json_log, &line) {
                tracing::warn!("could not append to {}: {err}", json_log.display());
            }
        }
        Err(err) => tracing::warn!("could not serialize preservation failure: {err}"),
    }
}

/// Inventory of `data/objects/files/<file_set>/<file>`, one level deep,
/// as shipped in the event record.
pub(crate) fn file_log_details(aip_directory: &Path) -> Vec<FileDetail> {
    let files_root = aip_directory.join("data/objects/files");
    let mut details = Vec::new();
    let Ok(filesets) = std::fs::read_dir(&files_root) else {
        return details;
    };
    let mut fileset_dirs: Vec<_> = filesets.filter_map(|e| e.ok()).collect();
    fileset_dirs.sort_by_key(|e| e.file_name());
    for fileset in fileset_dirs {
        let fileset_uuid = fileset.file_name().to_string_lossy().to_string();
        let Ok(files) = std::fs::read_dir(fileset.path()) else {
            continue;
        };
        let mut file_entries: Vec<_> = files.filter_map(|e| e.ok()).collect();
        file_entries.sort_by_key(|e| e.file_name());
        for file in file_entries {
            let Ok(metadata) = file.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let file_name = file.file_name().to_string_lossy().to_string();
            let file_type = file
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            details.push(FileDetail {
                fileset_uuid: fileset_uuid.clone(),
                file_name,
                file_type,
                file_size: metadata.len(),
            });
        }
    }
    details
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let timestamp = Utc::now().to_rfc3339();
    writeln!(file, "[{timestamp}] {line}")
}
