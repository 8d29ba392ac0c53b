//! End-to-end runs: fetch from an API, write to disk, collect a manifest.
//!
//! Targets are processed one after another. A failure on one target is
//! logged and recorded in [`ExportManifest::skipped`]; the run carries on.
//! Only authentication failures and an unmatched target filter abort the
//! whole run. Nothing is rolled back on partial completion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::client::ApiClient;
use crate::defender::{self, DeviceGroup};
use crate::error::{Error, Result};
use crate::export::{self, Record, TableOutcome};
use crate::graph::{self, DriveItem};

/// One produced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Group name or remote file name.
    pub name: String,
    pub path: PathBuf,
}

/// A target that produced no file, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTarget {
    pub name: String,
    pub reason: String,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportManifest {
    pub entries: Vec<ManifestEntry>,
    pub skipped: Vec<SkippedTarget>,
}

impl ExportManifest {
    fn skip(&mut self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(target_name = name, %reason, "skipping target");
        self.skipped.push(SkippedTarget {
            name: name.to_string(),
            reason,
        });
    }
}

/// Settings for [`export_device_groups`].
#[derive(Debug, Clone)]
pub struct DefenderExportOptions {
    /// Group names to export; empty means every group.
    pub groups: Vec<String>,
    /// Root directory; each run gets its own session folder below it.
    pub output_dir: PathBuf,
    /// File name prefix, e.g. `defender_machines`.
    pub file_prefix: String,
}

/// Settings for [`download_site_files`].
#[derive(Debug, Clone)]
pub struct SharePointDownloadOptions {
    /// Substring of the site's display name.
    pub site_name: String,
    /// Drive to read; the site's first drive when `None`.
    pub drive_id: Option<String>,
    /// Folder inside the drive; the drive root when `None`.
    pub folder_path: Option<String>,
    /// Local directory files are written to.
    pub destination: PathBuf,
    /// Only files with this suffix are downloaded, e.g. `.csv`.
    pub extension: String,
}

/// Picks the targets to process from `available`.
///
/// An empty `requested` selects everything. Otherwise the matches are
/// returned in availability order, whatever order `requested` lists them
/// in. Requested names that do not exist are logged.
///
/// # Errors
///
/// `Error::UnmatchedTargets` when `requested` is non-empty and nothing
/// matches.
pub fn select_targets<'a, T>(
    available: &'a [T],
    requested: &[String],
    name_of: impl Fn(&T) -> &str,
) -> Result<Vec<&'a T>> {
    if requested.is_empty() {
        return Ok(available.iter().collect());
    }

    let selected: Vec<&T> = available
        .iter()
        .filter(|t| requested.iter().any(|r| r == name_of(t)))
        .collect();

    if selected.is_empty() {
        return Err(Error::UnmatchedTargets {
            requested: requested.to_vec(),
            available: available.iter().map(|t| name_of(t).to_string()).collect(),
        });
    }

    for missing in requested
        .iter()
        .filter(|r| !available.iter().any(|t| name_of(t) == r.as_str()))
    {
        warn!(name = %missing, "requested target not found");
    }
    Ok(selected)
}

/// Timestamp used in session folder and file names.
fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Exports the machines of each selected device group to its own table
/// inside `<output_dir>/export_session_<timestamp>`.
///
/// # Errors
///
/// - Listing the groups failed (any error).
/// - `Error::UnmatchedTargets` — see [`select_targets`].
/// - `Error::Auth` while processing a group.
/// - `Error::Io` when the session folder cannot be created.
pub async fn export_device_groups(
    client: &ApiClient,
    options: &DefenderExportOptions,
) -> Result<ExportManifest> {
    let groups = defender::list_groups(client).await?;
    info!(count = groups.len(), "device groups found");

    let targets = select_targets(&groups, &options.groups, |g: &DeviceGroup| g.name.as_str())?;

    let timestamp = run_timestamp();
    let session_dir = options
        .output_dir
        .join(format!("export_session_{timestamp}"));
    tokio::fs::create_dir_all(&session_dir).await?;

    let mut manifest = ExportManifest::default();
    for group in targets {
        info!(group = %group.name, id = %group.id, "processing group");

        let machines = match defender::list_machines(client, &group.id).await {
            Ok(m) => m,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                manifest.skip(&group.name, format!("listing machines failed: {e}"));
                continue;
            }
        };
        info!(group = %group.name, count = machines.len(), "machines found");

        let records: Vec<Record> = machines.into_iter().map(|m| m.into_record()).collect();
        let file_name =
            export::table_file_name(&options.file_prefix, &group.name, &timestamp, "xlsx");

        let path = session_dir.join(file_name);
        let written = tokio::task::spawn_blocking(move || export::write_table(&records, &path))
            .await
            .unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e))));

        match written {
            Ok(TableOutcome::Written { path, .. }) => manifest.entries.push(ManifestEntry {
                name: group.name.clone(),
                path,
            }),
            Ok(TableOutcome::Skipped) => manifest.skip(&group.name, "no machines to export"),
            Err(e) => manifest.skip(&group.name, e.to_string()),
        }
    }

    Ok(manifest)
}

/// Downloads every file with the configured extension from a SharePoint
/// folder into `destination`.
///
/// # Errors
///
/// - `Error::NotFound` when no site matches `site_name`.
/// - Resolving the site, drive or folder listing failed (any error).
/// - `Error::Auth` while downloading.
///
/// Items without a parent drive id are read from the resolved drive. A file
/// whose metadata cannot be fetched is saved under its name from the folder
/// listing. Names already produced in this run get a `_<n>` suffix.
pub async fn download_site_files(
    client: &ApiClient,
    options: &SharePointDownloadOptions,
) -> Result<ExportManifest> {
    let site_id = graph::find_site_id(client, &options.site_name)
        .await?
        .ok_or_else(|| Error::NotFound {
            kind: "site",
            name: options.site_name.clone(),
        })?;
    info!(site = %options.site_name, %site_id, "site resolved");

    let drive_id = match &options.drive_id {
        Some(id) => id.clone(),
        None => graph::default_drive_id(client, &site_id).await?,
    };
    info!(%drive_id, "drive resolved");

    let items = graph::list_drive_children(
        client,
        &site_id,
        Some(drive_id.as_str()),
        options.folder_path.as_deref(),
    )
    .await?;

    let files: Vec<_> = items
        .iter()
        .filter(|i| !i.is_folder() && i.has_extension(&options.extension))
        .collect();
    info!(count = files.len(), extension = %options.extension, "matching files found");

    let mut manifest = ExportManifest::default();
    let mut produced = HashSet::new();
    for item in files {
        let item_drive = item.drive_id().unwrap_or(drive_id.as_str());
        let outcome = download_one(
            client,
            &site_id,
            item_drive,
            item,
            &options.destination,
            &produced,
        )
        .await;
        match outcome {
            Ok(path) => {
                produced.insert(path.clone());
                manifest.entries.push(ManifestEntry {
                    name: item.name.clone(),
                    path,
                });
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => manifest.skip(&item.name, format!("download failed: {e}")),
        }
    }

    Ok(manifest)
}

async fn download_one(
    client: &ApiClient,
    site_id: &str,
    drive_id: &str,
    item: &DriveItem,
    destination: &Path,
    produced: &HashSet<PathBuf>,
) -> Result<PathBuf> {
    let download = graph::download_file(client, site_id, drive_id, &item.id).await?;
    let listed = export::sanitize_file_name(&item.name);
    let file_name = if download.name_from_metadata {
        export::sanitize_file_name(&download.file_name).or(listed)
    } else {
        listed.or(Some(download.file_name))
    }
    .unwrap_or_else(graph::fallback_file_name);
    let path = export::unique_path(destination.join(file_name), produced);
    let bytes = export::write_stream(download.content, &path).await?;
    info!(path = %path.display(), bytes, "file downloaded");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_filter_selects_everything() {
        let available = names(&["Finance", "IT"]);
        let selected = select_targets(&available, &[], |s: &String| s.as_str()).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn selection_follows_availability_order() {
        let available = names(&["Finance", "IT", "HR", "SST"]);
        let selected =
            select_targets(&available, &names(&["IT", "Finance"]), |s: &String| s.as_str()).unwrap();
        assert_eq!(selected, vec!["Finance", "IT"]);
    }

    #[test]
    fn partially_matched_filter_keeps_matches() {
        let available = names(&["Finance", "IT"]);
        let selected =
            select_targets(&available, &names(&["IT", "Legal"]), |s: &String| s.as_str()).unwrap();
        assert_eq!(selected, vec!["IT"]);
    }

    #[test]
    fn disjoint_filter_fails_with_both_sets() {
        let available = names(&["Finance", "IT"]);
        let err = select_targets(&available, &names(&["Legal"]), |s: &String| s.as_str()).unwrap_err();
        match err {
            Error::UnmatchedTargets {
                requested,
                available,
            } => {
                assert_eq!(requested, names(&["Legal"]));
                assert_eq!(available, names(&["Finance", "IT"]));
            }
            other => panic!("expected UnmatchedTargets, got {other:?}"),
        }
    }
}
