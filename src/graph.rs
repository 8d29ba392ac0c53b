//! SharePoint sites, drives and files through Microsoft Graph.
//!
//! | Function | API Path |
//! |----------|----------|
//! | [`list_sites`] | GET `/v1.0/sites` |
//! | [`find_site_id`] | GET `/v1.0/sites` (client-side match) |
//! | [`list_drives`] | GET `/v1.0/sites/{site}/drives` |
//! | [`list_drive_children`] | GET `/v1.0/sites/{site}/drives/{drive}/root[:/{path}:]/children` |
//! | [`download_file`] | GET `.../items/{id}/content` then `.../items/{id}` |
//!
//! Listings are single-page: `@odata.nextLink` is not followed.
//!
//! ## Permissions
//!
//! Requires `Sites.Read.All` (application).

use std::pin::Pin;

use bytes::Bytes;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use crate::client::{ApiClient, ODataList};
use crate::error::{Error, Result};

// ── Response types ─────────────────────────────────────────────────────

/// A SharePoint site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Composite site id (`host,site-collection-guid,web-guid`).
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// A document library (drive) inside a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub drive_type: Option<String>,
}

/// Location of a drive item's parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    #[serde(default)]
    pub drive_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// A file or folder in a drive.
///
/// `file` and `folder` are Graph facets: exactly one is present on real
/// items. Their contents are not modelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub parent_reference: Option<ItemReference>,
    #[serde(default)]
    pub file: Option<serde_json::Value>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
}

impl DriveItem {
    /// The drive this item lives in, from its parent reference.
    pub fn drive_id(&self) -> Option<&str> {
        self.parent_reference.as_ref()?.drive_id.as_deref()
    }

    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    /// Case-insensitive suffix match, e.g. `has_extension(".csv")`.
    pub fn has_extension(&self, ext: &str) -> bool {
        self.name.to_lowercase().ends_with(&ext.to_lowercase())
    }

    pub fn is_csv(&self) -> bool {
        self.has_extension(".csv")
    }
}

/// Streamed file body.
pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

/// A file whose content is ready to be streamed to disk.
pub struct DownloadedFile {
    /// Remote display name, or a timestamped fallback when the metadata
    /// request failed.
    pub file_name: String,
    /// `false` when `file_name` is the fallback.
    pub name_from_metadata: bool,
    pub content: ContentStream,
}

// ── Endpoint functions ─────────────────────────────────────────────────

/// Lists the sites visible to the application.
pub async fn list_sites(client: &ApiClient) -> Result<Vec<Site>> {
    let response: ODataList<Site> = client.get("v1.0/sites").await?;
    Ok(response.value)
}

/// Returns the id of the first site, in listing order, whose display name
/// contains `needle` case-insensitively.
///
/// No match is `Ok(None)`; a failed listing is `Error::Api`.
pub async fn find_site_id(client: &ApiClient, needle: &str) -> Result<Option<String>> {
    let sites = list_sites(client).await?;
    Ok(first_matching_site(&sites, needle).map(|s| s.id.clone()))
}

fn first_matching_site<'a>(sites: &'a [Site], needle: &str) -> Option<&'a Site> {
    let needle = needle.to_lowercase();
    sites.iter().find(|s| {
        s.display_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&needle))
    })
}

/// Lists the drives (document libraries) of a site.
pub async fn list_drives(client: &ApiClient, site_id: &str) -> Result<Vec<Drive>> {
    let response: ODataList<Drive> = client
        .get(&format!("v1.0/sites/{}/drives", encode_id(site_id)))
        .await?;
    Ok(response.value)
}

/// The first drive of a site.
///
/// # Errors
///
/// `Error::NotFound` when the site has no drives.
pub async fn default_drive_id(client: &ApiClient, site_id: &str) -> Result<String> {
    list_drives(client, site_id)
        .await?
        .into_iter()
        .next()
        .map(|d| d.id)
        .ok_or_else(|| Error::NotFound {
            kind: "drive",
            name: format!("default drive of site {site_id}"),
        })
}

/// Lists the children of a folder, or of the drive root when
/// `folder_path` is `None`. Without `drive_id` the site's first drive is
/// used.
pub async fn list_drive_children(
    client: &ApiClient,
    site_id: &str,
    drive_id: Option<&str>,
    folder_path: Option<&str>,
) -> Result<Vec<DriveItem>> {
    let drive_id = match drive_id {
        Some(id) => id.to_string(),
        None => default_drive_id(client, site_id).await?,
    };
    let path = children_path(site_id, &drive_id, folder_path);
    let response: ODataList<DriveItem> = client.get(&path).await?;
    Ok(response.value)
}

/// Percent-encodes an id for use as a single path segment.
fn encode_id(id: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(id)
}

/// Builds the children path, percent-encoding each folder segment.
fn children_path(site_id: &str, drive_id: &str, folder_path: Option<&str>) -> String {
    let root = format!(
        "v1.0/sites/{}/drives/{}/root",
        encode_id(site_id),
        encode_id(drive_id)
    );
    let encoded = folder_path
        .map(|p| {
            p.split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    if encoded.is_empty() {
        format!("{root}/children")
    } else {
        format!("{root}:/{encoded}:/children")
    }
}

/// Opens a file's content stream and recovers its display name.
///
/// The content request is sent first; its failure is an error. The
/// metadata request only supplies the name: if it fails, the content is
/// still returned under a timestamped fallback name.
pub async fn download_file(
    client: &ApiClient,
    site_id: &str,
    drive_id: &str,
    file_id: &str,
) -> Result<DownloadedFile> {
    let item_path = format!(
        "v1.0/sites/{}/drives/{}/items/{}",
        encode_id(site_id),
        encode_id(drive_id),
        encode_id(file_id)
    );

    let resp = client.get_stream(&format!("{item_path}/content")).await?;
    let stream = resp.bytes_stream().map_err(std::io::Error::other);
    let content: ContentStream = Box::pin(StreamReader::<_, Bytes>::new(stream));

    let (file_name, name_from_metadata) = match client.get::<DriveItem>(&item_path).await {
        Ok(item) if !item.name.is_empty() => (item.name, true),
        Ok(_) => {
            warn!(file_id, "item metadata has no name, using fallback");
            (fallback_file_name(), false)
        }
        Err(e) => {
            warn!(file_id, error = %e, "item metadata request failed, using fallback name");
            (fallback_file_name(), false)
        }
    };
    info!(file_id, %file_name, "opened download");

    Ok(DownloadedFile {
        file_name,
        content,
        name_from_metadata,
    })
}

/// `downloaded_file_<YYYYmmddHHMMSS>.csv`.
pub fn fallback_file_name() -> String {
    format!(
        "downloaded_file_{}.csv",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    )
}
