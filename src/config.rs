//! Run configuration loaded from a TOML file.
//!
//! ```toml
//! [credentials]
//! tenant_id = "00000000-0000-0000-0000-000000000000"
//! client_id = "11111111-1111-1111-1111-111111111111"
//! # client_secret = "..."   # prefer ENTRA_CLIENT_SECRET
//!
//! [defender]
//! groups = ["SST", "Finance", "IT", "HR"]
//! output_dir = "./defender_exports"
//!
//! [sharepoint]
//! site_name = "Reporting"
//! folder_path = "Documents/Folder_With_CSV"
//! destination = "./downloaded_sharepoint_files"
//! ```
//!
//! Nothing here is global: the loaded [`Config`] is handed to the
//! constructors that need it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::auth::{DEFAULT_AUTHORITY, TokenProvider};
use crate::error::{Error, Result};
use crate::orchestrate::{DefenderExportOptions, SharePointDownloadOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub credentials: Credentials,
    #[serde(default)]
    pub defender: DefenderConfig,
    #[serde(default)]
    pub sharepoint: Option<SharePointConfig>,
}

/// App registration used for the client-credential grant.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_authority")]
    pub authority: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authority", &self.authority)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefenderConfig {
    /// Groups to export; empty exports every group.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for DefenderConfig {
    fn default() -> Self {
        DefenderConfig {
            groups: Vec::new(),
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharePointConfig {
    pub site_name: String,
    #[serde(default)]
    pub folder_path: Option<String>,
    #[serde(default)]
    pub drive_id: Option<String>,
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./defender_exports")
}

fn default_file_prefix() -> String {
    "defender_machines".to_string()
}

fn default_destination() -> PathBuf {
    PathBuf::from("./downloaded_sharepoint_files")
}

fn default_extension() -> String {
    ".csv".to_string()
}

impl Config {
    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.credentials.tenant_id.trim().is_empty() {
            return Err(Error::Config("credentials.tenant_id is empty".to_string()));
        }
        if self.credentials.client_id.trim().is_empty() {
            return Err(Error::Config("credentials.client_id is empty".to_string()));
        }
        Ok(())
    }

    /// Builds a token provider for `scope`.
    ///
    /// `secret` (from the command line or environment) takes precedence
    /// over `credentials.client_secret`.
    ///
    /// # Errors
    ///
    /// `Error::Config` when no secret is available from either source.
    pub fn token_provider(&self, secret: Option<&str>, scope: &str) -> Result<TokenProvider> {
        let secret = secret
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.credentials
                    .client_secret
                    .as_deref()
                    .filter(|s| !s.is_empty())
            })
            .ok_or_else(|| {
                Error::Config(
                    "no client secret: set ENTRA_CLIENT_SECRET, pass --secret, or set credentials.client_secret"
                        .to_string(),
                )
            })?;
        Ok(TokenProvider::new(
            &self.credentials.tenant_id,
            &self.credentials.client_id,
            secret,
            vec![scope.to_string()],
        )
        .with_authority(&self.credentials.authority))
    }

    /// Defender export settings; non-empty `groups` replaces the
    /// configured list.
    pub fn defender_options(&self, groups: &[String]) -> DefenderExportOptions {
        DefenderExportOptions {
            groups: if groups.is_empty() {
                self.defender.groups.clone()
            } else {
                groups.to_vec()
            },
            output_dir: self.defender.output_dir.clone(),
            file_prefix: self.defender.file_prefix.clone(),
        }
    }

    /// SharePoint download settings, with optional overrides.
    ///
    /// # Errors
    ///
    /// `Error::Config` when neither the file nor `site` names a site.
    pub fn sharepoint_options(
        &self,
        site: Option<&str>,
        folder: Option<&str>,
    ) -> Result<SharePointDownloadOptions> {
        let section = self.sharepoint.as_ref();
        let site_name = site
            .map(str::to_string)
            .or_else(|| section.map(|s| s.site_name.clone()))
            .ok_or_else(|| Error::Config("no SharePoint site configured".to_string()))?;

        Ok(SharePointDownloadOptions {
            site_name,
            drive_id: section.and_then(|s| s.drive_id.clone()),
            folder_path: folder
                .map(str::to_string)
                .or_else(|| section.and_then(|s| s.folder_path.clone())),
            destination: section.map_or_else(default_destination, |s| s.destination.clone()),
            extension: section.map_or_else(default_extension, |s| s.extension.clone()),
        })
    }
}
