//! Async Rust client for exporting Microsoft Defender for Endpoint device
//! groups and SharePoint files using Entra ID app credentials.
//!
//! Provides client-credential authentication, one authenticated HTTP
//! client parameterized by API base URL, spreadsheet/CSV and streaming
//! file writers, and sequential orchestration that produces a manifest of
//! written files.
//!
//! # Modules
//!
//! - [`auth`] — OAuth2 client credentials token provider.
//! - [`client`] — Authenticated HTTP wrapper shared by both APIs.
//! - [`config`] — TOML run configuration.
//! - [`defender`] — Device groups and machines.
//! - [`error`] — Typed error hierarchy (`Error`) for all operations.
//! - [`export`] — Spreadsheet/CSV tables and streamed file writes.
//! - [`filter`] — Escaping OData `$filter` builder.
//! - [`graph`] — SharePoint sites, drives and file downloads.
//! - [`orchestrate`] — Per-target fetch-and-write runs.
//!
//! # Quick Start
//!
//! ```ignore
//! use entra_export::auth::{TokenProvider, DEFENDER_SCOPE};
//! use entra_export::client::ApiClient;
//! use entra_export::orchestrate::{export_device_groups, DefenderExportOptions};
//!
//! let tp = TokenProvider::new("tenant", "client_id", "secret", vec![DEFENDER_SCOPE.into()]);
//! let client = ApiClient::defender(tp)?;
//! let options = DefenderExportOptions {
//!     groups: vec!["Finance".into(), "IT".into()],
//!     output_dir: "./defender_exports".into(),
//!     file_prefix: "defender_machines".into(),
//! };
//! let manifest = export_device_groups(&client, &options).await?;
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod defender;
pub mod error;
pub mod export;
pub mod filter;
pub mod graph;
pub mod orchestrate;
