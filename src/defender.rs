//! Device groups and machines from the Defender for Endpoint API.
//!
//! - [`list_groups`] — every device group, single page.
//! - [`list_machines`] — the machines belonging to one group.
//! - [`list_machines_filtered`] — machines matching an arbitrary filter.
//!
//! Machines are kept as opaque JSON objects: the export writes whatever
//! attributes the API returns, in the order it returns them.
//!
//! ## Permissions
//!
//! Requires `Machine.Read.All` (application).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::client::{ApiClient, ODataList};
use crate::filter::Filter;

/// A device group (RBAC machine group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    /// Group id. The API reports it as a number; strings are accepted too.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// Display name of the group.
    #[serde(default = "unnamed_group")]
    pub name: String,
}

fn unnamed_group() -> String {
    "unnamed_group".to_string()
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// A device as returned by the API, passed through without a schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Machine(pub Map<String, Value>);

impl Machine {
    /// The MDE machine id, if present.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Fully qualified DNS name, if present.
    pub fn computer_dns_name(&self) -> Option<&str> {
        self.0.get("computerDnsName").and_then(Value::as_str)
    }

    /// The attribute map, ready for export.
    pub fn into_record(self) -> Map<String, Value> {
        self.0
    }
}

/// Lists all device groups. No pagination: the API returns every group in
/// one response.
///
/// # Errors
///
/// - `Error::Api` — non-success status (e.g. 403 for missing permission).
/// - `Error::Auth` — token acquisition failed.
/// - `Error::Network` — transport-level failure.
pub async fn list_groups(client: &ApiClient) -> crate::error::Result<Vec<DeviceGroup>> {
    let response: ODataList<DeviceGroup> = client.get("api/machineGroups").await?;
    Ok(response.value)
}

/// Lists the machines that belong to the group `group_id` (first page).
///
/// The id is embedded through [`Filter`], so quotes in it are escaped.
///
/// # Errors
///
/// As [`list_groups`], plus `Error::InvalidFilter` when the id contains
/// control characters.
pub async fn list_machines(
    client: &ApiClient,
    group_id: &str,
) -> crate::error::Result<Vec<Machine>> {
    let filter = group_filter(group_id)?;
    list_machines_filtered(client, Some(&filter)).await
}

/// Lists machines, narrowed server-side by `filter` when given.
pub async fn list_machines_filtered(
    client: &ApiClient,
    filter: Option<&Filter>,
) -> crate::error::Result<Vec<Machine>> {
    let response: ODataList<Machine> = match filter {
        Some(f) => {
            client
                .get_with_query("api/machines", &[("$filter", f.as_str())])
                .await?
        }
        None => client.get("api/machines").await?,
    };
    Ok(response.value)
}

/// `machineGroups/any(g:g/id eq '<id>')`.
pub fn group_filter(group_id: &str) -> crate::error::Result<Filter> {
    let inner = Filter::eq("g/id", group_id)?;
    Filter::any("machineGroups", "g", &inner)
}
