//! Rendering of tag snapshots into publish payloads.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::TagSnapshot;

/// Reserved payload key holding the hardware identifier.
pub const HWID_KEY: &str = "HWID";

/// Reserved payload key holding the publish timestamp.
pub const TIMESTAMP_KEY: &str = "Timestamp";

/// Wire encoding used when publishing a device's readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishFormat {
    /// Flat JSON object: `{"HWID": .., "<tag>": .., "Timestamp": ..}`.
    #[default]
    Json,

    /// Comma-joined `HWID,value1,value2,...,Timestamp`.
    ///
    /// Carries no tag names, so consumers need the tag order out of band.
    #[serde(alias = "string", alias = "delimited-string")]
    Delimited,
}

impl PublishFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishFormat::Json => "json",
            PublishFormat::Delimited => "delimited",
        }
    }

    /// Content type advertised for payloads in this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            PublishFormat::Json => "application/json",
            PublishFormat::Delimited => "text/plain",
        }
    }
}

impl std::fmt::Display for PublishFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ISO-8601 (RFC 3339, UTC, millisecond precision) timestamp used in payloads.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render a snapshot in the requested format.
///
/// Tags whose read failed are omitted. Tags named like a reserved key
/// (`HWID`, `Timestamp`) are skipped so the reserved fields stay intact.
pub fn format_payload(
    format: PublishFormat,
    hwid: &str,
    snapshot: &TagSnapshot,
    timestamp: DateTime<Utc>,
) -> String {
    match format {
        PublishFormat::Json => json_payload(hwid, snapshot, timestamp).to_string(),
        PublishFormat::Delimited => delimited_payload(hwid, snapshot, timestamp),
    }
}

/// Build the flat JSON object. `HWID` comes first and `Timestamp` last.
pub fn json_payload(
    hwid: &str,
    snapshot: &TagSnapshot,
    timestamp: DateTime<Utc>,
) -> serde_json::Value {
    let mut object = serde_json::Map::with_capacity(snapshot.len() + 2);
    object.insert(HWID_KEY.to_string(), hwid.into());

    for (tag, value) in published_values(snapshot) {
        object.insert(tag.to_string(), value.to_json());
    }

    object.insert(TIMESTAMP_KEY.to_string(), format_timestamp(timestamp).into());
    serde_json::Value::Object(object)
}

/// Build the comma-joined string form.
pub fn delimited_payload(hwid: &str, snapshot: &TagSnapshot, timestamp: DateTime<Utc>) -> String {
    let mut fields = Vec::with_capacity(snapshot.len() + 2);
    fields.push(hwid.to_string());
    fields.extend(published_values(snapshot).map(|(_, value)| value.to_string()));
    fields.push(format_timestamp(timestamp));
    fields.join(",")
}

fn published_values(
    snapshot: &TagSnapshot,
) -> impl Iterator<Item = (&str, &crate::tag::TagValue)> {
    snapshot
        .values()
        .filter(|(tag, _)| *tag != HWID_KEY && *tag != TIMESTAMP_KEY)
}
