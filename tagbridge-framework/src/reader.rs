//! Tag reader abstraction.
//!
//! A [`TagReader`] opens a [`TagConnection`] to one controller; the session
//! reads a whole batch through it and closes it again every cycle.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tagbridge_common::{TagReading, TagSnapshot, TagValue};

use crate::error::{BridgeError, Result};

/// Where to reach a controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadTarget {
    pub host: String,
    pub slot: u8,
}

impl std::fmt::Display for ReadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.slot)
    }
}

/// Result of reading one tag; `value` is `None` when the read failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRead {
    pub tag: String,
    pub value: Option<TagValue>,
}

impl RawRead {
    pub fn ok(tag: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            tag: tag.into(),
            value: Some(value.into()),
        }
    }

    pub fn failed(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: None,
        }
    }
}

/// An open connection to a controller.
#[async_trait]
pub trait TagConnection: Send {
    /// Read every tag in one batch.
    ///
    /// Per-tag failures are reported as `value: None`. An `Err` means the
    /// connection itself failed and the whole batch is lost.
    async fn read_batch(&mut self, tags: &[String]) -> Result<Vec<RawRead>>;

    /// Release the connection.
    async fn close(&mut self);
}

/// Factory for controller connections.
#[async_trait]
pub trait TagReader: Send + Sync {
    /// Open a connection, giving up after `timeout`.
    async fn open(&self, target: &ReadTarget, timeout: Duration)
    -> Result<Box<dyn TagConnection>>;
}

/// Open a connection, read `tags` and close it again.
///
/// The snapshot holds exactly one entry per requested tag, in request order.
/// Tags the reader failed or did not report come back as failed readings.
pub async fn read_tags(
    reader: &dyn TagReader,
    target: &ReadTarget,
    tags: &[String],
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<TagSnapshot> {
    let mut conn = match tokio::time::timeout(connect_timeout, reader.open(target, connect_timeout))
        .await
    {
        Ok(conn) => conn?,
        Err(_) => {
            return Err(BridgeError::reader(format!(
                "connection to {} timed out after {:?}",
                target, connect_timeout
            )));
        }
    };

    let result = tokio::time::timeout(read_timeout, conn.read_batch(tags)).await;
    conn.close().await;

    let reads = match result {
        Ok(reads) => reads?,
        Err(_) => {
            return Err(BridgeError::reader(format!(
                "reading {} tags from {} timed out after {:?}",
                tags.len(),
                target,
                read_timeout
            )));
        }
    };

    let mut values: HashMap<String, Option<TagValue>> =
        reads.into_iter().map(|r| (r.tag, r.value)).collect();

    let snapshot = tags
        .iter()
        .map(|tag| {
            let reading = match values.remove(tag).flatten() {
                Some(value) => TagReading::value(value),
                None => TagReading::failed(),
            };
            (tag.clone(), reading)
        })
        .collect();

    Ok(snapshot)
}
