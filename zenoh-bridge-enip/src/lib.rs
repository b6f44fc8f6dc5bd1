//! Zenoh bridge for EtherNet/IP controllers.
//!
//! This bridge polls controller tags in batches and publishes each batch to
//! Zenoh as a single JSON object or delimited string.
//!
//! # Key Expressions
//!
//! ```text
//! <topic_prefix>/data            tag readings of one device
//! <key_prefix>/@/status          bridge running/offline announcements
//! <key_prefix>/@/devices         periodic status report of every device
//! ```
//!
//! A device without an explicit `topic_prefix` publishes under `<key_prefix>/<name>`.

pub mod config;
pub mod simulator;
