/// Default key expression prefix for bridge status and device data.
pub const KEY_PREFIX: &str = "tagbridge";

/// Suffix appended to a device's topic prefix for its readings.
pub const DATA_SUFFIX: &str = "data";

/// Strip trailing `/` separators so prefixes join cleanly.
pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

/// Topic a device publishes its readings to: `<topic_prefix>/data`.
///
/// # Example
/// ```
/// use tagbridge_common::topic::data_topic;
///
/// assert_eq!(data_topic("ethernetip/plc01/"), "ethernetip/plc01/data");
/// assert_eq!(data_topic("ethernetip/plc01"), "ethernetip/plc01/data");
/// ```
pub fn data_topic(topic_prefix: &str) -> String {
    let prefix = normalize_prefix(topic_prefix);
    if prefix.is_empty() {
        DATA_SUFFIX.to_string()
    } else {
        format!("{}/{}", prefix, DATA_SUFFIX)
    }
}

/// Default topic prefix for a device without an explicit one: `<key_prefix>/<device>`.
pub fn default_topic_prefix(key_prefix: &str, device_name: &str) -> String {
    format!("{}/{}", normalize_prefix(key_prefix), device_name)
}

/// Key for the bridge status announcement: `<key_prefix>/@/status`.
pub fn status_key(key_prefix: &str) -> String {
    format!("{}/@/status", normalize_prefix(key_prefix))
}

/// Key for the periodic device status report: `<key_prefix>/@/devices`.
pub fn devices_key(key_prefix: &str) -> String {
    format!("{}/@/devices", normalize_prefix(key_prefix))
}

/// Wildcard matching every data topic under a prefix.
pub fn data_wildcard(key_prefix: &str) -> String {
    format!("{}/**/{}", normalize_prefix(key_prefix), DATA_SUFFIX)
}
