//! # Data Model
//!
//! Endpoint parameters, the mode bitsets handed to the host, tag values and
//! the batch descriptor delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Session open options (`CT_OPEN_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenMode(pub u32);

impl OpenMode {
    /// No options.
    pub const NO_OPTION: OpenMode = OpenMode(0x0000_0000);
    /// Encrypt the link.
    pub const CRYPT: OpenMode = OpenMode(0x0000_0001);
    /// Let the host library reconnect on its own.
    pub const RECONNECT: OpenMode = OpenMode(0x0000_0002);
    /// Reject writes.
    pub const READ_ONLY: OpenMode = OpenMode(0x0000_0004);
    /// Batch mode.
    pub const BATCH: OpenMode = OpenMode(0x0000_0008);

    /// True when every bit of `other` is set.
    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;
    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// Tag list creation mode (`CT_LIST_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListMode(pub u32);

impl ListMode {
    /// The host emits change events for the list.
    pub const EVENT: ListMode = ListMode(0x0000_0001);
    /// Lightweight mode: no full re-reads required.
    pub const LIGHTWEIGHT: ListMode = ListMode(0x0000_0002);

    /// True when every bit of `other` is set.
    pub fn contains(self, other: ListMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ListMode {
    fn default() -> Self {
        ListMode::EVENT | ListMode::LIGHTWEIGHT
    }
}

impl BitOr for ListMode {
    type Output = ListMode;
    fn bitor(self, rhs: ListMode) -> ListMode {
        ListMode(self.0 | rhs.0)
    }
}

/// Which list events to drain (`CT_LIST_EVENT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMask(pub u32);

impl EventMask {
    /// A new value arrived.
    pub const NEW: EventMask = EventMask(0x0000_0001);
    /// The tag's status changed.
    pub const STATUS: EventMask = EventMask(0x0000_0002);

    /// True when every bit of `other` is set.
    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::NEW | EventMask::STATUS
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// # Endpoint
///
/// Where and as whom a connection opens its session. Immutable once a
/// `Connection` has been built from it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Host address of the CtAPI server.
    pub host: String,
    /// User name for the session.
    pub username: String,
    /// Password for the session.
    pub password: String,
    /// Session open options.
    #[serde(default)]
    pub mode: OpenMode,
}

impl Endpoint {
    /// Endpoint with `OpenMode::NO_OPTION`.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            mode: OpenMode::NO_OPTION,
        }
    }

    /// Same endpoint with different open options.
    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"*****")
            .field("mode", &self.mode)
            .finish()
    }
}

/// Per-tag options passed to the host when a tag joins a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagOptions {
    /// Read raw (unscaled) values.
    pub raw_mode: bool,
    /// Host-side poll period for the tag.
    pub poll_period_ms: u32,
    /// Deadband as a percentage of range; negative disables it.
    pub deadband_percent: f64,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            raw_mode: false,
            poll_period_ms: 300,
            deadband_percent: -1.0,
        }
    }
}

/// A tag's current value as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// All-digit text.
    Integer(i64),
    /// Digits, one point, digits.
    Float(f64),
    /// Anything else, verbatim.
    Text(String),
}

impl TagValue {
    /// Interprets the host's textual value.
    ///
    /// Only plain unsigned digit runs become numbers; signs, exponents and
    /// surrounding whitespace keep the value textual.
    pub fn parse(raw: &str) -> TagValue {
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        if all_digits(raw) {
            if let Ok(v) = raw.parse::<i64>() {
                return TagValue::Integer(v);
            }
        } else if let Some((whole, frac)) = raw.split_once('.') {
            if all_digits(whole) && all_digits(frac) {
                if let Ok(v) = raw.parse::<f64>() {
                    return TagValue::Float(v);
                }
            }
        }
        TagValue::Text(raw.to_string())
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Integer(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

/// One changed tag inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagEvent {
    /// Tag name.
    pub tag: String,
    /// Value read right after the change event.
    pub value: TagValue,
}

/// # Event Batch
///
/// Everything one poll cycle drained from one list, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBatch {
    /// When draining started.
    pub timestamp: DateTime<Utc>,
    /// List the events came from.
    pub list: String,
    /// Host of the connection that produced the batch.
    pub host: String,
    /// Changed tags in arrival order.
    pub events: Vec<TagEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_value_parse_rules() {
        assert_eq!(TagValue::parse("42"), TagValue::Integer(42));
        assert_eq!(TagValue::parse("3.25"), TagValue::Float(3.25));
        assert_eq!(TagValue::parse("-3"), TagValue::Text("-3".into()));
        assert_eq!(TagValue::parse("1.2.3"), TagValue::Text("1.2.3".into()));
        assert_eq!(TagValue::parse(".5"), TagValue::Text(".5".into()));
        assert_eq!(TagValue::parse("RUNNING"), TagValue::Text("RUNNING".into()));
        assert_eq!(TagValue::parse(""), TagValue::Text(String::new()));
    }

    #[test]
    fn test_tag_value_serializes_untagged() {
        let batch = vec![TagValue::Integer(1), TagValue::Float(0.5), TagValue::from("ON")];
        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(json, r#"[1,0.5,"ON"]"#);
    }

    #[test]
    fn test_endpoint_debug_masks_password() {
        let ep = Endpoint::new("10.0.0.5", "engineer", "control");
        let shown = format!("{:?}", ep);
        assert!(shown.contains("engineer"));
        assert!(!shown.contains("control"));
    }

    #[test]
    fn test_default_modes_match_event_lightweight_lists() {
        assert_eq!(ListMode::default(), ListMode(0x3));
        assert_eq!(EventMask::default(), EventMask(0x3));
        assert!((OpenMode::CRYPT | OpenMode::READ_ONLY).contains(OpenMode::READ_ONLY));
        assert!(!OpenMode::NO_OPTION.contains(OpenMode::BATCH));
    }
}
