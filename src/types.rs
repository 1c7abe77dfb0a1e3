//! Core types for the zephyrgram client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The class name that marks a message as personal (direct), compared
/// case-insensitively.
pub const PERSONAL_CLASS: &str = "message";

/// Unique identifier for a stored zephyrgram.
///
/// Assigned by the store at append time; strictly increasing and never
/// reused over the lifetime of a store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZephyrgramId(pub u64);

impl ZephyrgramId {
    pub fn next(self) -> Self {
        ZephyrgramId(self.0 + 1)
    }
}

impl fmt::Debug for ZephyrgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZephyrgramId({})", self.0)
    }
}

impl fmt::Display for ZephyrgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A single zephyrgram as stored, immutable once appended.
///
/// `fields` is an ordered list of opaque text fields; by convention field 0
/// is the signature and field 1 the body, but a message may carry fewer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zephyrgram {
    /// Unique identifier (assigned by the store).
    pub id: ZephyrgramId,

    /// Sending principal; absent for unauthenticated senders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// Topic.
    pub class: String,

    /// Sub-topic.
    pub instance: String,

    /// Addressed party; absent for class-wide broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// Operation code, may be empty.
    pub opcode: String,

    /// Whether the transport verified the sender's signature.
    pub auth: bool,

    /// Delivery time, if the transport reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,

    /// Opaque text fields.
    pub fields: Vec<String>,
}

impl Zephyrgram {
    /// Field 0 by convention; empty when missing.
    pub fn signature(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    /// Field 1 by convention; empty when missing.
    pub fn body(&self) -> &str {
        self.fields.get(1).map(String::as_str).unwrap_or("")
    }

    /// A message is personal iff its class is `"message"`, case-insensitively.
    pub fn is_personal(&self) -> bool {
        self.class.eq_ignore_ascii_case(PERSONAL_CLASS)
    }
}

/// Input for a zephyrgram before the store assigns it an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZephyrgramInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub class: String,
    pub instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub opcode: String,
    pub auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    pub fields: Vec<String>,
}

impl ZephyrgramInput {
    /// Build a broadcast message on `class`/`instance` with the conventional
    /// signature and body fields.
    pub fn new(class: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            sender: None,
            class: class.into(),
            instance: instance.into(),
            recipient: None,
            opcode: String::new(),
            auth: false,
            time: None,
            fields: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_opcode(mut self, opcode: impl Into<String>) -> Self {
        self.opcode = opcode.into();
        self
    }

    pub fn with_auth(mut self, auth: bool) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_time(mut self, time: Timestamp) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Attach the id assigned by the store.
    pub(crate) fn into_zephyrgram(self, id: ZephyrgramId) -> Zephyrgram {
        Zephyrgram {
            id,
            sender: self.sender,
            class: self.class,
            instance: self.instance,
            recipient: self.recipient,
            opcode: self.opcode,
            auth: self.auth,
            time: self.time,
            fields: self.fields,
        }
    }
}

/// Strip leading `"un"` repetitions from a class name.
///
/// Returns the count of repetitions and the stripped base class, so
/// `"ununfoo"` yields `(2, "foo")` and `"foo"` yields `(0, "foo")`.
pub fn strip_un_prefix(class: &str) -> (u32, &str) {
    let mut depth = 0;
    let mut rest = class;
    while let Some(stripped) = rest.strip_prefix("un") {
        depth += 1;
        rest = stripped;
    }
    (depth, rest)
}

/// Prepend `depth` repetitions of `"un"` to a base class name.
pub fn un_class(base: &str, depth: u32) -> String {
    let mut name = "un".repeat(depth as usize);
    name.push_str(base);
    name
}
