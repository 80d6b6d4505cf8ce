//! Shared data model: panel states, messages and layout frames

use crate::error::TreeError;
use crate::path::ChannelPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wall-clock instant used for every activity timestamp
pub type Timestamp = DateTime<Utc>;

/// Lifecycle state for a panel within the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelState {
    /// Inside the hold window, or kept alive by an active descendant
    Active,
    /// Fading linearly towards zero weight
    Fading,
    /// Past the fade window; pruned on the next pass
    Removed,
}

impl PanelState {
    /// Rank used when folding child states into an ancestor
    #[inline]
    #[must_use]
    pub fn liveliness(self) -> u8 {
        match self {
            PanelState::Active => 2,
            PanelState::Fading => 1,
            PanelState::Removed => 0,
        }
    }

    /// The more active of two states
    #[inline]
    #[must_use]
    pub fn most_active(self, other: Self) -> Self {
        if other.liveliness() > self.liveliness() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for PanelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PanelState::Active => "active",
            PanelState::Fading => "fading",
            PanelState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Severity levels recognised by the message pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSeverity {
    /// Diagnostic detail
    Debug,
    /// Routine event
    #[default]
    Info,
    /// Needs attention
    Warn,
    /// Something failed
    Error,
}

impl FromStr for MessageSeverity {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(TreeError::InvalidSeverity(other.to_string())),
        }
    }
}

/// Unique message identifier (32 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload published to a hierarchical channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id
    pub id: MessageId,
    /// Destination channel
    pub channel: ChannelPath,
    /// Message body
    pub payload: String,
    /// Severity level
    pub severity: MessageSeverity,
    /// Receive time; drives decay
    pub received_at: Timestamp,
    /// Free-form key/value pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Message {
    /// Create a message with a fresh id
    #[must_use]
    pub fn new(
        channel: ChannelPath,
        payload: impl Into<String>,
        severity: MessageSeverity,
        received_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::new(),
            channel,
            payload: payload.into(),
            severity,
            received_at,
            metadata: None,
        }
    }

    /// Attach metadata
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Normalised rectangle describing panel placement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutRect {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Horizontal extent
    pub width: f64,
    /// Vertical extent
    pub height: f64,
}

impl LayoutRect {
    /// The whole canvas
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Rectangle from origin and size
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Width times height
    #[inline]
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Right edge
    #[inline]
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge
    #[inline]
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Computed layout data for a specific channel node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutFrame {
    /// Channel the frame belongs to
    pub path: ChannelPath,
    /// Placement on the unit canvas
    pub rect: LayoutRect,
    /// Lifecycle state
    pub state: PanelState,
    /// Weight used for sizing
    pub weight: f64,
    /// Instant the layout was computed for
    pub generated_at: Timestamp,
}
