// crates/tether-types/src/lib.rs
// Shared wire types for the tether gateway client (native + WASM compatible)
// No native-only dependencies allowed here

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════
// MESSAGES
// ═══════════════════════════════════════

/// Who produced a message within a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single message in a session, as the gateway serializes it.
///
/// Ids and timestamps cross the wire as opaque strings; the client never
/// mints either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub channel: String,
    pub session_key: String,
    #[serde(default)]
    pub sender_id: String,
    pub content: String,
    pub role: Role,
    /// RFC 3339 creation timestamp
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// File attachment riding on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Audio,
    Video,
    Other,
}

// ═══════════════════════════════════════
// SESSIONS
// ═══════════════════════════════════════

/// Session summary returned by the gateway's session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub message_count: i64,
}

// ═══════════════════════════════════════
// RUNTIME SNAPSHOTS
// ═══════════════════════════════════════

/// Gateway runtime counters, also embedded in connected/heartbeat frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub tool_calls: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
}

/// Per-channel health as reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHealth {
    pub channel: String,
    pub configured: bool,
    pub native_supported: bool,
    pub status: String,
    #[serde(default)]
    pub last_inbound_at_ms: Option<i64>,
    #[serde(default)]
    pub last_outbound_at_ms: Option<i64>,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at_ms: Option<i64>,
    pub trend_1h: ChannelTrend,
}

/// Rolling one-hour activity window for a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTrend {
    pub window_minutes: u64,
    pub inbound_count: u64,
    pub outbound_count: u64,
    pub error_count: u64,
    pub stability: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHealthReport {
    pub channels: Vec<ChannelHealth>,
    pub configured_count: usize,
    pub native_supported_count: usize,
}

// ═══════════════════════════════════════
// REQUEST RECEIPTS
// ═══════════════════════════════════════

/// GET /api/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub uptime: String,
}

/// GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: String,
    pub version: String,
}

/// POST /api/message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub id: String,
    pub status: String,
}

/// POST /api/sessions/send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSendReceipt {
    pub status: String,
    pub session_key: String,
}

/// PUT /api/control/reload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadReceipt {
    pub status: String,
}

// ═══════════════════════════════════════
// PUSH STREAM EVENTS
// ═══════════════════════════════════════

/// Events pushed by the gateway on /ws/events.
///
/// `Error` is never sent by the gateway; the stream layer synthesizes it
/// for frames that fail to decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        metrics: Option<MetricsSnapshot>,
    },
    Heartbeat {
        #[serde(default)]
        metrics: Option<MetricsSnapshot>,
    },
    InboundMessage {
        message: Message,
    },
    OutboundMessage {
        message: Message,
    },
    SystemLog {
        level: String,
        message: String,
    },
    Lagged {
        skipped: u64,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// The session key of the carried message, if this event carries one.
    pub fn session_key(&self) -> Option<&str> {
        match self {
            StreamEvent::InboundMessage { message } | StreamEvent::OutboundMessage { message } => {
                Some(message.session_key.as_str())
            }
            _ => None,
        }
    }
}
