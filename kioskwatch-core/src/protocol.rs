//! Signaling wire protocol.
//!
//! Every frame on the signaling WebSocket is a JSON object with a `type`
//! discriminator. The catalogue is closed: unknown types are rejected with
//! `SIGNALING_BAD_MESSAGE`, unknown fields inside a known type are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CallStateError, KioskId};

/// Stable machine-readable error codes carried in `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "SIGNALING_NO_SESSION")]
    NoSession,
    #[serde(rename = "SIGNALING_INVALID_TARGET")]
    InvalidTarget,
    #[serde(rename = "SIGNALING_NOT_OWNER")]
    NotOwner,
    #[serde(rename = "SIGNALING_BAD_ROLE")]
    BadRole,
    #[serde(rename = "SIGNALING_BAD_MESSAGE")]
    BadMessage,
    #[serde(rename = "INVALID_CALL_STATE")]
    InvalidCallState,
    #[serde(rename = "NO_ACTIVE_CALL")]
    NoActiveCall,
    #[serde(rename = "KIOSK_NOT_FOUND")]
    KioskNotFound,
    #[serde(rename = "SESSION_CONFLICT")]
    SessionConflict,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSession => "SIGNALING_NO_SESSION",
            Self::InvalidTarget => "SIGNALING_INVALID_TARGET",
            Self::NotOwner => "SIGNALING_NOT_OWNER",
            Self::BadRole => "SIGNALING_BAD_ROLE",
            Self::BadMessage => "SIGNALING_BAD_MESSAGE",
            Self::InvalidCallState => "INVALID_CALL_STATE",
            Self::NoActiveCall => "NO_ACTIVE_CALL",
            Self::KioskNotFound => "KIOSK_NOT_FOUND",
            Self::SessionConflict => "SESSION_CONFLICT",
        }
    }
}

impl From<CallStateError> for ErrorCode {
    fn from(err: CallStateError) -> Self {
        match err {
            CallStateError::InvalidCallState => Self::InvalidCallState,
            CallStateError::NoActiveCall => Self::NoActiveCall,
        }
    }
}

/// Commands a client may send over the signaling socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    RegisterKiosk,
    RegisterMonitor,
    GetOnlineKiosks,
    StartMonitoring { kiosk_id: KioskId },
    StopMonitoring { kiosk_id: KioskId },
    CallRequest { kiosk_id: KioskId },
    CallAccept { kiosk_id: KioskId },
    CallReject { kiosk_id: KioskId },
    CallEnd { kiosk_id: KioskId },
    ToggleVideo { kiosk_id: KioskId, enabled: bool },
    ToggleAudio { kiosk_id: KioskId, enabled: bool },
    Ping,
}

/// Summary of one online kiosk, included in kiosk-list events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KioskSummary {
    pub kiosk_id: KioskId,
    pub connected_at: DateTime<Utc>,
}

/// Events the hub sends to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    KioskRegistered,
    MonitorRegistered {
        online_kiosks: Vec<KioskSummary>,
    },
    OnlineKiosksList {
        kiosks: Vec<KioskSummary>,
        count: usize,
        timestamp: DateTime<Utc>,
    },
    KioskOnline {
        kiosk_id: KioskId,
        timestamp: DateTime<Utc>,
    },
    KioskOffline {
        kiosk_id: KioskId,
        timestamp: DateTime<Utc>,
        reason: String,
    },
    MonitoringStarted {
        kiosk_id: KioskId,
    },
    MonitoringStopped {
        kiosk_id: KioskId,
        reason: String,
    },
    CallRequest {
        from_id: String,
    },
    CallRequestSent {
        kiosk_id: KioskId,
    },
    CallAccepted {
        from_id: String,
    },
    CallAcceptConfirmed {
        kiosk_id: KioskId,
    },
    CallRejected {
        from_id: String,
    },
    CallEnded {
        from_id: String,
    },
    CallEndConfirmed {
        kiosk_id: KioskId,
    },
    VideoToggled {
        from_id: String,
        enabled: bool,
    },
    VideoToggleConfirmed {
        enabled: bool,
    },
    AudioToggled {
        from_id: String,
        enabled: bool,
    },
    AudioToggleConfirmed {
        enabled: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong,
}

impl ServerEvent {
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Event type string as it appears on the wire, for logging
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::KioskRegistered => "kiosk-registered",
            Self::MonitorRegistered { .. } => "monitor-registered",
            Self::OnlineKiosksList { .. } => "online-kiosks-list",
            Self::KioskOnline { .. } => "kiosk-online",
            Self::KioskOffline { .. } => "kiosk-offline",
            Self::MonitoringStarted { .. } => "monitoring-started",
            Self::MonitoringStopped { .. } => "monitoring-stopped",
            Self::CallRequest { .. } => "call-request",
            Self::CallRequestSent { .. } => "call-request-sent",
            Self::CallAccepted { .. } => "call-accepted",
            Self::CallAcceptConfirmed { .. } => "call-accept-confirmed",
            Self::CallRejected { .. } => "call-rejected",
            Self::CallEnded { .. } => "call-ended",
            Self::CallEndConfirmed { .. } => "call-end-confirmed",
            Self::VideoToggled { .. } => "video-toggled",
            Self::VideoToggleConfirmed { .. } => "video-toggle-confirmed",
            Self::AudioToggled { .. } => "audio-toggled",
            Self::AudioToggleConfirmed { .. } => "audio-toggle-confirmed",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}
