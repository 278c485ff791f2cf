use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{ClientRole, ConnectionId, KioskId, MonitorId};

/// Lifecycle status of a monitoring session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Call sub-state of a session.
///
/// Connected always carries its start timestamp and Connecting always
/// carries the initiator, so the "connected implies started_at" and
/// "idle implies no initiator" invariants hold by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting {
        initiated_by: ClientRole,
    },
    Connected {
        initiated_by: ClientRole,
        started_at: DateTime<Utc>,
    },
}

impl CallState {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Rejected call-machine transitions, mapped to protocol error codes by
/// the signaling service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStateError {
    /// `call-request` while a call is already in progress
    InvalidCallState,
    /// accept/reject/end while no call is in progress
    NoActiveCall,
}

/// Per-side media flags. A call starts with both directions enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFlags {
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            video_enabled: true,
            audio_enabled: true,
        }
    }
}

/// Media flags for both session participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaState {
    pub monitor: MediaFlags,
    pub kiosk: MediaFlags,
}

impl MediaState {
    pub fn side_mut(&mut self, role: ClientRole) -> &mut MediaFlags {
        match role {
            ClientRole::Monitor => &mut self.monitor,
            ClientRole::Kiosk => &mut self.kiosk,
        }
    }

    #[must_use]
    pub const fn side(&self, role: ClientRole) -> &MediaFlags {
        match role {
            ClientRole::Monitor => &self.monitor,
            ClientRole::Kiosk => &self.kiosk,
        }
    }
}

/// A monitoring relationship between one monitor and one kiosk.
///
/// Keyed by kiosk id in the session store; at most one active session per
/// kiosk exists at any time.
#[derive(Debug, Clone)]
pub struct Session {
    pub kiosk_id: KioskId,
    pub monitor_id: MonitorId,
    pub monitor_connection: ConnectionId,
    pub started_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub status: SessionStatus,
    pub call: CallState,
    pub media: MediaState,
}

impl Session {
    #[must_use]
    pub fn new(kiosk_id: KioskId, monitor_id: MonitorId, monitor_connection: ConnectionId) -> Self {
        Self {
            kiosk_id,
            monitor_id,
            monitor_connection,
            started_at: Utc::now(),
            last_activity: Instant::now(),
            status: SessionStatus::Active,
            call: CallState::Idle,
            media: MediaState::default(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// `call-request` from `from`: Idle → Connecting
    pub fn request_call(&mut self, from: ClientRole) -> Result<(), CallStateError> {
        match self.call {
            CallState::Idle => {
                self.call = CallState::Connecting { initiated_by: from };
                Ok(())
            }
            _ => Err(CallStateError::InvalidCallState),
        }
    }

    /// `call-accept` from `from`: Connecting → Connected, only from the
    /// side opposite the initiator
    pub fn accept_call(&mut self, from: ClientRole) -> Result<(), CallStateError> {
        match self.call {
            CallState::Connecting { initiated_by } if initiated_by != from => {
                self.call = CallState::Connected {
                    initiated_by,
                    started_at: Utc::now(),
                };
                Ok(())
            }
            CallState::Connecting { .. } | CallState::Connected { .. } => {
                Err(CallStateError::InvalidCallState)
            }
            CallState::Idle => Err(CallStateError::NoActiveCall),
        }
    }

    /// `call-reject` from `from`: Connecting → Idle, only from the side
    /// opposite the initiator
    pub fn reject_call(&mut self, from: ClientRole) -> Result<ClientRole, CallStateError> {
        match self.call {
            CallState::Connecting { initiated_by } if initiated_by != from => {
                self.call = CallState::Idle;
                Ok(initiated_by)
            }
            CallState::Connecting { .. } | CallState::Connected { .. } => {
                Err(CallStateError::InvalidCallState)
            }
            CallState::Idle => Err(CallStateError::NoActiveCall),
        }
    }

    /// `call-end` from either side: Connecting/Connected → Idle.
    /// Resets media flags along with the call fields.
    pub fn end_call(&mut self) -> Result<(), CallStateError> {
        match self.call {
            CallState::Connecting { .. } | CallState::Connected { .. } => {
                self.call = CallState::Idle;
                self.media = MediaState::default();
                Ok(())
            }
            CallState::Idle => Err(CallStateError::NoActiveCall),
        }
    }

    /// Media toggles are admitted only while connected
    pub fn toggle_video(&mut self, from: ClientRole, enabled: bool) -> Result<(), CallStateError> {
        if !self.call.is_connected() {
            return Err(CallStateError::NoActiveCall);
        }
        self.media.side_mut(from).video_enabled = enabled;
        Ok(())
    }

    pub fn toggle_audio(&mut self, from: ClientRole, enabled: bool) -> Result<(), CallStateError> {
        if !self.call.is_connected() {
            return Err(CallStateError::NoActiveCall);
        }
        self.media.side_mut(from).audio_enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            KioskId::from("k1"),
            MonitorId::from("m1"),
            ConnectionId::from("c1"),
        )
    }

    #[test]
    fn test_happy_call_transitions() {
        let mut s = session();
        assert!(s.call.is_idle());

        s.request_call(ClientRole::Monitor).unwrap();
        assert_eq!(
            s.call,
            CallState::Connecting {
                initiated_by: ClientRole::Monitor
            }
        );

        s.accept_call(ClientRole::Kiosk).unwrap();
        assert!(s.call.is_connected());

        s.end_call().unwrap();
        assert!(s.call.is_idle());
    }

    #[test]
    fn test_connected_carries_start_time() {
        let mut s = session();
        s.request_call(ClientRole::Kiosk).unwrap();
        s.accept_call(ClientRole::Monitor).unwrap();
        match s.call {
            CallState::Connected { initiated_by, .. } => {
                assert_eq!(initiated_by, ClientRole::Kiosk);
            }
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[test]
    fn test_request_while_not_idle_rejected() {
        let mut s = session();
        s.request_call(ClientRole::Monitor).unwrap();
        assert_eq!(
            s.request_call(ClientRole::Monitor),
            Err(CallStateError::InvalidCallState)
        );

        s.accept_call(ClientRole::Kiosk).unwrap();
        assert_eq!(
            s.request_call(ClientRole::Kiosk),
            Err(CallStateError::InvalidCallState)
        );
    }

    #[test]
    fn test_accept_from_initiator_rejected() {
        let mut s = session();
        s.request_call(ClientRole::Monitor).unwrap();
        assert_eq!(
            s.accept_call(ClientRole::Monitor),
            Err(CallStateError::InvalidCallState)
        );
    }

    #[test]
    fn test_accept_reject_end_while_idle() {
        let mut s = session();
        assert_eq!(
            s.accept_call(ClientRole::Kiosk),
            Err(CallStateError::NoActiveCall)
        );
        assert_eq!(
            s.reject_call(ClientRole::Kiosk),
            Err(CallStateError::NoActiveCall)
        );
        assert_eq!(s.end_call(), Err(CallStateError::NoActiveCall));
    }

    #[test]
    fn test_reject_returns_to_idle() {
        let mut s = session();
        s.request_call(ClientRole::Monitor).unwrap();
        let initiator = s.reject_call(ClientRole::Kiosk).unwrap();
        assert_eq!(initiator, ClientRole::Monitor);
        assert!(s.call.is_idle());
    }

    #[test]
    fn test_end_resets_media_state() {
        let mut s = session();
        s.request_call(ClientRole::Monitor).unwrap();
        s.accept_call(ClientRole::Kiosk).unwrap();
        s.toggle_video(ClientRole::Monitor, false).unwrap();
        assert!(!s.media.monitor.video_enabled);

        s.end_call().unwrap();
        assert!(s.media.monitor.video_enabled);
    }

    #[test]
    fn test_media_toggle_requires_connected() {
        let mut s = session();
        assert_eq!(
            s.toggle_audio(ClientRole::Monitor, false),
            Err(CallStateError::NoActiveCall)
        );

        s.request_call(ClientRole::Monitor).unwrap();
        assert_eq!(
            s.toggle_video(ClientRole::Monitor, false),
            Err(CallStateError::NoActiveCall)
        );
    }

    #[test]
    fn test_media_toggle_idempotent() {
        let mut s = session();
        s.request_call(ClientRole::Monitor).unwrap();
        s.accept_call(ClientRole::Kiosk).unwrap();

        s.toggle_video(ClientRole::Monitor, false).unwrap();
        s.toggle_video(ClientRole::Monitor, false).unwrap();
        assert!(!s.media.monitor.video_enabled);
        // The kiosk side is untouched
        assert!(s.media.kiosk.video_enabled);
    }
}
