//! Signaling service: presence, sessions, and the call state machine.
//!
//! One logical authority owns both stores. Per-session mutations happen
//! under the sharded map's entry guard, so transitions on a single
//! session are serialized while distinct sessions proceed in parallel.
//! Outbound events go through the presence map's bounded channels and
//! never block command handling.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{ClientRole, ConnectionId, KioskId, MonitorId, Session};
use crate::protocol::{ClientCommand, ErrorCode, ServerEvent};
use crate::service::presence::{EventSender, PresenceEntry, PresenceMap};

/// Who is issuing a command: resolved at WebSocket admission time
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub client_id: String,
    pub role: ClientRole,
    pub connection_id: ConnectionId,
    pub sender: EventSender,
}

impl ClientContext {
    fn reply(&self, event: ServerEvent) {
        let event_type = event.event_type();
        if let Err(err) = self.sender.try_send(event) {
            warn!(
                client_id = %self.client_id,
                event_type,
                error = %err,
                "Failed to queue reply, dropping"
            );
        }
    }

    fn reply_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.reply(ServerEvent::error(code, message));
    }
}

/// Stateful presence + session authority for the hub
pub struct SignalingService {
    presence: PresenceMap,
    sessions: DashMap<KioskId, Session>,
    session_timeout: Duration,
}

impl SignalingService {
    #[must_use]
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            presence: PresenceMap::new(),
            sessions: DashMap::new(),
            session_timeout,
        }
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceMap {
        &self.presence
    }

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Dispatch one inbound command
    pub fn handle_command(&self, ctx: &ClientContext, command: ClientCommand) {
        debug!(
            client_id = %ctx.client_id,
            role = %ctx.role,
            command = ?command,
            "Handling signaling command"
        );

        match command {
            ClientCommand::RegisterKiosk => self.register_kiosk(ctx),
            ClientCommand::RegisterMonitor => self.register_monitor(ctx),
            ClientCommand::GetOnlineKiosks => self.get_online_kiosks(ctx),
            ClientCommand::StartMonitoring { kiosk_id } => self.start_monitoring(ctx, &kiosk_id),
            ClientCommand::StopMonitoring { kiosk_id } => self.stop_monitoring(ctx, &kiosk_id),
            ClientCommand::CallRequest { kiosk_id } => self.call_request(ctx, &kiosk_id),
            ClientCommand::CallAccept { kiosk_id } => self.call_accept(ctx, &kiosk_id),
            ClientCommand::CallReject { kiosk_id } => self.call_reject(ctx, &kiosk_id),
            ClientCommand::CallEnd { kiosk_id } => self.call_end(ctx, &kiosk_id),
            ClientCommand::ToggleVideo { kiosk_id, enabled } => {
                self.toggle_media(ctx, &kiosk_id, MediaKind::Video, enabled);
            }
            ClientCommand::ToggleAudio { kiosk_id, enabled } => {
                self.toggle_media(ctx, &kiosk_id, MediaKind::Audio, enabled);
            }
            ClientCommand::Ping => self.ping(ctx),
        }
    }

    fn register_kiosk(&self, ctx: &ClientContext) {
        if ctx.role != ClientRole::Kiosk {
            ctx.reply_error(ErrorCode::BadRole, "Only kiosks may register as kiosks");
            return;
        }

        let kiosk_id = KioskId::from_string(ctx.client_id.clone());
        let entry = PresenceEntry::new(ctx.connection_id.clone(), ctx.sender.clone());
        if let Some(displaced) = self.presence.register_kiosk(kiosk_id.clone(), entry) {
            info!(
                kiosk_id = %kiosk_id,
                old_connection = %displaced.connection_id,
                "Kiosk re-registered, displacing older connection"
            );
        } else {
            info!(kiosk_id = %kiosk_id, "Kiosk registered");
        }

        self.presence.broadcast_to_monitors(&ServerEvent::KioskOnline {
            kiosk_id: kiosk_id.clone(),
            timestamp: Utc::now(),
        });
        ctx.reply(ServerEvent::KioskRegistered);
    }

    fn register_monitor(&self, ctx: &ClientContext) {
        if ctx.role != ClientRole::Monitor {
            ctx.reply_error(ErrorCode::BadRole, "Only monitors may register as monitors");
            return;
        }

        let monitor_id = MonitorId::from_string(ctx.client_id.clone());
        let entry = PresenceEntry::new(ctx.connection_id.clone(), ctx.sender.clone());
        if self.presence.register_monitor(monitor_id.clone(), entry).is_some() {
            info!(monitor_id = %monitor_id, "Monitor re-registered, displacing older connection");
        } else {
            info!(monitor_id = %monitor_id, "Monitor registered");
        }

        ctx.reply(ServerEvent::MonitorRegistered {
            online_kiosks: self.presence.kiosk_summaries(),
        });
    }

    fn get_online_kiosks(&self, ctx: &ClientContext) {
        if ctx.role != ClientRole::Monitor {
            ctx.reply_error(ErrorCode::BadRole, "Only monitors may list kiosks");
            return;
        }
        let kiosks = self.presence.kiosk_summaries();
        let count = kiosks.len();
        ctx.reply(ServerEvent::OnlineKiosksList {
            kiosks,
            count,
            timestamp: Utc::now(),
        });
    }

    fn start_monitoring(&self, ctx: &ClientContext, kiosk_id: &KioskId) {
        if ctx.role != ClientRole::Monitor {
            ctx.reply_error(ErrorCode::BadRole, "Only monitors may start monitoring");
            return;
        }
        if !self.presence.kiosk_online(kiosk_id) {
            ctx.reply_error(
                ErrorCode::KioskNotFound,
                format!("Kiosk {kiosk_id} is not online"),
            );
            return;
        }

        let monitor_id = MonitorId::from_string(ctx.client_id.clone());
        match self.sessions.entry(kiosk_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let session = occupied.get_mut();
                if session.monitor_id != monitor_id {
                    ctx.reply_error(
                        ErrorCode::SessionConflict,
                        format!("Kiosk {kiosk_id} is already monitored by another monitor"),
                    );
                    return;
                }
                // Same monitor re-issuing (e.g. after reconnect): refresh
                // the owning connection handle
                session.monitor_connection = ctx.connection_id.clone();
                session.touch();
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Session::new(
                    kiosk_id.clone(),
                    monitor_id.clone(),
                    ctx.connection_id.clone(),
                ));
                info!(kiosk_id = %kiosk_id, monitor_id = %monitor_id, "Monitoring session started");
            }
        }

        ctx.reply(ServerEvent::MonitoringStarted {
            kiosk_id: kiosk_id.clone(),
        });
        self.presence.send_to_kiosk(
            kiosk_id,
            ServerEvent::MonitoringStarted {
                kiosk_id: kiosk_id.clone(),
            },
        );
    }

    fn stop_monitoring(&self, ctx: &ClientContext, kiosk_id: &KioskId) {
        if ctx.role != ClientRole::Monitor {
            ctx.reply_error(ErrorCode::BadRole, "Only monitors may stop monitoring");
            return;
        }
        let Some(owner) = self.check_owner(ctx, kiosk_id) else {
            return;
        };
        drop(owner);

        if self.sessions.remove(kiosk_id).is_some() {
            info!(kiosk_id = %kiosk_id, monitor_id = %ctx.client_id, "Monitoring session stopped");
            self.presence.send_to_kiosk(
                kiosk_id,
                ServerEvent::MonitoringStopped {
                    kiosk_id: kiosk_id.clone(),
                    reason: "monitor-stopped".to_string(),
                },
            );
        }
    }

    fn call_request(&self, ctx: &ClientContext, kiosk_id: &KioskId) {
        self.with_session(ctx, kiosk_id, |service, session| {
            match session.request_call(ctx.role) {
                Ok(()) => {
                    let peer = SessionPeer::of(session, ctx.role);
                    service.send_to_peer(
                        &peer,
                        ServerEvent::CallRequest {
                            from_id: ctx.client_id.clone(),
                        },
                    );
                    ctx.reply(ServerEvent::CallRequestSent {
                        kiosk_id: kiosk_id.clone(),
                    });
                }
                Err(err) => ctx.reply_error(err.into(), "Call already in progress"),
            }
        });
    }

    fn call_accept(&self, ctx: &ClientContext, kiosk_id: &KioskId) {
        self.with_session(ctx, kiosk_id, |service, session| {
            match session.accept_call(ctx.role) {
                Ok(()) => {
                    let peer = SessionPeer::of(session, ctx.role);
                    let accepted = ServerEvent::CallAccepted {
                        from_id: ctx.client_id.clone(),
                    };
                    service.send_to_peer(&peer, accepted.clone());
                    ctx.reply(accepted);
                    ctx.reply(ServerEvent::CallAcceptConfirmed {
                        kiosk_id: kiosk_id.clone(),
                    });
                    info!(kiosk_id = %kiosk_id, accepted_by = %ctx.client_id, "Call connected");
                }
                Err(err) => ctx.reply_error(err.into(), "No call to accept"),
            }
        });
    }

    fn call_reject(&self, ctx: &ClientContext, kiosk_id: &KioskId) {
        self.with_session(ctx, kiosk_id, |service, session| {
            match session.reject_call(ctx.role) {
                Ok(_initiator) => {
                    let peer = SessionPeer::of(session, ctx.role);
                    service.send_to_peer(
                        &peer,
                        ServerEvent::CallRejected {
                            from_id: ctx.client_id.clone(),
                        },
                    );
                    info!(kiosk_id = %kiosk_id, rejected_by = %ctx.client_id, "Call rejected");
                }
                Err(err) => ctx.reply_error(err.into(), "No call to reject"),
            }
        });
    }

    fn call_end(&self, ctx: &ClientContext, kiosk_id: &KioskId) {
        self.with_session(ctx, kiosk_id, |service, session| match session.end_call() {
            Ok(()) => {
                let peer = SessionPeer::of(session, ctx.role);
                let ended = ServerEvent::CallEnded {
                    from_id: ctx.client_id.clone(),
                };
                service.send_to_peer(&peer, ended.clone());
                ctx.reply(ended);
                ctx.reply(ServerEvent::CallEndConfirmed {
                    kiosk_id: kiosk_id.clone(),
                });
                info!(kiosk_id = %kiosk_id, ended_by = %ctx.client_id, "Call ended");
            }
            Err(err) => ctx.reply_error(err.into(), "No call to end"),
        });
    }

    fn toggle_media(&self, ctx: &ClientContext, kiosk_id: &KioskId, kind: MediaKind, enabled: bool) {
        self.with_session(ctx, kiosk_id, |service, session| {
            let result = match kind {
                MediaKind::Video => session.toggle_video(ctx.role, enabled),
                MediaKind::Audio => session.toggle_audio(ctx.role, enabled),
            };
            match result {
                Ok(()) => {
                    let peer = SessionPeer::of(session, ctx.role);
                    let (confirmed, toggled) = match kind {
                        MediaKind::Video => (
                            ServerEvent::VideoToggleConfirmed { enabled },
                            ServerEvent::VideoToggled {
                                from_id: ctx.client_id.clone(),
                                enabled,
                            },
                        ),
                        MediaKind::Audio => (
                            ServerEvent::AudioToggleConfirmed { enabled },
                            ServerEvent::AudioToggled {
                                from_id: ctx.client_id.clone(),
                                enabled,
                            },
                        ),
                    };
                    ctx.reply(confirmed);
                    service.send_to_peer(&peer, toggled);
                }
                Err(err) => ctx.reply_error(err.into(), "Media can only be toggled during a call"),
            }
        });
    }

    fn ping(&self, ctx: &ClientContext) {
        // Any command counts as activity, ping included
        match ctx.role {
            ClientRole::Kiosk => {
                let kiosk_id = KioskId::from_string(ctx.client_id.clone());
                if let Some(mut session) = self.sessions.get_mut(&kiosk_id) {
                    session.touch();
                }
            }
            ClientRole::Monitor => {
                for mut session in self.sessions.iter_mut() {
                    if session.monitor_connection == ctx.connection_id {
                        session.touch();
                    }
                }
            }
        }
        ctx.reply(ServerEvent::Pong);
    }

    /// Validation common to all session-scoped commands, in order:
    /// session exists, sender is a participant, monitor sender owns the
    /// session's connection handle. The closure runs with the entry guard
    /// held; sends inside it are non-blocking.
    fn with_session<F>(&self, ctx: &ClientContext, kiosk_id: &KioskId, f: F)
    where
        F: FnOnce(&Self, &mut Session),
    {
        let Some(mut session) = self.sessions.get_mut(kiosk_id) else {
            ctx.reply_error(
                ErrorCode::NoSession,
                format!("No active session for kiosk {kiosk_id}"),
            );
            return;
        };

        match ctx.role {
            ClientRole::Kiosk => {
                if session.kiosk_id.as_str() != ctx.client_id {
                    ctx.reply_error(
                        ErrorCode::InvalidTarget,
                        "Kiosks may only address their own session",
                    );
                    return;
                }
            }
            ClientRole::Monitor => {
                if session.monitor_id.as_str() != ctx.client_id {
                    ctx.reply_error(
                        ErrorCode::InvalidTarget,
                        "Sender is not a participant of this session",
                    );
                    return;
                }
                if session.monitor_connection != ctx.connection_id {
                    ctx.reply_error(
                        ErrorCode::NotOwner,
                        "Session is owned by a different connection",
                    );
                    return;
                }
            }
        }

        session.touch();
        f(self, &mut session);
    }

    fn check_owner<'a>(
        &'a self,
        ctx: &ClientContext,
        kiosk_id: &KioskId,
    ) -> Option<dashmap::mapref::one::RefMut<'a, KioskId, Session>> {
        let Some(session) = self.sessions.get_mut(kiosk_id) else {
            ctx.reply_error(
                ErrorCode::NoSession,
                format!("No active session for kiosk {kiosk_id}"),
            );
            return None;
        };
        if session.monitor_id.as_str() != ctx.client_id {
            ctx.reply_error(
                ErrorCode::InvalidTarget,
                "Sender is not a participant of this session",
            );
            return None;
        }
        if session.monitor_connection != ctx.connection_id {
            ctx.reply_error(
                ErrorCode::NotOwner,
                "Session is owned by a different connection",
            );
            return None;
        }
        Some(session)
    }

    fn send_to_peer(&self, peer: &SessionPeer, event: ServerEvent) {
        match peer {
            SessionPeer::Kiosk(kiosk_id) => self.presence.send_to_kiosk(kiosk_id, event),
            SessionPeer::Monitor(monitor_id) => self.presence.send_to_monitor(monitor_id, event),
        }
    }

    /// Connection teardown: presence cleanup, session teardown, offline
    /// broadcasts. Runs for every closed socket, normal or errored.
    pub fn handle_disconnect(&self, ctx: &ClientContext) {
        match ctx.role {
            ClientRole::Kiosk => self.kiosk_disconnected(ctx),
            ClientRole::Monitor => self.monitor_disconnected(ctx),
        }
    }

    fn kiosk_disconnected(&self, ctx: &ClientContext) {
        let kiosk_id = KioskId::from_string(ctx.client_id.clone());

        // Only the entry owner tears down presence and session state; a
        // displaced connection closing later must not evict its successor
        // or mark the kiosk offline again.
        let was_present = self.presence.unregister_kiosk(&kiosk_id, &ctx.connection_id);
        if !was_present {
            return;
        }

        if let Some((_, session)) = self.sessions.remove(&kiosk_id) {
            if !session.call.is_idle() {
                self.presence.send_to_monitor(
                    &session.monitor_id,
                    ServerEvent::CallEnded {
                        from_id: kiosk_id.to_string(),
                    },
                );
            }
            self.presence.send_to_monitor(
                &session.monitor_id,
                ServerEvent::MonitoringStopped {
                    kiosk_id: kiosk_id.clone(),
                    reason: "kiosk-disconnected".to_string(),
                },
            );
        }

        info!(kiosk_id = %kiosk_id, "Kiosk disconnected");
        self.presence.broadcast_to_monitors(&ServerEvent::KioskOffline {
            kiosk_id,
            timestamp: Utc::now(),
            reason: "disconnected".to_string(),
        });
    }

    fn monitor_disconnected(&self, ctx: &ClientContext) {
        let monitor_id = MonitorId::from_string(ctx.client_id.clone());
        if self.presence.unregister_monitor(&monitor_id, &ctx.connection_id) {
            info!(monitor_id = %monitor_id, "Monitor disconnected");
        }

        // End every session owned by this connection. Sessions the same
        // monitor re-acquired over a newer connection carry a different
        // handle and survive.
        let owned: Vec<KioskId> = self
            .sessions
            .iter()
            .filter(|s| s.monitor_connection == ctx.connection_id)
            .map(|s| s.kiosk_id.clone())
            .collect();

        for kiosk_id in owned {
            if let Some((_, session)) = self.sessions.remove(&kiosk_id) {
                if !session.call.is_idle() {
                    self.presence.send_to_kiosk(
                        &kiosk_id,
                        ServerEvent::CallEnded {
                            from_id: monitor_id.to_string(),
                        },
                    );
                }
                self.presence.send_to_kiosk(
                    &kiosk_id,
                    ServerEvent::MonitoringStopped {
                        kiosk_id: kiosk_id.clone(),
                        reason: "monitor-disconnected".to_string(),
                    },
                );
            }
        }
    }

    /// End sessions idle longer than the timeout. Returns the kiosk ids
    /// of reaped sessions.
    pub fn reap_expired_sessions(&self) -> Vec<KioskId> {
        let timeout = self.session_timeout;
        let expired: Vec<KioskId> = self
            .sessions
            .iter()
            .filter(|s| s.last_activity.elapsed() > timeout)
            .map(|s| s.kiosk_id.clone())
            .collect();

        for kiosk_id in &expired {
            if let Some((_, session)) = self.sessions.remove(kiosk_id) {
                warn!(
                    kiosk_id = %kiosk_id,
                    monitor_id = %session.monitor_id,
                    "Session timed out, ending"
                );
                if !session.call.is_idle() {
                    self.presence.send_to_kiosk(
                        kiosk_id,
                        ServerEvent::CallEnded {
                            from_id: session.monitor_id.to_string(),
                        },
                    );
                    self.presence.send_to_monitor(
                        &session.monitor_id,
                        ServerEvent::CallEnded {
                            from_id: kiosk_id.to_string(),
                        },
                    );
                }
                let stopped = ServerEvent::MonitoringStopped {
                    kiosk_id: kiosk_id.clone(),
                    reason: "session-timeout".to_string(),
                };
                self.presence.send_to_kiosk(kiosk_id, stopped.clone());
                self.presence.send_to_monitor(&session.monitor_id, stopped);
            }
        }
        expired
    }

    /// Spawn the periodic session reaper
    pub fn spawn_session_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = self.reap_expired_sessions();
                if !reaped.is_empty() {
                    info!(count = reaped.len(), "Reaped expired sessions");
                }
            }
        })
    }

    /// Owner lookup for tests and the health surface
    pub fn session_owner(&self, kiosk_id: &KioskId) -> Option<MonitorId> {
        self.sessions.get(kiosk_id).map(|s| s.monitor_id.clone())
    }
}

#[derive(Debug, Clone, Copy)]
enum MediaKind {
    Video,
    Audio,
}

/// The other side of a session relative to a sender role
enum SessionPeer {
    Kiosk(KioskId),
    Monitor(MonitorId),
}

impl SessionPeer {
    fn of(session: &Session, sender_role: ClientRole) -> Self {
        match sender_role {
            ClientRole::Monitor => Self::Kiosk(session.kiosk_id.clone()),
            ClientRole::Kiosk => Self::Monitor(session.monitor_id.clone()),
        }
    }
}
