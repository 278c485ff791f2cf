//! End-to-end signaling flows exercised directly against the service
//! layer: registration, monitoring sessions, the call lifecycle, and the
//! teardown paths for disconnects and timeouts.
//!
//! Run with: cargo test --test signaling_flow

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use kioskwatch_core::models::{ClientRole, ConnectionId, KioskId};
use kioskwatch_core::protocol::{ClientCommand, ErrorCode, ServerEvent};
use kioskwatch_core::service::{ClientContext, SignalingService};

const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

struct TestClient {
    ctx: ClientContext,
    rx: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    fn new(client_id: &str, role: ClientRole) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            ctx: ClientContext {
                client_id: client_id.to_string(),
                role,
                connection_id: ConnectionId::generate(),
                sender: tx,
            },
            rx,
        }
    }

    fn next(&mut self) -> ServerEvent {
        self.rx
            .try_recv()
            .expect("expected a queued event, found none")
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    fn assert_no_events(&mut self) {
        assert!(
            self.rx.try_recv().is_err(),
            "expected no further events for {}",
            self.ctx.client_id
        );
    }
}

fn connect_kiosk(service: &SignalingService, id: &str) -> TestClient {
    let mut client = TestClient::new(id, ClientRole::Kiosk);
    service.handle_command(&client.ctx, ClientCommand::RegisterKiosk);
    assert_eq!(client.next(), ServerEvent::KioskRegistered);
    client
}

fn connect_monitor(service: &SignalingService, id: &str) -> TestClient {
    let mut client = TestClient::new(id, ClientRole::Monitor);
    service.handle_command(&client.ctx, ClientCommand::RegisterMonitor);
    match client.next() {
        ServerEvent::MonitorRegistered { .. } => {}
        other => panic!("expected monitor-registered, got {other:?}"),
    }
    client
}

fn start_monitoring(service: &SignalingService, monitor: &mut TestClient, kiosk_id: &str) {
    service.handle_command(
        &monitor.ctx,
        ClientCommand::StartMonitoring {
            kiosk_id: KioskId::from(kiosk_id),
        },
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::MonitoringStarted {
            kiosk_id: KioskId::from(kiosk_id)
        }
    );
}

fn assert_error(client: &mut TestClient, expected: ErrorCode) {
    match client.next() {
        ServerEvent::Error { code, .. } => assert_eq!(code, expected),
        other => panic!("expected error {expected:?}, got {other:?}"),
    }
}

#[tokio::test]
async fn happy_call_flow() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain(); // monitoring-started notification

    // M calls K
    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::CallRequest {
            from_id: "M".to_string()
        }
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::CallRequestSent {
            kiosk_id: KioskId::from("K")
        }
    );

    // K accepts: both sides learn the call is connected
    service.handle_command(
        &kiosk.ctx,
        ClientCommand::CallAccept {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::CallAccepted {
            from_id: "K".to_string()
        }
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::CallAccepted {
            from_id: "K".to_string()
        }
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::CallAcceptConfirmed {
            kiosk_id: KioskId::from("K")
        }
    );

    // M turns its video off; K is notified
    service.handle_command(
        &monitor.ctx,
        ClientCommand::ToggleVideo {
            kiosk_id: KioskId::from("K"),
            enabled: false,
        },
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::VideoToggleConfirmed { enabled: false }
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::VideoToggled {
            from_id: "M".to_string(),
            enabled: false
        }
    );

    // M hangs up; both sides receive call-ended
    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallEnd {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::CallEnded {
            from_id: "M".to_string()
        }
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::CallEnded {
            from_id: "M".to_string()
        }
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::CallEndConfirmed {
            kiosk_id: KioskId::from("K")
        }
    );

    // The session survives the call: monitoring continues in idle state
    assert_eq!(service.active_session_count(), 1);
}

#[tokio::test]
async fn rejected_call_returns_to_idle() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    kiosk.drain();
    monitor.drain();

    service.handle_command(
        &kiosk.ctx,
        ClientCommand::CallReject {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::CallRejected {
            from_id: "K".to_string()
        }
    );

    // Call is idle again: a media toggle is rejected
    service.handle_command(
        &monitor.ctx,
        ClientCommand::ToggleVideo {
            kiosk_id: KioskId::from("K"),
            enabled: true,
        },
    );
    assert_error(&mut monitor, ErrorCode::NoActiveCall);
}

#[tokio::test]
async fn kiosk_disconnect_mid_call_tears_down() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    let mut other_monitor = connect_monitor(&service, "M2");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();
    other_monitor.drain();

    // Bring the call up
    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    service.handle_command(
        &kiosk.ctx,
        ClientCommand::CallAccept {
            kiosk_id: KioskId::from("K"),
        },
    );
    kiosk.drain();
    monitor.drain();

    // K's connection drops
    service.handle_disconnect(&kiosk.ctx);

    assert_eq!(
        monitor.next(),
        ServerEvent::CallEnded {
            from_id: "K".to_string()
        }
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::MonitoringStopped {
            kiosk_id: KioskId::from("K"),
            reason: "kiosk-disconnected".to_string()
        }
    );
    // Every monitor sees the kiosk go offline
    match monitor.next() {
        ServerEvent::KioskOffline { kiosk_id, .. } => assert_eq!(kiosk_id, KioskId::from("K")),
        other => panic!("expected kiosk-offline, got {other:?}"),
    }
    match other_monitor.next() {
        ServerEvent::KioskOffline { kiosk_id, .. } => assert_eq!(kiosk_id, KioskId::from("K")),
        other => panic!("expected kiosk-offline, got {other:?}"),
    }

    assert_eq!(service.active_session_count(), 0);
}

#[tokio::test]
async fn session_conflict_leaves_owner_untouched() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut m1 = connect_monitor(&service, "M1");
    let mut m2 = connect_monitor(&service, "M2");
    start_monitoring(&service, &mut m1, "K");
    kiosk.drain();

    service.handle_command(
        &m2.ctx,
        ClientCommand::StartMonitoring {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_error(&mut m2, ErrorCode::SessionConflict);

    // M1's session is unaffected and still owned by M1
    assert_eq!(
        service.session_owner(&KioskId::from("K")).unwrap().as_str(),
        "M1"
    );
    m1.assert_no_events();
}

#[tokio::test]
async fn only_owner_connection_drives_the_session() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    // Same monitor identity, different (stale) connection handle
    let mut imposter = TestClient::new("M", ClientRole::Monitor);
    service.handle_command(
        &imposter.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_error(&mut imposter, ErrorCode::NotOwner);

    // A different monitor identity is not even a participant
    let mut stranger = TestClient::new("M2", ClientRole::Monitor);
    service.handle_command(
        &stranger.ctx,
        ClientCommand::CallEnd {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_error(&mut stranger, ErrorCode::InvalidTarget);

    kiosk.assert_no_events();
}

#[tokio::test]
async fn call_state_guards() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    // toggle-audio while idle
    service.handle_command(
        &monitor.ctx,
        ClientCommand::ToggleAudio {
            kiosk_id: KioskId::from("K"),
            enabled: false,
        },
    );
    assert_error(&mut monitor, ErrorCode::NoActiveCall);

    // call-request while connected
    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    service.handle_command(
        &kiosk.ctx,
        ClientCommand::CallAccept {
            kiosk_id: KioskId::from("K"),
        },
    );
    kiosk.drain();
    monitor.drain();

    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_error(&mut monitor, ErrorCode::InvalidCallState);
}

#[tokio::test]
async fn kiosk_may_initiate_calls_symmetrically() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    service.handle_command(
        &kiosk.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_eq!(
        monitor.next(),
        ServerEvent::CallRequest {
            from_id: "K".to_string()
        }
    );

    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallAccept {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::CallRequestSent {
            kiosk_id: KioskId::from("K")
        }
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::CallAccepted {
            from_id: "M".to_string()
        }
    );
}

#[tokio::test]
async fn commands_before_monitoring_fail_with_no_session() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let _kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");

    service.handle_command(
        &monitor.ctx,
        ClientCommand::CallRequest {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_error(&mut monitor, ErrorCode::NoSession);
}

#[tokio::test]
async fn start_monitoring_unknown_kiosk() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut monitor = connect_monitor(&service, "M");

    service.handle_command(
        &monitor.ctx,
        ClientCommand::StartMonitoring {
            kiosk_id: KioskId::from("ghost"),
        },
    );
    assert_error(&mut monitor, ErrorCode::KioskNotFound);
}

#[tokio::test]
async fn kiosks_cannot_use_monitor_commands() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");

    service.handle_command(
        &kiosk.ctx,
        ClientCommand::StartMonitoring {
            kiosk_id: KioskId::from("K"),
        },
    );
    assert_error(&mut kiosk, ErrorCode::BadRole);

    service.handle_command(&kiosk.ctx, ClientCommand::GetOnlineKiosks);
    assert_error(&mut kiosk, ErrorCode::BadRole);

    service.handle_command(&kiosk.ctx, ClientCommand::RegisterMonitor);
    assert_error(&mut kiosk, ErrorCode::BadRole);
}

#[tokio::test]
async fn monitor_disconnect_ends_all_its_sessions() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut k1 = connect_kiosk(&service, "K1");
    let mut k2 = connect_kiosk(&service, "K2");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K1");
    start_monitoring(&service, &mut monitor, "K2");
    k1.drain();
    k2.drain();
    assert_eq!(service.active_session_count(), 2);

    service.handle_disconnect(&monitor.ctx);

    assert_eq!(
        k1.next(),
        ServerEvent::MonitoringStopped {
            kiosk_id: KioskId::from("K1"),
            reason: "monitor-disconnected".to_string()
        }
    );
    assert_eq!(
        k2.next(),
        ServerEvent::MonitoringStopped {
            kiosk_id: KioskId::from("K2"),
            reason: "monitor-disconnected".to_string()
        }
    );
    assert_eq!(service.active_session_count(), 0);
}

#[tokio::test]
async fn reconnect_with_same_identity_is_clean() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    // The monitor drops and reconnects with the same identity
    service.handle_disconnect(&monitor.ctx);
    kiosk.drain();
    assert_eq!(service.active_session_count(), 0);

    let mut reconnected = TestClient::new("M", ClientRole::Monitor);
    service.handle_command(&reconnected.ctx, ClientCommand::RegisterMonitor);
    match reconnected.next() {
        ServerEvent::MonitorRegistered { online_kiosks } => {
            assert_eq!(online_kiosks.len(), 1);
            assert_eq!(online_kiosks[0].kiosk_id, KioskId::from("K"));
        }
        other => panic!("expected monitor-registered, got {other:?}"),
    }

    // No residual session: monitoring starts fresh
    start_monitoring(&service, &mut reconnected, "K");
    assert_eq!(service.active_session_count(), 1);
}

#[tokio::test]
async fn kiosk_reregistration_displaces_old_connection() {
    let service = SignalingService::new(SESSION_TIMEOUT);
    let old = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");

    // The same kiosk identity comes back over a new connection before
    // the old socket's teardown runs
    let _new = connect_kiosk(&service, "K");
    monitor.drain();

    service.handle_disconnect(&old.ctx);

    // The stale teardown must not broadcast kiosk-offline: the kiosk is
    // still online through the new connection
    monitor.assert_no_events();
    assert_eq!(service.presence().kiosk_count(), 1);
}

#[tokio::test]
async fn idle_sessions_are_reaped() {
    let service = SignalingService::new(Duration::from_millis(20));
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reaped = service.reap_expired_sessions();
    assert_eq!(reaped, vec![KioskId::from("K")]);
    assert_eq!(service.active_session_count(), 0);

    assert_eq!(
        monitor.next(),
        ServerEvent::MonitoringStopped {
            kiosk_id: KioskId::from("K"),
            reason: "session-timeout".to_string()
        }
    );
    assert_eq!(
        kiosk.next(),
        ServerEvent::MonitoringStopped {
            kiosk_id: KioskId::from("K"),
            reason: "session-timeout".to_string()
        }
    );
}

#[tokio::test]
async fn any_command_refreshes_session_activity() {
    let service = Arc::new(SignalingService::new(Duration::from_millis(60)));
    let mut kiosk = connect_kiosk(&service, "K");
    let mut monitor = connect_monitor(&service, "M");
    start_monitoring(&service, &mut monitor, "K");
    kiosk.drain();

    // Keep the session alive with pings past the timeout horizon
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.handle_command(&monitor.ctx, ClientCommand::Ping);
        assert_eq!(monitor.next(), ServerEvent::Pong);
        assert!(service.reap_expired_sessions().is_empty());
    }

    // Silence, and the reaper takes it
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.reap_expired_sessions().len(), 1);
}
