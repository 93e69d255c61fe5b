use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use xray_emitter::*;

async fn connected() -> (Emitter, SimHandle) {
    let (sim, handle) = SimulatedEmitter::new();
    let emitter = Emitter::with_transport(Box::new(sim), EmitterConfig::default())
        .await
        .unwrap();
    (emitter, handle)
}

fn drain(events: &mut broadcast::Receiver<EmitterEvent>) -> Vec<EmitterEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn probe_connects_to_answering_device() {
    let (emitter, handle) = connected().await;

    assert!(emitter.is_connected());
    assert_eq!(emitter.connection_state(), ConnectionState::Connected);
    assert_eq!(handle.received()[0].command, Command::StatusQuery);
}

#[tokio::test(start_paused = true)]
async fn silent_device_stays_disconnected_and_rejects_operations() {
    let (sim, handle) = SimulatedEmitter::new();
    handle.set_behavior(Behavior::Silent);
    let emitter = Emitter::with_transport(Box::new(sim), EmitterConfig::default())
        .await
        .unwrap();

    assert!(!emitter.is_connected());
    assert_eq!(handle.request_count(), 1);

    assert!(matches!(emitter.emission_off().await, Err(ExchangeError::NotConnected)));
    assert!(matches!(emitter.emission_on().await, Err(ExchangeError::NotConnected)));
    assert!(matches!(emitter.query_status().await, Err(ExchangeError::NotConnected)));
    assert!(matches!(
        emitter.set_features(1000, 50, 30, 60).await,
        Err(ExchangeError::NotConnected)
    ));
    // nothing reached the line after the probe
    assert_eq!(handle.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_probe_answer_leaves_disconnected() {
    let (sim, handle) = SimulatedEmitter::new();
    handle.set_behavior(Behavior::Truncated);
    let emitter = Emitter::with_transport(Box::new(sim), EmitterConfig::default())
        .await
        .unwrap();

    assert_eq!(emitter.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn missing_port_is_disconnected_not_an_error() {
    let emitter = Emitter::connect(EmitterConfig::for_port("/dev/xray-emitter-missing"))
        .await
        .unwrap();

    assert!(!emitter.is_connected());
    assert!(matches!(emitter.turn_off_xray().await, Err(ExchangeError::NotConnected)));
    assert!(!emitter.reconnect().await);
}

#[tokio::test(start_paused = true)]
async fn rejects_config_that_cannot_meet_host_timeout() {
    let (sim, _handle) = SimulatedEmitter::new();
    let mut config = EmitterConfig::default();
    config.timing.heartbeat_interval_ms = 1000;

    let result = Emitter::with_transport(Box::new(sim), config).await;
    assert!(matches!(result, Err(EmitterError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn set_features_returns_device_echo() {
    let (emitter, handle) = connected().await;
    let mut events = emitter.subscribe();

    let applied = emitter.set_features(1000, 50, 30, 60).await.unwrap();

    let expected = EmitterParameters::new(1000, 50, 30, 60);
    assert_eq!(applied, expected);
    assert_eq!(handle.parameters(), expected);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EmitterEvent::ParametersApplied(p) if *p == expected)));
}

#[tokio::test(start_paused = true)]
async fn device_fault_is_reported_as_data() {
    let (emitter, handle) = connected().await;
    handle.set_fault(Fault::ProtectiveBoxOpen);

    let status = emitter.query_status().await.unwrap();
    assert_eq!(status.fault, Fault::ProtectiveBoxOpen);
    assert!(status.has_fault());
    assert!(emitter.is_connected());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_emission_alive() {
    let (emitter, handle) = connected().await;
    let mut state = emitter.watch_state();

    emitter.turn_on_xray().await.unwrap();
    state.changed().await.unwrap();
    assert_eq!(*state.borrow(), ConnectionState::EmissionActive);

    time::sleep(Duration::from_secs(5)).await;

    assert!(handle.is_emitting());
    assert_eq!(emitter.connection_state(), ConnectionState::EmissionActive);

    let received = handle.received();
    for pair in received.windows(2) {
        assert!(pair[1].at - pair[0].at < Duration::from_secs(1));
    }
    let last = received.last().unwrap();
    assert!(Instant::now() - last.at < Duration::from_secs(1));

    let heartbeats = received
        .iter()
        .skip_while(|r| r.command != Command::EmissionOn)
        .filter(|r| r.command == Command::StatusQuery)
        .count();
    assert!(heartbeats >= 9, "only {} heartbeats in 5 s", heartbeats);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_goes_ahead_of_queued_requests() {
    let (emitter, handle) = connected().await;
    let emitter = Arc::new(emitter);
    emitter.turn_on_xray().await.unwrap();

    let mut flood = JoinSet::new();
    for i in 0..40u16 {
        let emitter = Arc::clone(&emitter);
        flood.spawn(async move { emitter.set_features(1000 + i, 50, 30, 60).await });
    }
    while let Some(result) = flood.join_next().await {
        assert!(result.unwrap().is_ok());
    }

    assert!(handle.is_emitting());
    assert_eq!(emitter.connection_state(), ConnectionState::EmissionActive);

    let keepalive: Vec<Instant> = handle
        .received()
        .into_iter()
        .skip_while(|r| r.command != Command::EmissionOn)
        .filter(|r| matches!(r.command, Command::EmissionOn | Command::StatusQuery))
        .map(|r| r.at)
        .collect();
    assert!(keepalive.len() >= 6, "only {} status requests", keepalive.len());
    for pair in keepalive.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap < Duration::from_secs(1), "status requests {:?} apart", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_heartbeat_disconnects_once_and_stops() {
    let (emitter, handle) = connected().await;
    let mut events = emitter.subscribe();

    emitter.turn_on_xray().await.unwrap();
    handle.set_behavior(Behavior::Silent);
    time::sleep(Duration::from_secs(2)).await;

    assert_eq!(emitter.connection_state(), ConnectionState::Disconnected);
    let requests = handle.request_count();
    time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.request_count(), requests);

    // the controller's own timeout takes over
    assert!(!handle.is_emitting());
    assert_eq!(handle.fault(), Fault::HostDisconnected);

    let events = drain(&mut events);
    let failures = events
        .iter()
        .filter(|e| matches!(e, EmitterEvent::HeartbeatFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, EmitterEvent::ConnectionChanged(ConnectionState::Disconnected))));

    assert!(matches!(emitter.query_status().await, Err(ExchangeError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_heartbeat_failure() {
    let (emitter, handle) = connected().await;
    emitter.turn_on_xray().await.unwrap();
    handle.set_behavior(Behavior::Silent);
    time::sleep(Duration::from_secs(2)).await;
    assert!(!emitter.is_connected());

    handle.set_behavior(Behavior::Normal);
    assert!(emitter.reconnect().await);
    assert_eq!(emitter.connection_state(), ConnectionState::Connected);
    assert_eq!(emitter.query_status().await.unwrap().fault, Fault::HostDisconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_is_ignored_during_emission() {
    let (emitter, handle) = connected().await;
    emitter.turn_on_xray().await.unwrap();
    let requests = handle.request_count();

    assert!(emitter.reconnect().await);
    assert_eq!(handle.request_count(), requests);
    assert_eq!(emitter.connection_state(), ConnectionState::EmissionActive);
}

#[tokio::test(start_paused = true)]
async fn emission_off_stops_heartbeat() {
    let (emitter, handle) = connected().await;

    emitter.turn_on_xray().await.unwrap();
    time::sleep(Duration::from_millis(1200)).await;
    emitter.turn_off_xray().await.unwrap();

    assert_eq!(emitter.connection_state(), ConnectionState::Connected);
    assert!(!handle.is_emitting());

    let requests = handle.request_count();
    time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.request_count(), requests);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_are_serialised() {
    let (emitter, handle) = connected().await;
    emitter.turn_on_xray().await.unwrap();

    for _ in 0..5 {
        let (status, applied, again) = tokio::join!(
            emitter.query_status(),
            emitter.set_features(1200, 40, 20, 90),
            emitter.query_status(),
        );
        assert_eq!(status.unwrap().state, EmissionState::EmissionOn);
        assert_eq!(applied.unwrap(), EmitterParameters::new(1200, 40, 20, 90));
        assert!(again.is_ok());
        time::sleep(Duration::from_millis(300)).await;
    }

    assert!(handle.is_emitting());
    assert_eq!(emitter.connection_state(), ConnectionState::EmissionActive);
}

#[tokio::test(start_paused = true)]
async fn advisory_checksum_warns_but_accepts() {
    let (sim, handle) = SimulatedEmitter::new();
    handle.set_behavior(Behavior::CorruptChecksum);
    let emitter = Emitter::with_transport(Box::new(sim), EmitterConfig::default())
        .await
        .unwrap();
    let mut events = emitter.subscribe();

    assert!(emitter.is_connected());
    emitter.query_status().await.unwrap();
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        EmitterEvent::ChecksumMismatch {
            command: Command::StatusQuery,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn strict_checksum_refuses_corrupt_device() {
    let (sim, handle) = SimulatedEmitter::new();
    handle.set_behavior(Behavior::CorruptChecksum);
    let config = EmitterConfig {
        checksum_policy: ChecksumPolicy::Strict,
        ..EmitterConfig::default()
    };
    let emitter = Emitter::with_transport(Box::new(sim), config).await.unwrap();

    assert!(!emitter.is_connected());
}

#[tokio::test(start_paused = true)]
async fn shutdown_switches_emission_off() {
    let (emitter, handle) = connected().await;
    emitter.turn_on_xray().await.unwrap();
    assert!(handle.is_emitting());

    emitter.shutdown().await;

    assert!(!handle.is_emitting());
    assert_eq!(handle.received().last().unwrap().command, Command::EmissionOff);
}
