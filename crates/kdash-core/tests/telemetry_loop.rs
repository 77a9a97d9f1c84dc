mod common;

use common::{MemoryStore, ScriptedTransport};
use kdash_core::protocol::table::fields;
use kdash_core::protocol::{DeviceRevision, DeviceSession, SessionState};
use kdash_core::setup::{ConfigStore, Setup};
use kdash_core::telemetry::{
    ActionMessage, ChannelValue, ClientMessage, ControlRequest, Controller, Outbound, Publisher,
    ServerMessage, Subscriber, SubscriberId, TelemetryConfig, TelemetryHub, TelemetryLoop,
    TelemetryParts,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Parts = (
    Publisher<ScriptedTransport>,
    Controller<Arc<MemoryStore>>,
    TelemetryHub,
);

fn parts(
    transport: ScriptedTransport,
    store: Arc<MemoryStore>,
    setup: Setup,
) -> TelemetryParts<ScriptedTransport, Arc<MemoryStore>> {
    TelemetryLoop::new(
        DeviceSession::new(transport),
        store,
        setup,
        TelemetryConfig::default(),
    )
    .unwrap()
    .into_parts()
}

fn build(transport: ScriptedTransport, store: Arc<MemoryStore>, setup: Setup) -> Parts {
    let parts = parts(transport, store, setup);
    (parts.publisher, parts.controller, parts.hub)
}

fn save(from: SubscriberId, setup: &Setup) -> ControlRequest {
    ControlRequest {
        from,
        message: ClientMessage::Save {
            data: serde_json::to_value(setup).unwrap(),
        },
    }
}

fn alert(message: &Outbound) -> String {
    match &**message {
        ServerMessage::Action(ActionMessage::Alert { message }) => message.clone(),
        other => panic!("expected alert, got {other:?}"),
    }
}

async fn next(rx: &mut mpsc::Receiver<Outbound>) -> Outbound {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message within timeout")
        .expect("queue open")
}

#[tokio::test]
async fn test_reconnects_after_transport_failures() {
    let transport = ScriptedTransport::new(DeviceRevision::Kpro4).failing_first(2);
    let (mut publisher, _controller, hub) = build(transport, Arc::default(), Setup::default());
    let (_id, mut rx) = hub.subscribe();

    assert!(publisher.publish_tick().await.is_none());
    assert_eq!(publisher.session_state(), SessionState::Disconnected);
    assert!(publisher.publish_tick().await.is_none());
    assert_eq!(publisher.session_state(), SessionState::Disconnected);

    let snapshot = publisher.publish_tick().await.unwrap();
    assert_eq!(publisher.session_state(), SessionState::Connected);
    assert_eq!(snapshot.get("rpm"), Some(&ChannelValue::Integer(850)));

    // only the successful cycle reached subscribers
    match &*next(&mut rx).await {
        ServerMessage::Data { data } => assert_eq!(data, &snapshot),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_save_keeps_rules_and_alerts_everyone() {
    let store = Arc::new(MemoryStore::default());
    let (mut publisher, controller, hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro4),
        Arc::clone(&store),
        Setup::default(),
    );
    let (sender, mut rx_sender) = hub.subscribe();
    let (_other, mut rx_other) = hub.subscribe();

    let mut data = serde_json::to_value(Setup::default()).unwrap();
    data.as_object_mut().unwrap().remove("vss");
    controller
        .handle(ControlRequest {
            from: sender,
            message: ClientMessage::Save { data },
        })
        .await;

    assert!(alert(&next(&mut rx_sender).await).starts_with("ERROR: "));
    assert!(alert(&next(&mut rx_other).await).starts_with("ERROR: "));
    assert_eq!(controller.generation(), 0);
    assert_eq!(controller.active_setup(), Setup::default());
    assert_eq!(store.writes(), 0);

    let snapshot = publisher.publish_tick().await.unwrap();
    assert_eq!(snapshot.number("vss"), Some(100.0));
}

#[tokio::test]
async fn test_save_is_announced_before_next_snapshot() {
    let store = Arc::new(MemoryStore::default());
    let (mut publisher, controller, hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro4),
        Arc::clone(&store),
        Setup::default(),
    );
    let (id, mut rx) = hub.subscribe();

    let mut setup = Setup::default();
    setup.vss.unit = "mph".into();
    setup.odo.value = 500.0;
    controller.handle(save(id, &setup)).await;
    let snapshot = publisher.publish_tick().await.unwrap();

    assert_eq!(*next(&mut rx).await, ServerMessage::refresh());
    assert_eq!(alert(&next(&mut rx).await), "SUCCESS: setup saved!");
    match &*next(&mut rx).await {
        ServerMessage::Data { data } => assert_eq!(data, &snapshot),
        other => panic!("expected data, got {other:?}"),
    }

    let mph = snapshot.number("vss").unwrap();
    assert!((mph - 62.14).abs() < 0.01);
    assert!((snapshot.number("odo").unwrap() - 500.0).abs() < 0.01);
    assert_eq!(controller.generation(), 1);
    assert_eq!(store.load().unwrap(), setup);
}

#[tokio::test]
async fn test_reset_restores_defaults() {
    let mut custom = Setup::default();
    custom.map.unit = "psi".into();
    let store = Arc::new(MemoryStore::default());
    store.persist(&custom).unwrap();
    let (_publisher, controller, hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro3),
        Arc::clone(&store),
        custom,
    );
    let (id, mut rx) = hub.subscribe();

    controller
        .handle(ControlRequest {
            from: id,
            message: ClientMessage::Reset,
        })
        .await;

    assert_eq!(*next(&mut rx).await, ServerMessage::refresh());
    assert_eq!(alert(&next(&mut rx).await), "SUCCESS: setup reset!");
    assert_eq!(controller.active_setup(), Setup::default());
    assert_eq!(store.load().unwrap(), Setup::default());
}

#[tokio::test]
async fn test_setup_reply_goes_to_requester_only() {
    let (_publisher, controller, hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro4),
        Arc::default(),
        Setup::default(),
    );
    let (asker, mut rx_asker) = hub.subscribe();
    let (_other, mut rx_other) = hub.subscribe();

    controller
        .handle(ControlRequest {
            from: asker,
            message: ClientMessage::Setup,
        })
        .await;

    assert_eq!(
        *next(&mut rx_asker).await,
        ServerMessage::Setup {
            setup: Setup::default()
        }
    );
    assert!(rx_other.try_recv().is_err());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_others() {
    let (mut publisher, _controller, hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro4),
        Arc::default(),
        Setup::default(),
    );
    let (slow, _slow_rx) = Subscriber::channel(1);
    let slow = hub.registry().register(slow);
    let (_fast, mut fast_rx) = hub.subscribe();

    publisher.publish_tick().await.unwrap();
    publisher.publish_tick().await.unwrap();

    assert!(!hub.registry().contains(slow));
    assert_eq!(hub.registry().len(), 1);
    next(&mut fast_rx).await;
    next(&mut fast_rx).await;
}

fn nearly_42km() -> Setup {
    let mut setup = Setup::default();
    setup.odo.value = 41.99999;
    setup
}

#[tokio::test]
async fn test_odometer_persists_on_whole_kilometre() {
    let store = Arc::new(MemoryStore::default());
    let transport = ScriptedTransport::new(DeviceRevision::Kpro4).with_value(fields::VSS, 255);
    let TelemetryParts {
        mut publisher,
        controller,
        mut odometer,
        ..
    } = parts(transport, Arc::clone(&store), nearly_42km());

    publisher.publish_tick().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    publisher.publish_tick().await.unwrap();
    assert!(publisher.odometer_km() >= 42.0);

    let reading = odometer.try_recv().unwrap();
    assert_eq!(reading.generation, 0);
    assert!(odometer.try_recv().is_err());

    controller.record_odometer(reading).await;
    assert!(store.load().unwrap().odo.value >= 42.0);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_saved_odometer_survives_pending_write() {
    let store = Arc::new(MemoryStore::default());
    let transport = ScriptedTransport::new(DeviceRevision::Kpro4).with_value(fields::VSS, 255);
    let TelemetryParts {
        mut publisher,
        controller,
        mut odometer,
        hub,
        ..
    } = parts(transport, Arc::clone(&store), nearly_42km());
    let (id, _rx) = hub.subscribe();

    publisher.publish_tick().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    publisher.publish_tick().await.unwrap();
    let pending = odometer.try_recv().unwrap();

    // the user enters a new reading before the pending write is handled
    let mut edited = Setup::default();
    edited.odo.value = 500.0;
    controller.handle(save(id, &edited)).await;
    controller.record_odometer(pending).await;

    assert_eq!(store.load().unwrap().odo.value, 500.0);
    let snapshot = publisher.publish_tick().await.unwrap();
    assert!((snapshot.number("odo").unwrap() - 500.0).abs() < 0.01);
}

#[tokio::test]
async fn test_slow_save_does_not_stall_publishing() {
    let store = Arc::new(MemoryStore::slow(Duration::from_millis(500)));
    let (mut publisher, controller, hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro4),
        Arc::clone(&store),
        Setup::default(),
    );
    let (id, mut rx) = hub.subscribe();

    let mut setup = Setup::default();
    setup.vss.unit = "mph".into();
    let saving = tokio::spawn(async move {
        controller.handle(save(id, &setup)).await;
        controller
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let during = publisher.publish_tick().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "publishing waited {:?} on the save",
        started.elapsed()
    );
    assert_eq!(during.number("vss"), Some(100.0));

    let controller = saving.await.unwrap();
    assert_eq!(controller.generation(), 1);
    let after = publisher.publish_tick().await.unwrap();
    assert!((after.number("vss").unwrap() - 62.14).abs() < 0.01);

    // the old-rules snapshot, then the announcement, then new-rules data
    assert!(matches!(&*next(&mut rx).await, ServerMessage::Data { .. }));
    assert_eq!(*next(&mut rx).await, ServerMessage::refresh());
    assert_eq!(alert(&next(&mut rx).await), "SUCCESS: setup saved!");
    match &*next(&mut rx).await {
        ServerMessage::Data { data } => assert_eq!(data, &after),
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_control_queue_rejects_sender_only() {
    let telemetry = TelemetryLoop::new(
        DeviceSession::new(ScriptedTransport::new(DeviceRevision::Kpro4)),
        Arc::new(MemoryStore::default()),
        Setup::default(),
        TelemetryConfig {
            control_queue: 1,
            ..TelemetryConfig::default()
        },
    )
    .unwrap();
    let TelemetryParts {
        mut requests, hub, ..
    } = telemetry.into_parts();
    let (sender, mut rx_sender) = hub.subscribe();
    let (_other, mut rx_other) = hub.subscribe();

    assert!(hub.submit(sender, ClientMessage::Setup));
    assert!(hub.submit(sender, ClientMessage::Reset));

    assert!(alert(&next(&mut rx_sender).await).starts_with("ERROR: "));
    assert!(rx_other.try_recv().is_err());
    let queued = requests.try_recv().unwrap();
    assert!(matches!(queued.message, ClientMessage::Setup));
    assert!(requests.try_recv().is_err());

    drop(requests);
    assert!(!hub.submit(sender, ClientMessage::Setup));
}

#[tokio::test]
async fn test_style_follows_throttle() {
    let mut setup = Setup::default();
    setup.style.tps_upper_threshold = 40.0;
    setup.style.elapsed_seconds = 0.01;
    let (mut publisher, _controller, _hub) = build(
        ScriptedTransport::new(DeviceRevision::Kpro4),
        Arc::default(),
        setup,
    );

    let first = publisher.publish_tick().await.unwrap();
    assert_eq!(first.get("style"), Some(&ChannelValue::Text("normal".into())));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = publisher.publish_tick().await.unwrap();
    assert_eq!(second.number("tps"), Some(50.0));
    assert_eq!(second.get("style"), Some(&ChannelValue::Text("sport".into())));
}

#[tokio::test]
async fn test_spawned_loop_streams_and_stops() {
    let telemetry = TelemetryLoop::new(
        DeviceSession::new(ScriptedTransport::new(DeviceRevision::Kpro2)),
        Arc::new(MemoryStore::default()),
        Setup::default(),
        TelemetryConfig {
            interval: Duration::from_millis(10),
            ..TelemetryConfig::default()
        },
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let handle = telemetry.spawn(shutdown.clone());
    let hub = handle.hub();
    let (id, mut rx) = hub.subscribe();

    assert!(matches!(&*next(&mut rx).await, ServerMessage::Data { .. }));

    assert!(hub.submit(id, ClientMessage::Setup));
    loop {
        if let ServerMessage::Setup { setup } = &*next(&mut rx).await {
            assert_eq!(setup, &Setup::default());
            break;
        }
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .unwrap();
}
