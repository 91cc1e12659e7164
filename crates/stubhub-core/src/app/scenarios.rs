//! End-to-end broker scenarios over the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::app::{Broker, BrokerBuilder};
use crate::catalog::StubCatalog;
use crate::config::BrokerConfig;
use crate::domain::{BrokerError, ClientId, ClientMetadata, Message, MessageType, StubDescriptor, StubState};
use crate::impls::{InMemoryBus, LoopbackLauncher};
use crate::ports::{BusConnector, LaunchOutcome, ProcessLauncher};
use crate::testing::{RecordingSink, ScriptedLauncher};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    bus: Arc<InMemoryBus>,
    launcher: Arc<ScriptedLauncher>,
    sink: Arc<RecordingSink>,
    broker: Arc<Broker>,
}

fn viewer() -> StubDescriptor {
    StubDescriptor::new("Viewer", "viewer.jnlp").with_capability("table.load")
}

fn table_load(n: i64) -> Message {
    Message::new("table.load", json!({ "n": n }))
}

fn harness(descriptors: Vec<StubDescriptor>) -> Harness {
    harness_with(descriptors, BrokerConfig::default(), Arc::new(ScriptedLauncher::new()), None)
}

fn harness_with(
    descriptors: Vec<StubDescriptor>,
    config: BrokerConfig,
    launcher: Arc<ScriptedLauncher>,
    wrap: Option<fn(Arc<ScriptedLauncher>, Arc<InMemoryBus>, &[StubDescriptor]) -> Arc<dyn ProcessLauncher>>,
) -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    let sink = Arc::new(RecordingSink::new());
    let effective: Arc<dyn ProcessLauncher> = match wrap {
        Some(wrap) => wrap(launcher.clone(), bus.clone(), &descriptors),
        None => launcher.clone(),
    };
    let broker = BrokerBuilder::new(config)
        .catalog(StubCatalog::new(descriptors).unwrap())
        .bus(bus.clone())
        .launcher(effective)
        .events(sink.clone())
        .build()
        .unwrap();
    Harness {
        bus,
        launcher,
        sink,
        broker: Arc::new(broker),
    }
}

fn loopback(
    inner: Arc<ScriptedLauncher>,
    bus: Arc<InMemoryBus>,
    descriptors: &[StubDescriptor],
) -> Arc<dyn ProcessLauncher> {
    Arc::new(LoopbackLauncher::new(inner, bus, descriptors))
}

/// Deliver `message` to the stub's bus registration from an outside client.
fn send_to_stub(h: &Harness, name: &str, message: Message) {
    let stub = h.broker.stub(name).unwrap();
    let stub_client = h.bus.client_id(stub.connection().unwrap()).unwrap();
    let sender = h.bus.register_real_client(ClientMetadata::named("Sender"), Vec::new());
    h.bus.deliver(&sender, &stub_client, message).unwrap();
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ----------------------------------------------------------------------
// a message for a listening stub launches the application once
// ----------------------------------------------------------------------

#[tokio::test]
async fn message_for_listening_stub_launches_once() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();
    let stub = h.broker.stub("Viewer").unwrap().clone();
    assert_eq!(stub.state(), StubState::Listening);

    send_to_stub(&h, "Viewer", table_load(1));

    stub.wait_for_state(StubState::Launching, WAIT).await.unwrap();
    assert_eq!(h.launcher.launched(), vec!["viewer.jnlp".to_string()]);
    assert_eq!(stub.status().pending, 1);

    handle.shutdown().await;
}

// ----------------------------------------------------------------------
// success + real arrival forwards, retires, and re-arms later
// ----------------------------------------------------------------------

#[tokio::test]
async fn real_arrival_receives_queue_then_stub_rearms() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();
    let stub = h.broker.stub("Viewer").unwrap().clone();

    send_to_stub(&h, "Viewer", table_load(1));
    stub.wait_for_state(StubState::Launching, WAIT).await.unwrap();
    assert!(h.launcher.complete("viewer.jnlp", LaunchOutcome::succeeded()));
    eventually(|| !stub.status().launch_outstanding).await;
    assert_eq!(stub.state(), StubState::Launching);

    let real = h
        .bus
        .register_real_client(ClientMetadata::named("Viewer"), vec![MessageType::new("table.load")]);

    stub.wait_for_state(StubState::Dying, WAIT).await.unwrap();
    assert_eq!(h.bus.received_by(&real), vec![table_load(1)]);
    assert_eq!(stub.status().pending, 0);
    assert_eq!(h.sink.sniffed(), vec!["Viewer".to_string()]);

    // while the real application runs the stub stays retired
    h.broker.reconcile_now().await;
    assert_eq!(stub.state(), StubState::Dying);

    h.bus.remove_client(&real);
    stub.wait_for_state(StubState::Listening, WAIT).await.unwrap();

    let states = h.sink.states_of("Viewer");
    let forwarding = states.iter().position(|s| *s == StubState::Forwarding).unwrap();
    assert_eq!(
        &states[forwarding..],
        &[
            StubState::Forwarding,
            StubState::Disconnecting,
            StubState::Dying,
            StubState::Initializing,
            StubState::Connecting,
            StubState::Registering,
            StubState::Listening,
        ]
    );

    handle.shutdown().await;
}

// ----------------------------------------------------------------------
// launch failure reports the queued message and re-listens
// ----------------------------------------------------------------------

#[tokio::test]
async fn launch_failure_reports_undelivered_and_relistens() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();
    let stub = h.broker.stub("Viewer").unwrap().clone();

    send_to_stub(&h, "Viewer", table_load(7));
    stub.wait_for_state(StubState::Launching, WAIT).await.unwrap();
    assert!(h.launcher.complete("viewer.jnlp", LaunchOutcome::failed(Some(1))));

    stub.wait_for_state(StubState::Listening, WAIT).await.unwrap();
    let states = h.sink.states_of("Viewer");
    assert_eq!(
        &states[states.len() - 3..],
        &[StubState::Launching, StubState::Failing, StubState::Listening]
    );
    assert_eq!(stub.status().pending, 0);
    assert_eq!(h.sink.undelivered_of("Viewer"), vec![vec![table_load(7)]]);

    // ready for the next message
    send_to_stub(&h, "Viewer", table_load(8));
    stub.wait_for_state(StubState::Launching, WAIT).await.unwrap();
    assert_eq!(h.launcher.launched().len(), 2);

    handle.shutdown().await;
}

// ----------------------------------------------------------------------
// one wanted stub is connected per pass
// ----------------------------------------------------------------------

#[tokio::test]
async fn one_wanted_stub_connects_per_pass() {
    let h = harness(vec![
        StubDescriptor::new("A", "a.jnlp"),
        StubDescriptor::new("B", "b.jnlp"),
    ]);
    let a = h.broker.stub("A").unwrap().clone();
    let b = h.broker.stub("B").unwrap().clone();

    let first = h.broker.reconcile_now().await;
    assert_eq!(first.wanted, vec!["A", "B"]);
    assert_eq!(first.connected.as_deref(), Some("A"));
    assert_eq!(a.state(), StubState::Listening);
    assert_eq!(b.state(), StubState::Undefined);
    assert_eq!(h.broker.status().wanted, vec!["B".to_string()]);

    let second = h.broker.reconcile_now().await;
    assert!(second.wanted.is_empty());
    assert_eq!(second.connected.as_deref(), Some("B"));
    assert_eq!(b.state(), StubState::Listening);
    assert!(h.broker.status().wanted.is_empty());
}

#[tokio::test]
async fn running_broker_connects_every_stub_one_pass_at_a_time() {
    let names = ["A", "B", "C", "D"];
    let h = harness(
        names
            .iter()
            .map(|n| StubDescriptor::new(*n, format!("{n}.jnlp")))
            .collect(),
    );
    let handle = h.broker.start().await.unwrap();

    h.broker.await_all_stubs_started(Some(WAIT)).await.unwrap();
    let status = h.broker.status();
    assert_eq!(status.count(StubState::Listening), names.len());
    assert!(status.passes >= names.len() as u64);
    assert!(h.launcher.launched().is_empty());

    handle.shutdown().await;
}

// ----------------------------------------------------------------------
// a stub-flagged entry is never taken for the real application
// ----------------------------------------------------------------------

#[tokio::test]
async fn stub_flagged_entries_are_ignored() {
    let h = harness(vec![viewer()]);
    h.broker.reconcile_now().await;
    let stub = h.broker.stub("Viewer").unwrap().clone();
    assert_eq!(stub.state(), StubState::Listening);

    // a second registration carrying the same stub flag
    h.bus
        .register_real_client(ClientMetadata::for_stub(&viewer()), vec![MessageType::new("table.load")]);

    let report = h.broker.reconcile_now().await;
    assert!(report.forwarded.is_empty());
    assert!(report.wanted.is_empty());
    assert!(report.connected.is_none());
    assert!(report.unknown.is_empty());
    assert_eq!(stub.state(), StubState::Listening);
    assert!(h.launcher.launched().is_empty());
    assert!(h.sink.sniffed().is_empty());
}

// ----------------------------------------------------------------------
// Broker surface
// ----------------------------------------------------------------------

fn tester() -> StubDescriptor {
    StubDescriptor::new("AppLauncherTester", "tester.jnlp").with_capability("stubhub.selftest")
}

fn quick_self_test() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.self_test.timeout_ms = 5_000;
    config
}

#[tokio::test]
async fn self_test_passes_end_to_end() {
    let launcher = Arc::new(ScriptedLauncher::completing_with(LaunchOutcome::succeeded()));
    let h = harness_with(vec![viewer(), tester()], quick_self_test(), launcher, Some(loopback));
    let handle = h.broker.start().await.unwrap();

    h.broker.run_self_test().await.unwrap();

    let real = h.bus.clients_named("AppLauncherTester");
    assert_eq!(real.len(), 1);
    let received = h.bus.received_by(&real[0]);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].mtype, MessageType::new("stubhub.selftest"));
    assert_eq!(h.launcher.launched(), vec!["tester.jnlp".to_string()]);

    handle.shutdown().await;
}

#[tokio::test]
async fn self_test_reports_launch_failure() {
    let launcher = Arc::new(ScriptedLauncher::completing_with(LaunchOutcome::failed(Some(2))));
    let h = harness_with(vec![tester()], quick_self_test(), launcher, None);
    let handle = h.broker.start().await.unwrap();

    let err = h.broker.run_self_test().await.unwrap_err();
    assert!(matches!(err, BrokerError::LaunchFailed(name) if name == "AppLauncherTester"));

    handle.shutdown().await;
}

#[tokio::test]
async fn self_test_needs_the_tester_stub() {
    let h = harness_with(vec![viewer()], quick_self_test(), Arc::new(ScriptedLauncher::new()), None);
    let handle = h.broker.start().await.unwrap();

    let err = h.broker.run_self_test().await.unwrap_err();
    assert!(matches!(err, BrokerError::UnknownStub(_)));

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_takes_every_stub_off_the_bus() {
    let h = harness(vec![viewer(), tester()]);
    let handle = h.broker.start().await.unwrap();
    h.broker.await_all_stubs_started(Some(WAIT)).await.unwrap();
    assert_eq!(h.bus.list_clients().await.len(), 2);

    handle.shutdown().await;

    assert!(h.bus.list_clients().await.is_empty());
    for stub in h.broker.stubs() {
        assert_eq!(stub.state(), StubState::Dying);
    }
    let err = h
        .broker
        .inject("Viewer", ClientId::new("x"), table_load(1))
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotConnected(_)));
}

#[tokio::test]
async fn start_twice_is_refused() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();
    assert!(matches!(h.broker.start().await, Err(BrokerError::AlreadyRunning)));
    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_application_shows_up_in_status() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();

    h.bus.register_real_client(ClientMetadata::named("Mystery"), Vec::new());
    eventually(|| !h.sink.unknown().is_empty()).await;

    assert_eq!(h.sink.unknown(), vec!["Mystery".to_string()]);
    assert!(h.broker.status().sniffed.contains(&"Mystery".to_string()));

    handle.shutdown().await;
}

#[tokio::test]
async fn messages_are_forwarded_in_arrival_order() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();
    let stub = h.broker.stub("Viewer").unwrap().clone();

    for n in 1..=5 {
        send_to_stub(&h, "Viewer", table_load(n));
    }
    eventually(|| stub.status().pending == 5).await;
    assert_eq!(h.launcher.launched().len(), 1);
    assert_eq!(h.launcher.max_outstanding(), 1);
    assert!(h.launcher.complete("viewer.jnlp", LaunchOutcome::succeeded()));

    let real = h.bus.register_real_client(ClientMetadata::named("Viewer"), Vec::new());
    stub.wait_for_state(StubState::Dying, WAIT).await.unwrap();

    assert_eq!(
        h.bus.received_by(&real),
        (1..=5).map(table_load).collect::<Vec<_>>()
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn forwarding_stub_does_not_hold_up_other_stubs() {
    let h = harness(vec![
        viewer().with_prelaunch_delay(Duration::from_millis(800)),
        StubDescriptor::new("Plotter", "plotter.jnlp").with_capability("table.load"),
    ]);
    let handle = h.broker.start().await.unwrap();
    h.broker.await_all_stubs_started(Some(WAIT)).await.unwrap();
    let viewer_stub = h.broker.stub("Viewer").unwrap().clone();
    let plotter = h.broker.stub("Plotter").unwrap().clone();

    send_to_stub(&h, "Viewer", table_load(1));
    viewer_stub.wait_for_state(StubState::Launching, WAIT).await.unwrap();
    assert!(h.launcher.complete("viewer.jnlp", LaunchOutcome::succeeded()));
    h.bus.register_real_client(ClientMetadata::named("Viewer"), Vec::new());
    viewer_stub.wait_for_state(StubState::Seeking, WAIT).await.unwrap();

    // waits on Viewer's own lane until the forward is done
    send_to_stub(&h, "Viewer", table_load(2));
    send_to_stub(&h, "Plotter", table_load(3));

    plotter
        .wait_for_state(StubState::Launching, Duration::from_millis(400))
        .await
        .unwrap();
    assert_eq!(viewer_stub.state(), StubState::Seeking);
    assert_eq!(h.launcher.launched(), vec!["viewer.jnlp".to_string(), "plotter.jnlp".to_string()]);

    // the late Viewer message finds the stub retired
    viewer_stub.wait_for_state(StubState::Dying, WAIT).await.unwrap();
    eventually(|| h.sink.undelivered_of("Viewer") == vec![vec![table_load(2)]]).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn renamed_client_is_taken_for_the_real_application() {
    let h = harness(vec![viewer()]);
    let handle = h.broker.start().await.unwrap();
    let stub = h.broker.stub("Viewer").unwrap().clone();

    send_to_stub(&h, "Viewer", table_load(1));
    stub.wait_for_state(StubState::Launching, WAIT).await.unwrap();
    assert!(h.launcher.complete("viewer.jnlp", LaunchOutcome::succeeded()));

    // registers first, declares its name afterwards
    let real = h.bus.register_real_client(ClientMetadata::new(), Vec::new());
    h.broker.reconcile_now().await;
    assert_eq!(stub.state(), StubState::Launching);

    h.bus.update_metadata(&real, ClientMetadata::named("Viewer"));

    stub.wait_for_state(StubState::Dying, WAIT).await.unwrap();
    assert_eq!(h.bus.received_by(&real), vec![table_load(1)]);

    handle.shutdown().await;
}
