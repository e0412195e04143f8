//! Integration tests for the bridge, host side to remote side.

use crossbeam_channel::{unbounded, Receiver};
use crossbridge::{
    BoundaryClient, BridgeConfig, BridgeError, Callbacks, Change, ChangeReason, CoalescerConfig,
    EditorEvent, EventRouter, EventSubject, GraphTracker, MaterializedCollection, NodePosition,
    ObservableCollection, Point, RemoteRuntime, RemoteService, Result, WireCodec,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn start() -> (RemoteRuntime, BoundaryClient) {
    init_tracing();
    let runtime = RemoteRuntime::start(BridgeConfig::default()).unwrap();
    let client = BoundaryClient::new(&runtime);
    (runtime, client)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn channel_sink<T: Send + 'static>() -> (Callbacks<T>, Receiver<T>) {
    let (tx, rx) = unbounded();
    (
        Callbacks::new(move |value| {
            let _ = tx.send(value);
        }),
        rx,
    )
}

fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

fn s(value: &str) -> String {
    value.to_string()
}

// --- Collection Scenarios ---

#[test]
fn test_subscriber_sees_each_mutation_and_view_converges() {
    let (runtime, client) = start();
    let nodes = ObservableCollection::<String>::new();
    let source = runtime.publish_observable(nodes.clone()).wait().unwrap();
    runtime.register_container("editor", source).wait().unwrap();

    let (sink, changes) = channel_sink::<Change<String>>();
    let _subscription = client.subscribe(source, sink).unwrap();
    let collection = client.attach_to_collection("editor").unwrap();
    let view = MaterializedCollection::keyed(|id: &String| id.clone())
        .connect(&client, &collection)
        .unwrap();
    assert!(wait_until(|| nodes.listener_count() == 2));

    nodes.add(s("n1"));
    nodes.add_range(vec![s("n2"), s("n3")]);
    nodes.remove(&s("n2"));

    let reasons: Vec<ChangeReason> = (0..3)
        .map(|_| changes.recv_timeout(WAIT).unwrap().reason())
        .collect();
    assert_eq!(
        reasons,
        vec![ChangeReason::Add, ChangeReason::AddRange, ChangeReason::Remove]
    );
    assert!(changes.recv_timeout(Duration::from_millis(50)).is_err());

    assert!(wait_until(|| view.count() == 2));
    assert_eq!(sorted(view.keys()), vec![s("n1"), s("n3")]);
}

#[test]
fn test_late_subscriber_gets_snapshot_then_deltas() {
    let (runtime, client) = start();
    let nodes = ObservableCollection::new();
    nodes.add(s("n1"));
    nodes.add(s("n2"));
    let source = runtime.publish_observable(nodes.clone()).wait().unwrap();

    let mut stream = client.listen::<Change<String>>(source);
    let snapshot = stream.next().unwrap().unwrap();
    assert_eq!(snapshot.reason(), ChangeReason::AddRange);
    assert_eq!(snapshot.as_range().unwrap().items, vec![s("n1"), s("n2")]);

    nodes.add(s("n3"));
    let delta = stream.next().unwrap().unwrap();
    assert_eq!(delta.reason(), ChangeReason::Add);
    assert_eq!(delta.as_item().unwrap().current, s("n3"));

    stream.teardown().unwrap();
    assert_eq!(nodes.listener_count(), 0);
}

#[test]
fn test_messagepack_codec_end_to_end() {
    let runtime = RemoteRuntime::start(BridgeConfig {
        codec: WireCodec::MessagePack,
        ..Default::default()
    })
    .unwrap();
    let client = BoundaryClient::new(&runtime);
    let nodes = ObservableCollection::new();
    nodes.add_range(vec![s("a"), s("b"), s("c")]);
    let source = runtime.publish_observable(nodes.clone()).wait().unwrap();

    let mut stream = client.listen::<Change<String>>(source);
    assert_eq!(stream.next().unwrap().unwrap().len(), 3);

    nodes.move_item(0, 2).unwrap();
    let moved = stream.next().unwrap().unwrap();
    assert_eq!(moved.reason(), ChangeReason::Moved);
    let item = moved.as_item().unwrap();
    assert_eq!((item.previous_index, item.current_index), (Some(0), Some(2)));
}

// --- Raw Streams ---

#[test]
fn test_subject_stream_ends_on_completion() {
    let (runtime, client) = start();
    let ticks = EventSubject::<u32>::new();
    let source = runtime.publish_observable(ticks.clone()).wait().unwrap();

    let stream = client.listen::<u32>(source);
    let producer = {
        let ticks = ticks.clone();
        thread::spawn(move || {
            assert!(wait_until(|| ticks.observer_count() == 1));
            for i in 0..5 {
                ticks.next(i);
            }
            ticks.complete();
        })
    };

    let values: Vec<u32> = stream.map(|v| v.unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    producer.join().unwrap();
}

#[test]
fn test_cancel_from_another_thread() {
    let (runtime, client) = start();
    let ticks = EventSubject::<u32>::new();
    let source = runtime.publish_observable(ticks.clone()).wait().unwrap();

    let mut stream = client.listen::<u32>(source);
    let token = stream.cancellation_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.cancel();
    });

    assert!(stream.next().is_none());
    canceller.join().unwrap();
    assert!(wait_until(|| ticks.observer_count() == 0));
}

// --- Graph Tracking ---

#[test]
fn test_editor_events_reach_materialized_view() {
    let (runtime, client) = start();
    let router = Arc::new(EventRouter::new());
    let tracker = GraphTracker::attach(Arc::clone(&router));
    let published = tracker
        .publish(&runtime, "editor-1", CoalescerConfig::default())
        .unwrap();

    let collection = client.attach_to_collection("editor-1").unwrap();
    assert_eq!(collection.handle, published.nodes);
    let view = MaterializedCollection::keyed(|id: &String| id.clone())
        .connect(&client, &collection)
        .unwrap();
    let counts = view.count_changed();
    assert!(wait_until(|| tracker.nodes().listener_count() == 1));

    for id in ["n1", "n2", "n3"] {
        router.dispatch(&EditorEvent::NodeCreated { id: s(id) });
    }
    router.dispatch(&EditorEvent::NodeRemoved { id: s("n2") });
    assert!(wait_until(|| sorted(view.keys()) == vec![s("n1"), s("n3")]));

    router.dispatch(&EditorEvent::Cleared);
    assert!(wait_until(|| view.count() == 0));

    let seen: Vec<usize> = counts.try_iter().collect();
    assert_eq!(seen, vec![0, 1, 2, 3, 2, 0]);

    view.dispose().wait().unwrap();
    published.release(&runtime).unwrap();
    assert_eq!(runtime.lookup_container("editor-1").wait().unwrap(), None);
}

#[test]
fn test_drag_burst_is_coalesced_across_boundary() {
    let (runtime, client) = start();
    let router = Arc::new(EventRouter::new());
    let tracker = GraphTracker::attach(Arc::clone(&router));
    let published = tracker
        .publish(&runtime, "editor", CoalescerConfig::with_window(Duration::from_millis(250)))
        .unwrap();

    let mut batches = client.listen::<Vec<NodePosition>>(published.positions);
    assert!(wait_until(|| tracker.dragged().observer_count() == 1));

    for (x, y) in [(0.0, 0.0), (10.0, 5.0)] {
        router.dispatch(&EditorEvent::NodeDragged {
            id: s("n1"),
            position: Point::new(x, y),
        });
    }

    // Both events normally share a window; a flush between them yields two.
    let mut received = Vec::new();
    while received.last() != Some(&NodePosition::new("n1", 10.0, 5.0)) {
        let batch = batches.next().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        received.extend(batch);
        assert!(received.len() <= 2);
    }
    assert_eq!(received.last(), Some(&NodePosition::new("n1", 10.0, 5.0)));
}

#[test]
fn test_translations_only_when_included() {
    let (runtime, client) = start();
    let router = Arc::new(EventRouter::new());
    let tracker = GraphTracker::attach(Arc::clone(&router));

    let config = CoalescerConfig {
        include_translated: true,
        ..CoalescerConfig::with_window(Duration::from_millis(20))
    };
    let source = runtime
        .publish_observable(tracker.position_updates(config))
        .wait()
        .unwrap();
    let mut batches = client.listen::<Vec<NodePosition>>(source);
    assert!(wait_until(|| tracker.translated().observer_count() == 1));

    router.dispatch(&EditorEvent::NodeTranslated {
        id: s("n7"),
        position: Point::new(1.0, 2.0),
    });
    let batch = batches.next().unwrap().unwrap();
    assert_eq!(batch, vec![NodePosition::new("n7", 1.0, 2.0)]);

    let without = tracker.position_updates(CoalescerConfig::default());
    let source = runtime.publish_observable(without).wait().unwrap();
    let _stream = client.listen::<Vec<NodePosition>>(source);
    assert!(wait_until(|| tracker.dragged().observer_count() == 2));
    assert_eq!(tracker.translated().observer_count(), 1);
}

// --- Materialization with Remote Transforms ---

struct Catalog;

impl RemoteService for Catalog {
    fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        let id = args["id"].as_str().unwrap_or_default();
        match (method, id) {
            (_, "broken") => Err(BridgeError::BoundaryInvocation(format!("{id} is corrupt"))),
            ("describe", _) => Ok(json!({ "id": id, "label": id.to_uppercase() })),
            _ => Err(BridgeError::BoundaryInvocation(s("unknown method"))),
        }
    }
}

#[test]
fn test_transform_failure_omits_only_that_item() {
    let (runtime, client) = start();
    let catalog = runtime.publish_service(Catalog).wait().unwrap();
    let nodes = ObservableCollection::new();
    nodes.add_range(vec![s("x"), s("broken"), s("z")]);
    let source = runtime.publish_observable(nodes.clone()).wait().unwrap();
    runtime.register_container("catalog", source).wait().unwrap();

    let resolver = client.clone();
    let view = MaterializedCollection::with_transform(
        move |id: &String| {
            resolver
                .invoke(catalog, "describe", json!({ "id": id }))
                .wait()
        },
        |value: &Value| value["id"].as_str().unwrap_or_default().to_string(),
    )
    .connect(&client, &client.attach_to_collection("catalog").unwrap())
    .unwrap();

    assert!(wait_until(|| view.count() == 2));
    assert_eq!(sorted(view.keys()), vec![s("x"), s("z")]);
    assert_eq!(view.lookup(&s("z")).unwrap()["label"], "Z");
}
