//! Editor state mirrored into observable collections.

use super::router::{EditorEvent, EventKind, EventRouter};
use crate::coalesce::CoalescedStream;
use crate::collection::ObservableCollection;
use crate::config::{CoalescerConfig, Telemetry};
use crate::error::{BridgeError, Result};
use crate::remote::{EventSubject, RemoteRuntime, RemoteService};
use crate::types::{HandleId, NodePosition, ObserverId, Point};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Service method resolving one node by id.
pub const NODE_BY_ID: &str = "node_by_id";

/// Service method listing every node with its last known position.
pub const LIST_NODES: &str = "list_nodes";

/// Reports the ids the editor currently considers selected.
pub type SelectionSource = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

type PositionMap = Arc<RwLock<HashMap<String, Point>>>;

/// Keeps node, connection and selection collections in step with editor
/// events, and exposes raw position subjects.
pub struct GraphTracker {
    router: Arc<EventRouter>,
    observers: Mutex<Vec<ObserverId>>,
    nodes: ObservableCollection<String>,
    connections: ObservableCollection<String>,
    selected_nodes: ObservableCollection<String>,
    dragged: EventSubject<NodePosition>,
    translated: EventSubject<NodePosition>,
    positions: PositionMap,
}

impl GraphTracker {
    /// Start tracking. Without a selection source a pick selects exactly
    /// the picked node.
    pub fn attach(router: Arc<EventRouter>) -> Self {
        Self::attach_inner(router, None)
    }

    /// Start tracking; the selection is re-read from `selection` whenever
    /// nodes are created, removed, cleared or picked.
    pub fn attach_with_selection(router: Arc<EventRouter>, selection: SelectionSource) -> Self {
        Self::attach_inner(router, Some(selection))
    }

    fn attach_inner(router: Arc<EventRouter>, selection: Option<SelectionSource>) -> Self {
        let tracker = Self {
            router: Arc::clone(&router),
            observers: Mutex::new(Vec::new()),
            nodes: ObservableCollection::new(),
            connections: ObservableCollection::new(),
            selected_nodes: ObservableCollection::new(),
            dragged: EventSubject::new(),
            translated: EventSubject::new(),
            positions: Arc::new(RwLock::new(HashMap::new())),
        };

        let structure = {
            let nodes = tracker.nodes.clone();
            let connections = tracker.connections.clone();
            let positions = Arc::clone(&tracker.positions);
            router.observe(&EventKind::STRUCTURAL, move |event| {
                match event {
                    EditorEvent::NodeCreated { id } if !nodes.contains(id) => nodes.add(id.clone()),
                    EditorEvent::NodeRemoved { id } => {
                        nodes.remove(id);
                        positions.write().remove(id);
                    }
                    EditorEvent::ConnectionCreated { id } if !connections.contains(id) => {
                        connections.add(id.clone())
                    }
                    EditorEvent::ConnectionRemoved { id } => {
                        connections.remove(id);
                    }
                    EditorEvent::Cleared => {
                        nodes.clear();
                        connections.clear();
                        positions.write().clear();
                    }
                    _ => {}
                }
                Ok(())
            })
        };

        let selection_sync = {
            let selected = tracker.selected_nodes.clone();
            let kinds = [
                EventKind::NodeCreated,
                EventKind::NodeRemoved,
                EventKind::Cleared,
                EventKind::NodePicked,
            ];
            router.observe(&kinds, move |event| {
                let current = match (&selection, event) {
                    (Some(source), _) => source(),
                    (None, EditorEvent::NodePicked { id }) => vec![id.clone()],
                    (None, EditorEvent::NodeRemoved { id }) => {
                        selected.items().into_iter().filter(|s| s != id).collect()
                    }
                    (None, EditorEvent::Cleared) => Vec::new(),
                    (None, _) => return Ok(()),
                };
                sync_selection(&selected, &current);
                Ok(())
            })
        };

        let motion = {
            let dragged = tracker.dragged.clone();
            let translated = tracker.translated.clone();
            let positions = Arc::clone(&tracker.positions);
            router.observe(
                &[EventKind::NodeDragged, EventKind::NodeTranslated],
                move |event| {
                    match event {
                        EditorEvent::NodeDragged { id, position } => {
                            positions.write().insert(id.clone(), *position);
                            dragged.next(NodePosition::at(id.clone(), *position));
                        }
                        EditorEvent::NodeTranslated { id, position } => {
                            positions.write().insert(id.clone(), *position);
                            translated.next(NodePosition::at(id.clone(), *position));
                        }
                        _ => {}
                    }
                    Ok(())
                },
            )
        };

        *tracker.observers.lock() = vec![structure, selection_sync, motion];
        debug!(observers = router.observer_count(), "graph tracker attached");
        tracker
    }

    /// Node ids in creation order.
    pub fn nodes(&self) -> &ObservableCollection<String> {
        &self.nodes
    }

    pub fn connections(&self) -> &ObservableCollection<String> {
        &self.connections
    }

    pub fn selected_nodes(&self) -> &ObservableCollection<String> {
        &self.selected_nodes
    }

    /// Raw drag positions, one per pointer event.
    pub fn dragged(&self) -> &EventSubject<NodePosition> {
        &self.dragged
    }

    /// Raw programmatic moves, one per event.
    pub fn translated(&self) -> &EventSubject<NodePosition> {
        &self.translated
    }

    /// Last known position of a node.
    pub fn position_of(&self, id: &str) -> Option<Point> {
        self.positions.read().get(id).copied()
    }

    /// Bring the selection collection in line with `current`: one
    /// `RemoveRange` for deselected ids, then one `AddRange` for new ones.
    pub fn update_selection(&self, current: &[String]) {
        sync_selection(&self.selected_nodes, current);
    }

    /// Coalesced position batches keyed by node id. Translations are merged
    /// in only when the config asks for them.
    pub fn position_updates(&self, config: CoalescerConfig) -> CoalescedStream<String, NodePosition> {
        self.position_updates_with(config, Telemetry::default())
    }

    fn position_updates_with(
        &self,
        config: CoalescerConfig,
        telemetry: Telemetry,
    ) -> CoalescedStream<String, NodePosition> {
        let mut sources = vec![self.dragged.clone()];
        if config.include_translated {
            sources.push(self.translated.clone());
        }
        CoalescedStream::new(
            sources,
            |position: &NodePosition| position.id.clone(),
            config,
            telemetry,
        )
    }

    /// A service answering node queries from the tracked state.
    pub fn node_directory(&self) -> NodeDirectory {
        NodeDirectory {
            nodes: self.nodes.clone(),
            positions: Arc::clone(&self.positions),
        }
    }

    /// Publish the collections, the position stream and the node directory,
    /// and register the node collection under `container_key`.
    ///
    /// Nothing stays published when any step fails.
    pub fn publish(
        &self,
        runtime: &RemoteRuntime,
        container_key: &str,
        coalescing: CoalescerConfig,
    ) -> Result<PublishedGraph> {
        let mut published = Vec::new();
        let outcome = self.publish_into(runtime, container_key, coalescing, &mut published);
        if outcome.is_err() {
            for handle in published {
                if let Err(e) = runtime.release(handle).wait() {
                    warn!(%handle, error = %e, "rollback release failed");
                }
            }
        }
        outcome
    }

    fn publish_into(
        &self,
        runtime: &RemoteRuntime,
        container_key: &str,
        coalescing: CoalescerConfig,
        published: &mut Vec<HandleId>,
    ) -> Result<PublishedGraph> {
        let mut track = |handle: HandleId| {
            published.push(handle);
            handle
        };

        let telemetry = runtime.config().telemetry.clone();
        let nodes = track(runtime.publish_observable(self.nodes.clone()).wait()?);
        let connections = track(runtime.publish_observable(self.connections.clone()).wait()?);
        let selected_nodes = track(runtime.publish_observable(self.selected_nodes.clone()).wait()?);
        let positions = track(
            runtime
                .publish_observable(self.position_updates_with(coalescing, telemetry))
                .wait()?,
        );
        let node_directory = track(runtime.publish_service(self.node_directory()).wait()?);

        runtime.register_container(container_key, nodes).wait()?;
        info!(key = container_key, %nodes, "graph published");

        Ok(PublishedGraph {
            container_key: container_key.to_string(),
            nodes,
            connections,
            selected_nodes,
            positions,
            node_directory,
        })
    }

    /// Stop following editor events. Collections keep their contents.
    pub fn detach(&self) {
        for id in self.observers.lock().drain(..) {
            self.router.remove(id);
        }
    }
}

impl Drop for GraphTracker {
    fn drop(&mut self) {
        self.detach();
    }
}

fn sync_selection(selected: &ObservableCollection<String>, current: &[String]) {
    let wanted: HashSet<&String> = current.iter().collect();
    let deselected: Vec<String> = selected
        .items()
        .into_iter()
        .filter(|id| !wanted.contains(id))
        .collect();

    let mut seen = HashSet::new();
    let added: Vec<String> = current
        .iter()
        .filter(|id| seen.insert(*id) && !selected.contains(id))
        .cloned()
        .collect();

    if !deselected.is_empty() {
        selected.remove_range(&deselected);
    }
    if !added.is_empty() {
        selected.add_range(added);
    }
}

/// Handles of a published graph.
#[derive(Clone, Debug)]
pub struct PublishedGraph {
    pub container_key: String,
    pub nodes: HandleId,
    pub connections: HandleId,
    pub selected_nodes: HandleId,
    /// Coalesced `Vec<NodePosition>` batches.
    pub positions: HandleId,
    pub node_directory: HandleId,
}

impl PublishedGraph {
    /// Unregister the container and release every handle.
    pub fn release(&self, runtime: &RemoteRuntime) -> Result<()> {
        runtime.unregister_container(self.container_key.clone()).wait()?;
        for handle in [
            self.nodes,
            self.connections,
            self.selected_nodes,
            self.positions,
            self.node_directory,
        ] {
            match runtime.release(handle).wait() {
                Ok(()) => {}
                Err(e) if e.is_already_disposed() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Remote service over the tracked node set.
///
/// - `node_by_id {"id"}` returns `{"id", "position"}`; `position` is null
///   until the node moved
/// - `list_nodes` returns every node in the same shape
pub struct NodeDirectory {
    nodes: ObservableCollection<String>,
    positions: PositionMap,
}

impl NodeDirectory {
    fn describe(&self, id: &str) -> Value {
        let position = self.positions.read().get(id).copied();
        json!({ "id": id, "position": position })
    }
}

impl RemoteService for NodeDirectory {
    fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            NODE_BY_ID => {
                let id = args
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| BridgeError::boundary("node_by_id requires a string `id`"))?;
                if !self.nodes.contains(&id.to_string()) {
                    return Err(BridgeError::boundary(format!("node `{}` not found", id)));
                }
                Ok(self.describe(id))
            }
            LIST_NODES => Ok(Value::Array(
                self.nodes.items().iter().map(|id| self.describe(id)).collect(),
            )),
            other => Err(BridgeError::boundary(format!("unknown method `{}`", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{Change, ChangeReason};

    fn recorded(collection: &ObservableCollection<String>) -> Arc<Mutex<Vec<Change<String>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        collection.add_listener(move |change: &Change<String>| {
            sink.lock().push(change.clone());
            Ok(())
        });
        seen
    }

    fn created(id: &str) -> EditorEvent {
        EditorEvent::NodeCreated { id: id.into() }
    }

    fn removed(id: &str) -> EditorEvent {
        EditorEvent::NodeRemoved { id: id.into() }
    }

    #[test]
    fn test_structural_events_drive_collections() {
        let router = Arc::new(EventRouter::new());
        let tracker = GraphTracker::attach(Arc::clone(&router));

        router.dispatch(&created("n1"));
        router.dispatch(&created("n2"));
        router.dispatch(&created("n1"));
        router.dispatch(&EditorEvent::ConnectionCreated { id: "c1".into() });
        router.dispatch(&removed("n1"));
        assert_eq!(tracker.nodes().items(), vec!["n2".to_string()]);
        assert_eq!(tracker.connections().items(), vec!["c1".to_string()]);

        router.dispatch(&EditorEvent::Cleared);
        assert!(tracker.nodes().is_empty());
        assert!(tracker.connections().is_empty());
    }

    #[test]
    fn test_update_selection_emits_remove_then_add() {
        let router = Arc::new(EventRouter::new());
        let tracker = GraphTracker::attach(router);
        tracker.update_selection(&["a".to_string(), "b".to_string()]);

        let seen = recorded(tracker.selected_nodes());
        tracker.update_selection(&["b".to_string(), "c".to_string()]);
        tracker.update_selection(&["b".to_string(), "c".to_string()]);

        let seen = seen.lock();
        let reasons: Vec<_> = seen.iter().map(|c| c.reason()).collect();
        assert_eq!(reasons, vec![ChangeReason::RemoveRange, ChangeReason::AddRange]);
        assert_eq!(seen[0].as_range().unwrap().items, vec!["a".to_string()]);
        assert_eq!(seen[1].as_range().unwrap().items, vec!["c".to_string()]);
    }

    #[test]
    fn test_pick_and_remove_adjust_selection() {
        let router = Arc::new(EventRouter::new());
        let tracker = GraphTracker::attach(Arc::clone(&router));
        router.dispatch(&created("n1"));
        router.dispatch(&EditorEvent::NodePicked { id: "n1".into() });
        assert_eq!(tracker.selected_nodes().items(), vec!["n1".to_string()]);

        router.dispatch(&removed("n1"));
        assert!(tracker.selected_nodes().is_empty());
    }

    #[test]
    fn test_selection_source_is_reread() {
        let router = Arc::new(EventRouter::new());
        let selection = Arc::new(Mutex::new(vec!["x".to_string()]));
        let current = Arc::clone(&selection);
        let tracker = GraphTracker::attach_with_selection(
            Arc::clone(&router),
            Arc::new(move || current.lock().clone()),
        );

        router.dispatch(&created("x"));
        assert_eq!(tracker.selected_nodes().items(), vec!["x".to_string()]);

        *selection.lock() = vec!["y".to_string()];
        router.dispatch(&EditorEvent::NodePicked { id: "y".into() });
        assert_eq!(tracker.selected_nodes().items(), vec!["y".to_string()]);
    }

    #[test]
    fn test_node_directory() {
        let router = Arc::new(EventRouter::new());
        let tracker = GraphTracker::attach(Arc::clone(&router));
        router.dispatch(&created("n1"));
        router.dispatch(&EditorEvent::NodeDragged {
            id: "n1".into(),
            position: Point::new(3.0, 4.0),
        });

        let directory = tracker.node_directory();
        let found = directory.invoke(NODE_BY_ID, json!({"id": "n1"})).unwrap();
        assert_eq!(found["position"]["x"], 3.0);
        assert!(directory.invoke(NODE_BY_ID, json!({"id": "n9"})).is_err());
        assert!(directory.invoke("explode", json!(null)).is_err());
        assert_eq!(
            directory.invoke(LIST_NODES, json!(null)).unwrap().as_array().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_detach_stops_tracking() {
        let router = Arc::new(EventRouter::new());
        let tracker = GraphTracker::attach(Arc::clone(&router));
        assert_eq!(router.observer_count(), 3);
        tracker.detach();
        router.dispatch(&created("n1"));
        assert!(tracker.nodes().is_empty());
        assert_eq!(router.observer_count(), 0);
    }
}
