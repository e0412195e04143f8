//! Typed dispatch of editor events.

use crate::error::Result;
use crate::types::{ObserverId, Point};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Everything the graph editor reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorEvent {
    NodeCreated { id: String },
    NodeRemoved { id: String },
    ConnectionCreated { id: String },
    ConnectionRemoved { id: String },
    /// The whole graph was cleared.
    Cleared,
    NodePicked { id: String },
    /// Live drag; fires at pointer rate.
    NodeDragged { id: String, position: Point },
    /// Programmatic or animated translation.
    NodeTranslated { id: String, position: Point },
}

impl EditorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EditorEvent::NodeCreated { .. } => EventKind::NodeCreated,
            EditorEvent::NodeRemoved { .. } => EventKind::NodeRemoved,
            EditorEvent::ConnectionCreated { .. } => EventKind::ConnectionCreated,
            EditorEvent::ConnectionRemoved { .. } => EventKind::ConnectionRemoved,
            EditorEvent::Cleared => EventKind::Cleared,
            EditorEvent::NodePicked { .. } => EventKind::NodePicked,
            EditorEvent::NodeDragged { .. } => EventKind::NodeDragged,
            EditorEvent::NodeTranslated { .. } => EventKind::NodeTranslated,
        }
    }
}

/// Discriminant of [`EditorEvent`], used to filter observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeCreated,
    NodeRemoved,
    ConnectionCreated,
    ConnectionRemoved,
    Cleared,
    NodePicked,
    NodeDragged,
    NodeTranslated,
}

impl EventKind {
    pub const STRUCTURAL: [EventKind; 5] = [
        EventKind::NodeCreated,
        EventKind::NodeRemoved,
        EventKind::ConnectionCreated,
        EventKind::ConnectionRemoved,
        EventKind::Cleared,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

type EditorObserver = Arc<dyn Fn(&EditorEvent) -> Result<()> + Send + Sync>;

struct Registration {
    id: ObserverId,
    /// `None` accepts every kind.
    kinds: Option<Vec<EventKind>>,
    observer: EditorObserver,
}

impl Registration {
    fn accepts(&self, kind: EventKind) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

/// Observer registry for [`EditorEvent`]s.
///
/// Observers run on the dispatching thread, outside the registry lock and
/// in registration order. A failing observer is logged and skipped.
pub struct EventRouter {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventRouter {
    /// Create a router with no observers.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Observe the given kinds only.
    pub fn observe<F>(&self, kinds: &[EventKind], observer: F) -> ObserverId
    where
        F: Fn(&EditorEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.register(Some(kinds.to_vec()), Arc::new(observer))
    }

    /// Observe every event kind.
    pub fn observe_all<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&EditorEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.register(None, Arc::new(observer))
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Deliver `event` to every matching observer; returns how many ran
    /// without failing.
    pub fn dispatch(&self, event: &EditorEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<(ObserverId, EditorObserver)> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.accepts(kind))
            .map(|r| (r.id, Arc::clone(&r.observer)))
            .collect();

        trace!(%kind, observers = targets.len(), "dispatching editor event");
        let mut delivered = 0;
        for (id, observer) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| observer(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(observer = id.0, %kind, error = %e, "editor observer failed"),
                Err(_) => warn!(observer = id.0, %kind, "editor observer panicked"),
            }
        }
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.registrations.read().len()
    }

    fn register(&self, kinds: Option<Vec<EventKind>>, observer: EditorObserver) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registrations.write().push(Registration {
            id,
            kinds,
            observer,
        });
        id
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
