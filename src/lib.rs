//! # Crossbridge
//!
//! Observe and mutate collections and event streams that live in a separate,
//! independently scheduled runtime, without blocking either side and without
//! shared memory.
//!
//! ## Core Concepts
//!
//! - **Changes**: one [`Change`] per mutation of an ordered collection
//! - **Observable collections**: producer-side sequences emitting changes
//! - **Boundary subscriptions**: ordered relay of a remote source into a
//!   host-side sink, with idempotent teardown
//! - **Coalescing**: per-key windowed reduction of chatty streams
//! - **Materialized collections**: keyed local replicas rebuilt from changes
//!
//! ## Example
//!
//! ```ignore
//! use crossbridge::{BoundaryClient, BridgeConfig, MaterializedCollection, RemoteRuntime};
//!
//! let runtime = RemoteRuntime::start(BridgeConfig::default())?;
//! let tracker = GraphTracker::attach(router.clone());
//! tracker.publish(&runtime, "editor-1", CoalescerConfig::from_env())?;
//!
//! let client = BoundaryClient::new(&runtime);
//! let nodes = client.attach_to_collection("editor-1")?;
//! let view = MaterializedCollection::keyed(|id: &String| id.clone()).connect(&client, &nodes)?;
//!
//! router.dispatch(&EditorEvent::NodeCreated { id: "n1".into() });
//! ```

pub mod changes;
pub mod coalesce;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod remote;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use changes::{
    apply_change, Change, ChangePayload, ChangeReason, ChangeShape, ItemChange, RangeChange,
    WireChange,
};
pub use coalesce::{CoalescedBatch, CoalescedStream, Coalescer, CoalescerInput, WindowReducer};
pub use collection::{Listener, ObservableCollection};
pub use config::{AttachPolicy, BridgeConfig, CoalescerConfig, Telemetry};
pub use error::{BridgeError, Result};
pub use events::{EditorEvent, EventKind, EventRouter, GraphTracker, NodeDirectory, PublishedGraph};
pub use facade::MaterializedCollection;
pub use remote::{
    ContainerRegistry, EventSubject, HandleTable, ListenerGuard, PendingCall, Relay,
    RemoteObject, RemoteObservable, RemoteRuntime, RemoteScope, RemoteService, Signal,
};
pub use subscriptions::{
    BoundaryClient, Callbacks, CancellationToken, CollectionHandle, ConsumerRef,
    ConsumerRegistry, EventStream, Notification, Observer, SubscriptionHandle, Teardown,
};
pub use types::*;
