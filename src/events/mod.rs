//! Editor events and the graph state derived from them.
//!
//! The editor reports a closed set of [`EditorEvent`]s into an
//! [`EventRouter`]; a [`GraphTracker`] turns them into observable
//! collections and position subjects that can be published across the
//! boundary.

mod router;
mod tracker;

pub use router::{EditorEvent, EventKind, EventRouter};
pub use tracker::{
    GraphTracker, NodeDirectory, PublishedGraph, SelectionSource, LIST_NODES, NODE_BY_ID,
};
