//! Producer-side observable collection.
//!
//! The collection itself knows nothing about late subscribers: it only
//! exposes its current items and listener registration. Snapshot bootstrap
//! for late subscribers is done by the boundary layer through
//! [`ObservableCollection::listen_with_snapshot`].

mod observable;

pub use observable::{Listener, ObservableCollection};
