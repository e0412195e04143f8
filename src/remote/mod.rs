//! The producing side of the boundary.
//!
//! Everything here lives on the remote runtime thread: published objects
//! sit in a handle table, discoverable ones are registered by container
//! key, and listeners relay encoded events to host-side consumers.

mod handles;
mod objects;
mod registry;
mod relay;
mod runtime;
mod subject;

pub use handles::HandleTable;
pub use objects::{ListenerGuard, RemoteObject, RemoteObservable, RemoteService};
pub use registry::ContainerRegistry;
pub use relay::Relay;
pub use runtime::{PendingCall, RemoteRuntime, RemoteScope};
pub use subject::{EventSubject, Signal};
