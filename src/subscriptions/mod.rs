//! Host side of boundary subscriptions.
//!
//! A subscription registers a consumer in the host's [`ConsumerRegistry`],
//! asks the remote runtime to forward a published source into it and hands
//! back a handle owning that one forwarder. Two flavours share the same
//! plumbing:
//! - push: [`BoundaryClient::subscribe`] feeds an [`Observer`] on a
//!   delivery thread
//! - pull: [`BoundaryClient::listen`] yields an [`EventStream`] iterator
//!
//! Teardown always unregisters the consumer first, then releases the far
//! side; a forwarder that is already gone is not an error.
//!
//! # Example
//!
//! ```ignore
//! let runtime = RemoteRuntime::start(BridgeConfig::default())?;
//! let nodes = ObservableCollection::<String>::new();
//! let source = runtime.publish_observable(nodes.clone()).wait()?;
//!
//! let client = BoundaryClient::new(&runtime);
//! let handle = client.subscribe(
//!     source,
//!     Callbacks::new(|change: Change<String>| println!("{:?}", change.reason())),
//! )?;
//!
//! nodes.add("n1".to_string());
//! handle.dispose().wait()?;
//! ```

mod client;
mod link;
mod manager;
mod stream;
mod types;

pub use client::BoundaryClient;
pub use manager::{ConsumerRef, ConsumerRegistry};
pub use stream::EventStream;
pub use types::{
    Callbacks, CancellationToken, CollectionHandle, Notification, Observer, SubscriptionHandle,
    Teardown,
};
