//! Change-set protocol.
//!
//! Every mutation of an observable collection is described by exactly one
//! [`Change`]. The reason tag decides which payload is populated:
//!
//! - Item payload: `Add`, `Remove`, `Replace`, `Moved`, `Refresh`
//! - Range payload: `AddRange`, `RemoveRange`, `Clear`
//!
//! The protocol never batches; batching is left to the coalescer.

mod change;
mod replay;

pub use change::{
    Change, ChangePayload, ChangeReason, ChangeShape, ItemChange, RangeChange, WireChange,
};
pub use replay::apply_change;
