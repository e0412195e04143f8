//! Materialization of remote collections on the consuming side.
//!
//! List-only consumers use [`MaterializedCollection::keyed`] with the
//! identity as key; there is no separate list-shaped replica.

mod materialized;

pub use materialized::MaterializedCollection;
