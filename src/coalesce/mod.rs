//! Windowed per-key coalescing of chatty event streams.
//!
//! A raw stream is partitioned by key. Each partition keeps only its last
//! value per half window (optionally skipping values equal to the previous
//! one), and the survivors are merged into one batch per full window. Empty
//! batches are never produced.
//!
//! [`WindowReducer`] is the clock-free state machine, [`Coalescer`] drives
//! it from a timer thread and [`CoalescedStream`] publishes the result
//! across the boundary.

mod reducer;
mod worker;

pub use reducer::{CoalescedBatch, WindowReducer};
pub use worker::{CoalescedStream, Coalescer, CoalescerInput};
