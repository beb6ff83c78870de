//! Diff Module
//!
//! Streams row differences computed on a background thread.
//!
//! ## Responsibilities
//! - Run a difference producer off the caller's thread, with a bounded buffer
//! - Hand differences out in batches with a timeout
//! - Turn producer panics into errors and support cancellation
//! - Expand keyless-table differences by row cardinality

mod difference;
mod differ;

pub use difference::{convert_diff, ChangeType, Difference, KeylessRow};
pub use differ::{diff_sorted, new_row_differ, AsyncDiffer, DiffSender, KeylessDiffer, RowDiffer};
