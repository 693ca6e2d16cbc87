//! Live and in-memory execution.
//!
//! `dispatch` holds the statement entry points and routes each call;
//! `primitives`, `bulk` and `merge` are the live-backend building blocks.

pub mod bulk;
pub mod dispatch;
pub mod merge;
pub mod primitives;

pub use bulk::BulkTransfer;
pub use dispatch::{execute_follow_up, FollowUp};
pub use merge::{execute_via_temp_table, temp_table_name};
