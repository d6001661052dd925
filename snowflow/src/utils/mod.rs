//! Small helpers shared across modules.

pub mod timestamps;

pub use timestamps::{compact_timestamp, now_utc, ntz_timestamp, Timestamp};
