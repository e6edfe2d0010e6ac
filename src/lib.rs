//! Per-CPU kernel trace loading.
//!
//! A [`TraceStream`] reads every CPU section of a [`trace::RecordSource`],
//! merges the records into one time-ordered array of [`Entry`] values and,
//! when coupling is enabled, injects synthetic target entries for context
//! switches and wake-ups.

pub mod config;
pub mod couple;
pub mod entry;
pub mod filter;
pub mod load;
pub mod stream;
pub mod tasks;
pub mod trace;

pub use config::Config;
pub use entry::{Backing, Entry, EntryColumns, Visibility};
pub use filter::{ClockCalibration, EntryFilter, Postprocess};
pub use load::{LoadError, LoadSummary};
pub use stream::{LookupError, StreamSettings, TraceStream};
