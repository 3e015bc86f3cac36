//! Local state storage for reconcilers.

pub mod store;

pub use store::{InMemoryRecordStore, RecordStore};
