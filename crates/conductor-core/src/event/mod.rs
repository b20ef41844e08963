//! Run event log and live event distribution.
//!
//! `RunEventStore` is the system of record for run and step transitions;
//! `EventBus` fans accepted events out to live subscribers.

pub mod bus;
pub mod store;

pub use bus::EventBus;
pub use store::{
    spawn_retention_sweeper, EventFilter, EventPage, EventQuery, EventStoreStats, RunEventStore,
    SortField, SortOrder,
};
