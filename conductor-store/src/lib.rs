//! conductor-store - generic persistent record store (the Memory Store, M)
//!
//! Durable, queryable storage for any domain type implementing [`Record`]:
//! SQLite-backed CRUD, BM25 full-text keyword search, equality filtering
//! via a denormalized index table, and an atomic claim/heartbeat/lease
//! primitive for single-owner work leasing.
//!
//! Domain types (Task, Orchestration, Observation, ...) and business rules
//! (dependency eligibility, quality history, ...) live one layer up, in the
//! `conductor` crate; this crate only knows about the generic contract.

mod error;
mod record;
mod store;

pub use error::{Result, StoreError};
pub use record::{Filter, FilterOp, IndexValue, Record, matches_all};
pub use store::{ClaimInfo, Store};
