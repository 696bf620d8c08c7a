//! Persistence layer: Postgres models, query functions, and pool helpers.
//!
//! Every queue movement in this crate is a single conditional `UPDATE`
//! guarded by the expected source queue (and, where the caller holds a
//! snapshot, the expected `version`), so concurrent writers serialise at the
//! row without explicit locks.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
