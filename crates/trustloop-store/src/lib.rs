//! Persistence for trustloop.
//!
//! The `Store` trait is the queryable relational store every loop shares.
//! It is the single synchronization point between loops: signal claiming
//! is a conditional status transition, outcomes are unique per trade and
//! trust weights are keyed per (group, window).
//!
//! `SqliteStore` is the durable implementation the bot runs on. An
//! in-memory store and parameter pool back the tests, and an append-only
//! JSON Lines journal keeps audit trails.

pub mod error;
pub mod journal;
pub mod memory;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use journal::JsonLinesWriter;
pub use memory::MemoryStore;
pub use pool::MemoryParameterPool;
pub use sqlite::SqliteStore;
pub use store::{
    CandleStore, DynStore, OutcomeStore, SignalOrder, SignalStore, Store, TradeStore,
    TrustWeightStore,
};
