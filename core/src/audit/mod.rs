//! Hash-chained audit store: one append-only SQLite database per runtime
//! holding sessions, steps, events, and key/value memory, all folded into a
//! single tamper-evident chain per session.

mod chain;
mod store;

pub use store::AuditStore;
