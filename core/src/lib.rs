//! Kestrel core: session kernel, tool sandbox, model router, and
//! hash-chained audit store for a local-first agent runtime.
//!
//! Layout follows a small DDD-ish split: `types` and `error` are the shared
//! value objects and error taxonomy; `fsm`, `registry`, `sandbox`,
//! `breaker`, `router`, and `kernel` are the engine; `audit` is the
//! persistence boundary; `security`, `secrets`, `config`, and `logging` are
//! the ambient concerns every caller needs regardless of which provider or
//! tool set it wires up.

pub mod audit;
pub mod breaker;
pub mod config;
pub mod error;
pub mod fsm;
pub mod kernel;
pub mod logging;
pub mod providers;
pub mod registry;
pub mod router;
pub mod sandbox;
pub mod secrets;
pub mod security;
pub mod tools;
pub mod types;

pub use error::{CoreError, CoreResult};
