//! Consul backend for lockstore.
//!
//! [`ConsulBackend`] implements [`lockstore_backend::KvBackend`] on top of
//! the Consul HTTP API: KV reads and writes through `/v1/kv`, lock records
//! through `?acquire=` / `?release=` bound to sessions from `/v1/session`,
//! and change notification through blocking queries.

pub mod client;
pub mod config;
pub mod error;
pub mod model;

pub use client::ConsulBackend;
pub use config::ConsulConfig;
pub use error::{ConsulError, ConsulResult};
