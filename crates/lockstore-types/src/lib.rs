//! Foundation types for lockstore.
//!
//! lockstore is a hierarchical key-value storage layer with distributed
//! locking, built on a replicated KV store. This crate holds the types every
//! other lockstore crate shares.
//!
//! # Key Types
//!
//! - [`LogicalKey`] -- Validated slash-delimited path key
//! - [`KeySpace`] -- Reversible mapping between logical and store-native keys
//! - [`KeyInfo`] -- Size, modification time and leaf flag of a key
//! - [`SessionId`] -- Identifier of a store-side session

pub mod error;
pub mod info;
pub mod key;
pub mod keyspace;
pub mod session;

pub use error::TypeError;
pub use info::KeyInfo;
pub use key::{validate_key, LogicalKey, SEPARATOR};
pub use keyspace::KeySpace;
pub use session::SessionId;
