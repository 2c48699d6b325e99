//! Repository layer for database access.
//!
//! Reads go through [`MediaRepository`]; statements that must run inside a
//! ledger transaction live in [`MediaTxOps`].

pub mod media;
pub mod media_tx;

pub use media::*;
pub use media_tx::*;
