//! media-library crate.
//!
//! Position-ordered collections of stills, videos and audio tracks, with
//! content-hash deduplication, watermarking and progress reporting.

pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{Error, ErrorKind, Result};
