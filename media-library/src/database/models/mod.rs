//! Database models.

pub mod media;

pub use media::*;
