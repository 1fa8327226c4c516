// Slab Arena - Rust Implementation
// A size-classed, reference-counted buffer allocator

#![warn(rust_2018_idioms)]

pub mod config;
pub mod slab;

// Re-exports for convenience
pub use crate::config::ArenaConfig;
pub use slab::{ArenaStats, Buffer, SlabArena, FOOTER_LEN};

/// Slab arena error types
///
/// Only construction and configuration fail with an `Error`. Refused
/// allocations are `None`; misuse of buffers panics.
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
