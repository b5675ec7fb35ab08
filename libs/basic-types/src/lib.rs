//! Basic types shared across the protocol crates.

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::iterator_step_by_zero,
    clippy::invalid_regex,
    clippy::string_slice,
    clippy::unimplemented,
    clippy::todo
)]

pub mod params;
pub mod party;
pub mod quorum;

pub use params::{InvalidParams, ProtocolParams};
pub use party::{InvalidProcessorId, ProcessorId};
pub use quorum::{QuorumInsert, QuorumSet};
