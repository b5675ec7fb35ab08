//! Byzantine-resilient statistical verifiable secret sharing.
//!
//! The core of the crate is the per-processor [`Processor`][processor::Processor]: an actor that
//! consumes admitted messages and returns recipient-addressed output messages. Nested
//! moderated-weak-sharing invocations ([`mw`]) feed the outer SVSS share and reconstruction
//! phases ([`svss`]); the [`dispute`] memory and the delay module ([`dmm`]) sit in front of every
//! processor and order incoming messages against the evidence it still owes.
//!
//! The [`simulator`] drives a whole network of processors with random delivery order and an
//! optionally quorum-gated reliable broadcast.

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

pub mod dispute;
pub mod dmm;
pub mod errors;
pub mod message;
pub mod mw;
pub mod processor;
pub mod simulator;
pub mod svss;

pub use errors::ProtocolError;
pub use processor::Processor;
