//! Crate errors.

use math_lib::errors::{DivByZero, InterpolationError};
use thiserror::Error;

/// An error during the execution of a protocol handler.
///
/// Handlers never fail on adversarial input; that is absorbed into protocol state (liar set,
/// stalled invocations, abort sentinels). These errors surface internal arithmetic misuse only.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Interpolation failed.
    #[error("interpolation failed: {0}")]
    Interpolation(#[from] InterpolationError),

    /// A field division failed.
    #[error("field arithmetic error: {0}")]
    Arithmetic(#[from] DivByZero),
}
