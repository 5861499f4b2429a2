//! Stdin relay channels between adjacent pipeline stages.
//!
//! `StdinAccumulator` buffers a stage's whole output for a consumer that has
//! not been spawned yet; `SharedStdin` streams bytes into a consumer already
//! running on its own execution context.

mod accumulate;
mod shared;

pub use accumulate::StdinAccumulator;
pub use shared::{RelayError, SharedStdin, DEFAULT_SHARED_STDIN_BYTES};
