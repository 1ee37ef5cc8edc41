// ABOUTME: Root module for taskgate - bounded-concurrency coordination.
// ABOUTME: Re-exports all public types from submodules.

pub mod error;
pub mod gate;

pub use error::GateError;
pub use gate::{Gate, Limiter};
