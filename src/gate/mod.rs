// ABOUTME: Gate module - bounded-concurrency coordination primitives.
// ABOUTME: Contains the Limiter and the Gate trait it implements.

mod limiter;

pub use limiter::{Gate, Limiter};
