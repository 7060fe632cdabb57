//! Integration test crate for Stagecast.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on several stagecast crates to verify they work together.

#[cfg(test)]
mod channel;

#[cfg(test)]
mod gpu;

#[cfg(test)]
mod transition;
