//! Test doubles for the engine contract
//!
//! [`mocks::MockEngine`] lets the factory, hooks and envelopes be exercised
//! end to end without a broker.

pub mod mocks;

pub use mocks::*;
