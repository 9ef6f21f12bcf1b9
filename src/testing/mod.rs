//! Testing utilities
//!
//! A scriptable [`MockEngine`] so the session layer can be exercised without a broker.

pub mod mocks;

pub use mocks::*;
