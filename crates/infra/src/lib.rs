//! Host-side implementations of the tinyhal mixer capability
//!
//! The configuration manager core is backend-agnostic; this crate supplies
//! concrete [`tinyhal_core::domain::mixer::MixerBackend`] implementations.
//! The in-memory mixer records every control write into a journal, which is
//! what the test suites assert on and what the CLI uses to validate
//! configurations without touching hardware.

pub mod mixer;

pub use mixer::{Journal, MemMixer, MemOpener, MixerSpec, MixerWrite};
