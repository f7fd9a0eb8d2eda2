//! Cross-crate integration tests for the configuration manager
//!
//! These drive the public API end-to-end (document on disk, in-memory
//! mixer, manager on top) and assert on the exact mixer-write sequences.

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod scenarios;
