//! Mixer backend implementations

pub mod mem;

pub use mem::{Journal, MemMixer, MemOpener, MixerSpec, MixerWrite};
