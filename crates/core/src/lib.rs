//! TinyHAL configuration manager
//!
//! Audio use-case policy lives in a declarative XML document instead of
//! source code: devices own ordered groups of mixer-control writes
//! ("paths"), streams carry enable/disable path references and named
//! use-cases, and a small engine applies those groups in response to stream
//! lifecycle and routing events, reference-counting device activation so
//! shared endpoints power up once and power down last.
//!
//! The mixer itself is an injected capability (see [`domain::mixer`]); this
//! crate never opens hardware on its own.

pub mod domain;

pub use domain::{
    AudioConfig, CmError, CmOptions, ConfigError, ConfigMgr, DeviceKind, SampleFormat,
    StreamHandle, StreamInfo, StreamType,
};
