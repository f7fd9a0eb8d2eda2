//! Domain entities and the configuration engine

pub mod config;
pub mod control;
pub mod device;
pub mod manager;
pub mod mixer;
pub mod routing;
pub mod stream;

// Re-export specific items to avoid ambiguous glob imports
pub use config::{CmOptions, ConfigError};
pub use control::{Ctl, CtlState, CtlValue, VolCtl};
pub use device::{device_kind_for_name, Device, DeviceKind, Path, PathId, PathPool};
pub use manager::{CmError, ConfigMgr, StreamHandle};
pub use mixer::{CtlId, CtlType, MixerBackend, MixerError, MixerOpener};
pub use routing::Model;
pub use stream::{AudioConfig, Case, SampleFormat, Stream, StreamInfo, StreamType, UseCase};
