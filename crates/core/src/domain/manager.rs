//! Thread-safe configuration manager API
//!
//! One mutex guards everything the routing engine mutates (stream reference
//! counts, device use counts, current routing, deferred control bindings)
//! together with the mixer itself, so control writes from concurrent callers
//! are serialised. Handles are plain indices, stable for the manager's
//! lifetime.

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::config::{self, CmOptions, ConfigError};
use super::device::{DeviceKind, PathId};
use super::mixer::{MixerBackend, MixerOpener};
use super::routing::Model;
use super::stream::{AudioConfig, StreamInfo, StreamType};

/// Opaque, copyable stream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub(crate) usize);

#[derive(Debug, Error)]
pub enum CmError {
    #[error("Devices do not match the stream direction")]
    DirectionMismatch,

    #[error("Stream has been released")]
    StaleStream,

    #[error("No such use case '{0}'")]
    NoSuchUseCase(String),

    #[error("No case '{1}' in use case '{0}'")]
    NoSuchCase(String, String),

    #[error("Stream declares no volume control")]
    NoVolumeControl,

    #[error("Invalid stream handle")]
    InvalidHandle,

    #[error("Manager state lock poisoned")]
    LockPoisoned,
}

struct Inner {
    model: Model,
    mixer: Box<dyn MixerBackend>,
}

/// The process-wide configuration manager. Explicit, never ambient: every
/// operation takes `&self`.
pub struct ConfigMgr {
    inner: Mutex<Inner>,
}

impl ConfigMgr {
    /// Load the configuration document, open the mixer, bind controls and
    /// run the `<init>` path. Any failure surfaces here; afterwards the
    /// model is structurally immutable.
    pub fn load(options: &CmOptions, opener: &dyn MixerOpener) -> Result<Self, ConfigError> {
        let (model, mixer) = config::load(options, opener)?;
        info!(
            "Configuration loaded: {} devices, {} streams, {} path names",
            model.devices.len(),
            model.streams.len(),
            model.pool.len()
        );
        Ok(Self {
            inner: Mutex::new(Inner { model, mixer }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CmError> {
        self.inner.lock().map_err(|_| {
            error!("Configuration manager lock poisoned");
            CmError::LockPoisoned
        })
    }

    /// Acquire an anonymous stream matching the request direction and
    /// format. Returns `None` when every matching stream is saturated.
    pub fn get_stream(
        &self,
        devices: DeviceKind,
        flags: u32,
        config: &AudioConfig,
    ) -> Option<StreamHandle> {
        let devices = DeviceKind::from_bits_truncate(devices.bits());
        let wanted = StreamType::for_request(devices.is_input(), config.format.is_pcm());
        trace!(
            "get_stream: want {} (flags {:#x}, rate {})",
            wanted.as_str(),
            flags,
            config.sample_rate
        );

        let mut guard = self.lock().ok()?;
        let Inner { model, mixer } = &mut *guard;
        let idx = model.streams.iter().position(|s| s.matches_request(wanted))?;
        let first = model.streams[idx].acquire()?;
        if first {
            let enable = model.streams[idx].enable_path;
            model.apply_on_global(PathId::ON, enable, mixer.as_mut());
        }
        debug!(
            "Acquired {} stream (refs {})",
            wanted.as_str(),
            model.streams[idx].ref_count()
        );
        Some(StreamHandle(idx))
    }

    /// Acquire a stream by its configured name; the only way to reach
    /// `hw` and `global` streams.
    pub fn get_named_stream(&self, name: &str) -> Option<StreamHandle> {
        let mut guard = self.lock().ok()?;
        let Inner { model, mixer } = &mut *guard;
        let idx = model
            .streams
            .iter()
            .position(|s| s.name.as_deref() == Some(name))?;
        let first = model.streams[idx].acquire()?;
        if first {
            let enable = model.streams[idx].enable_path;
            model.apply_on_global(PathId::ON, enable, mixer.as_mut());
        }
        debug!("Acquired named stream '{}'", name);
        Some(StreamHandle(idx))
    }

    /// Drop a reference. The last reference tears down every routed device
    /// and the global device, in that order.
    pub fn release_stream(&self, handle: StreamHandle) {
        let Ok(mut guard) = self.lock() else { return };
        let Inner { model, mixer } = &mut *guard;
        let Some(stream) = model.streams.get_mut(handle.0) else {
            warn!("Release with invalid stream handle");
            return;
        };
        if stream.release() {
            model.shutdown_stream_routes(handle.0, mixer.as_mut());
        }
    }

    /// Move the stream's routing to exactly `devices`.
    pub fn apply_route(&self, handle: StreamHandle, devices: DeviceKind) -> Result<(), CmError> {
        let devices = DeviceKind::from_bits_truncate(devices.bits());
        let mut guard = self.lock()?;
        let Inner { model, mixer } = &mut *guard;
        if handle.0 >= model.streams.len() {
            return Err(CmError::InvalidHandle);
        }
        model.route_stream(handle.0, devices, mixer.as_mut())
    }

    /// Dispatch a named case of a named use-case on the stream.
    pub fn apply_use_case(
        &self,
        handle: StreamHandle,
        usecase: &str,
        case: &str,
    ) -> Result<(), CmError> {
        let mut guard = self.lock()?;
        let Inner { model, mixer } = &mut *guard;
        let stream = model.streams.get_mut(handle.0).ok_or(CmError::InvalidHandle)?;
        if stream.ref_count() == 0 {
            return Err(CmError::StaleStream);
        }
        if stream.usecase(usecase).is_none() {
            return Err(CmError::NoSuchUseCase(usecase.to_string()));
        }
        let Some(case_ref) = stream.case_mut(usecase, case) else {
            return Err(CmError::NoSuchCase(usecase.to_string(), case.to_string()));
        };
        debug!("Applying use case '{}' case '{}'", usecase, case);
        for ctl in &mut case_ref.ctls {
            ctl.apply(mixer.as_mut());
        }
        Ok(())
    }

    /// Write the hardware volume as 0..100 percentages. A stream with a
    /// single volume control gets the channel average.
    pub fn set_hw_volume(&self, handle: StreamHandle, left: u32, right: u32) -> Result<(), CmError> {
        let mut guard = self.lock()?;
        let Inner { model, mixer } = &mut *guard;
        let stream = model.streams.get_mut(handle.0).ok_or(CmError::InvalidHandle)?;
        if stream.ref_count() == 0 {
            return Err(CmError::StaleStream);
        }
        match (&mut stream.left_vol, &mut stream.right_vol) {
            (None, None) => Err(CmError::NoVolumeControl),
            (Some(l), Some(r)) => {
                l.apply_percent(left, mixer.as_mut());
                r.apply_percent(right, mixer.as_mut());
                Ok(())
            }
            (Some(l), None) => {
                l.apply_percent((left + right) / 2, mixer.as_mut());
                Ok(())
            }
            (None, Some(r)) => {
                r.apply_percent((left + right) / 2, mixer.as_mut());
                Ok(())
            }
        }
    }

    /// Fixed parameters for the HAL shim to dimension its buffers.
    pub fn stream_info(&self, handle: StreamHandle) -> Option<StreamInfo> {
        let guard = self.lock().ok()?;
        guard.model.streams.get(handle.0).map(|s| s.info)
    }

    pub fn supported_output_devices(&self) -> DeviceKind {
        self.lock()
            .map(|g| g.model.supported_devices(false))
            .unwrap_or(DeviceKind::empty())
    }

    pub fn supported_input_devices(&self) -> DeviceKind {
        self.lock()
            .map(|g| g.model.supported_devices(true))
            .unwrap_or(DeviceKind::empty())
    }

    pub fn device_use_count(&self, name: &str) -> Option<u32> {
        let guard = self.lock().ok()?;
        guard.model.device_by_name(name).map(|d| d.use_count())
    }

    pub fn stream_ref_count(&self, handle: StreamHandle) -> Option<u32> {
        let guard = self.lock().ok()?;
        guard.model.streams.get(handle.0).map(|s| s.ref_count())
    }

    pub fn stream_current_devices(&self, handle: StreamHandle) -> Option<DeviceKind> {
        let guard = self.lock().ok()?;
        guard.model.streams.get(handle.0).map(|s| s.current_devices())
    }

    /// Run a read-only closure against the loaded model (CLI inspection,
    /// tests). The lock is held for the duration of the closure.
    pub fn inspect<R>(&self, f: impl FnOnce(&Model) -> R) -> Result<R, CmError> {
        let guard = self.lock()?;
        Ok(f(&guard.model))
    }
}
