//! Routing engine
//!
//! Owns the loaded model and applies ordered control groups in response to
//! stream lifecycle and routing events. Disable-side ordering is
//! `(stream.disable, off)`: stream teardown before device-wide off. The
//! enable side is `(on, stream.enable)`: device-wide on before stream
//! setup. Downstream hardware observes this order, it is part of the
//! contract.

use tracing::{debug, warn};

use super::device::{Device, DeviceKind, PathId, PathPool};
use super::manager::CmError;
use super::mixer::MixerBackend;
use super::stream::Stream;

/// The structurally immutable model built by the loader. Only routing state
/// (`use_count`, `ref_count`, `current_devices`) and deferred control
/// bindings change after load.
#[derive(Debug)]
pub struct Model {
    pub devices: Vec<Device>,
    pub streams: Vec<Stream>,
    pub pool: PathPool,
}

impl Model {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            streams: Vec::new(),
            pool: PathPool::new(),
        }
    }

    /// OR of every defined device flag for one direction.
    pub fn supported_devices(&self, input: bool) -> DeviceKind {
        self.devices
            .iter()
            .filter(|d| !d.kind.is_empty() && d.kind.is_input() == input)
            .fold(DeviceKind::empty(), |acc, d| acc | d.kind)
    }

    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    fn global_device_index(&self) -> Option<usize> {
        self.devices.iter().position(|d| d.kind.is_empty())
    }

    /// Apply a path pair on the global pseudo-device, if configured.
    pub(crate) fn apply_on_global(
        &mut self,
        first: PathId,
        second: PathId,
        mixer: &mut dyn MixerBackend,
    ) {
        if let Some(i) = self.global_device_index() {
            self.devices[i].apply_path_pair(first, second, mixer);
        }
    }

    /// Walk the device table applying a path pair on every device matched by
    /// `devices`. Matched role bits are cleared from the work set as they
    /// are covered, so aliases collapse to one application per entry.
    pub(crate) fn apply_to_devices(
        &mut self,
        devices: DeviceKind,
        first: PathId,
        second: PathId,
        mixer: &mut dyn MixerBackend,
    ) {
        let direction = devices.direction();
        let mut remaining = devices.role_bits();
        for device in &mut self.devices {
            if remaining == 0 {
                break;
            }
            if device.kind.is_empty() {
                continue;
            }
            if device.kind.direction() != direction {
                continue;
            }
            if device.kind.role_bits() & remaining == 0 {
                continue;
            }
            remaining &= !device.kind.role_bits();
            device.apply_path_pair(first, second, mixer);
        }
    }

    /// `apply_route`: move a stream's routing from its current device set to
    /// `requested`. Disabling devices are torn down before enabling devices
    /// come up.
    pub(crate) fn route_stream(
        &mut self,
        stream_idx: usize,
        requested: DeviceKind,
        mixer: &mut dyn MixerBackend,
    ) -> Result<(), CmError> {
        let stream = &self.streams[stream_idx];
        if stream.ref_count() == 0 {
            warn!("Routing on released stream '{}' dropped", stream.display_name());
            return Err(CmError::StaleStream);
        }

        if requested.role_bits() != 0 {
            if let Some(stream_is_input) = stream.info.stream_type.is_input() {
                if requested.is_input() != stream_is_input {
                    warn!(
                        "Direction mismatch routing {:?} to '{}' stream, call dropped",
                        requested,
                        stream.info.stream_type.as_str()
                    );
                    return Err(CmError::DirectionMismatch);
                }
            }
        }

        let current = stream.current_devices();
        let enable = stream.enable_path;
        let disable = stream.disable_path;
        let disabling = current & !requested;
        let enabling = requested & !current;

        debug!(
            "Routing stream '{}': current {:#x} -> requested {:#x}",
            stream.display_name(),
            current.bits(),
            requested.bits()
        );

        self.apply_to_devices(disabling, disable, PathId::OFF, mixer);
        self.apply_to_devices(enabling, PathId::ON, enable, mixer);
        self.streams[stream_idx].set_current_devices(requested);
        Ok(())
    }

    /// Teardown on last release: every currently routed device gets
    /// `(disable, off)`, then the global device does.
    pub(crate) fn shutdown_stream_routes(&mut self, stream_idx: usize, mixer: &mut dyn MixerBackend) {
        let current = self.streams[stream_idx].current_devices();
        let disable = self.streams[stream_idx].disable_path;
        self.apply_to_devices(current, disable, PathId::OFF, mixer);
        self.apply_on_global(disable, PathId::OFF, mixer);
        self.streams[stream_idx].set_current_devices(DeviceKind::empty());
    }

    /// Shrink every table to its exact size once loading is over.
    pub(crate) fn shrink(&mut self) {
        for device in &mut self.devices {
            for path in &mut device.paths {
                path.ctls.shrink_to_fit();
            }
            device.paths.shrink_to_fit();
        }
        self.devices.shrink_to_fit();
        for stream in &mut self.streams {
            for usecase in &mut stream.usecases {
                for case in &mut usecase.cases {
                    case.ctls.shrink_to_fit();
                }
                usecase.cases.shrink_to_fit();
            }
            stream.usecases.shrink_to_fit();
        }
        self.streams.shrink_to_fit();
        self.pool.shrink();
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}
