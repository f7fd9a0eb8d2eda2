//! Streams and use-cases
//!
//! A stream is the logical handle the HAL layer above acquires, routes and
//! releases. It owns its use-cases and its enable/disable path ids; routing
//! state (`ref_count`, `current_devices`) is mutated only by the engine.

use tracing::warn;

use super::control::{Ctl, VolCtl};
use super::device::{DeviceKind, PathId};

/// Stream flavours. `Hw*` and `Global` streams are only reachable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    PcmOut,
    PcmIn,
    CompressedOut,
    CompressedIn,
    HwOut,
    HwIn,
    Global,
}

impl StreamType {
    /// Direction of the stream; `None` for the global pseudo-stream.
    pub fn is_input(self) -> Option<bool> {
        match self {
            StreamType::PcmIn | StreamType::CompressedIn | StreamType::HwIn => Some(true),
            StreamType::PcmOut | StreamType::CompressedOut | StreamType::HwOut => Some(false),
            StreamType::Global => None,
        }
    }

    /// The stream type an anonymous request resolves to.
    pub fn for_request(input: bool, pcm: bool) -> StreamType {
        match (input, pcm) {
            (false, true) => StreamType::PcmOut,
            (true, true) => StreamType::PcmIn,
            (false, false) => StreamType::CompressedOut,
            (true, false) => StreamType::CompressedIn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::PcmOut => "pcm-out",
            StreamType::PcmIn => "pcm-in",
            StreamType::CompressedOut => "compress-out",
            StreamType::CompressedIn => "compress-in",
            StreamType::HwOut => "hw-out",
            StreamType::HwIn => "hw-in",
            StreamType::Global => "global",
        }
    }
}

/// Sample format requested by the caller of `get_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16Le,
    S24Le,
    S32Le,
    F32,
    Mp3,
    Aac,
}

impl SampleFormat {
    pub fn is_pcm(self) -> bool {
        matches!(
            self,
            SampleFormat::S16Le | SampleFormat::S24Le | SampleFormat::S32Le | SampleFormat::F32
        )
    }
}

/// Caller-side description of the audio data it intends to move.
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub format: SampleFormat,
}

/// Fixed stream parameters, readable by the HAL shim to dimension buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_type: StreamType,
    pub card: u32,
    pub device: u32,
    pub rate: u32,
    pub period_size: u32,
    pub period_count: u32,
}

/// A named ordered group of control writes inside a use-case.
#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub ctls: Vec<Ctl>,
}

/// A named map of cases attached to a stream.
#[derive(Debug, Clone)]
pub struct UseCase {
    pub name: String,
    pub cases: Vec<Case>,
}

/// A logical audio stream and its routing state.
#[derive(Debug)]
pub struct Stream {
    pub name: Option<String>,
    pub info: StreamInfo,
    pub max_refs: u32,
    pub enable_path: PathId,
    pub disable_path: PathId,
    pub usecases: Vec<UseCase>,
    pub left_vol: Option<VolCtl>,
    pub right_vol: Option<VolCtl>,
    ref_count: u32,
    current_devices: DeviceKind,
}

impl Stream {
    pub fn new(name: Option<String>, info: StreamInfo, max_refs: u32) -> Self {
        Self {
            name,
            info,
            max_refs,
            enable_path: PathId::NONE,
            disable_path: PathId::NONE,
            usecases: Vec::new(),
            left_vol: None,
            right_vol: None,
            ref_count: 0,
            current_devices: DeviceKind::empty(),
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn current_devices(&self) -> DeviceKind {
        self.current_devices
    }

    pub(crate) fn set_current_devices(&mut self, devices: DeviceKind) {
        self.current_devices = devices;
    }

    /// Whether this stream satisfies an anonymous `get_stream` request.
    pub fn matches_request(&self, wanted: StreamType) -> bool {
        self.name.is_none() && self.info.stream_type == wanted && self.ref_count < self.max_refs
    }

    /// Take a reference. Returns `Some(first)` on success where `first`
    /// flags the 0→1 transition, `None` when the stream is saturated.
    pub(crate) fn acquire(&mut self) -> Option<bool> {
        if self.ref_count >= self.max_refs {
            return None;
        }
        self.ref_count += 1;
        Some(self.ref_count == 1)
    }

    /// Drop a reference. Returns `true` when the last reference went away.
    pub(crate) fn release(&mut self) -> bool {
        if self.ref_count == 0 {
            warn!("Release of stream '{}' with no references", self.display_name());
            return false;
        }
        self.ref_count -= 1;
        self.ref_count == 0
    }

    pub fn usecase(&self, name: &str) -> Option<&UseCase> {
        self.usecases.iter().find(|u| u.name == name)
    }

    pub(crate) fn case_mut(&mut self, usecase: &str, case: &str) -> Option<&mut Case> {
        self.usecases
            .iter_mut()
            .find(|u| u.name == usecase)?
            .cases
            .iter_mut()
            .find(|c| c.name == case)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.info.stream_type.as_str())
    }
}
