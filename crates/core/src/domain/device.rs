//! Devices, paths, and the interned path-name pool
//!
//! A device is a bitflag-typed endpoint owning an ordered set of paths; a
//! path is an ordered group of control writes identified by a small integer
//! interned from its name. The ids `0` (`off`) and `1` (`on`) are reserved
//! and reference-counted per device: their control lists run only on the
//! first activation and last deactivation.

use bitflags::bitflags;
use tracing::{trace, warn};

use super::control::Ctl;
use super::mixer::MixerBackend;

bitflags! {
    /// Audio endpoint type: one direction bit plus role bits. Input and
    /// output roles share the low bits and are told apart by the direction
    /// bit, so matching always compares directions first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceKind: u32 {
        const INPUT      = 0x8000_0000;

        const SPEAKER    = 0x0000_0001;
        const EARPIECE   = 0x0000_0002;
        const HEADSET    = 0x0000_0004;
        const HEADPHONE  = 0x0000_0008;
        const SCO        = 0x0000_0010;
        const A2DP       = 0x0000_0020;
        const USB        = 0x0000_0040;
        const AUX        = 0x0000_0080;

        const MIC        = 0x8000_0001;
        const BACK_MIC   = 0x8000_0002;
        const HEADSET_IN = 0x8000_0004;
        const SCO_IN     = 0x8000_0010;
        const VOICE      = 0x8000_0020;
    }
}

impl DeviceKind {
    pub fn is_input(self) -> bool {
        self.contains(DeviceKind::INPUT)
    }

    /// The direction bit alone.
    pub fn direction(self) -> DeviceKind {
        self & DeviceKind::INPUT
    }

    /// Role bits with the direction bit masked off.
    pub fn role_bits(self) -> u32 {
        self.bits() & !DeviceKind::INPUT.bits()
    }
}

/// The closed device-name vocabulary. `global` is the pseudo-device with an
/// empty flag set.
pub fn device_kind_for_name(name: &str) -> Option<DeviceKind> {
    let kind = match name {
        "global" => DeviceKind::empty(),
        "speaker" => DeviceKind::SPEAKER,
        "earpiece" => DeviceKind::EARPIECE,
        "headset" => DeviceKind::HEADSET,
        "headset_in" => DeviceKind::HEADSET_IN,
        "headphone" => DeviceKind::HEADPHONE,
        "sco" => DeviceKind::SCO,
        "sco_in" => DeviceKind::SCO_IN,
        "a2dp" => DeviceKind::A2DP,
        "usb" => DeviceKind::USB,
        "mic" => DeviceKind::MIC,
        "back mic" => DeviceKind::BACK_MIC,
        "voice" => DeviceKind::VOICE,
        "aux" => DeviceKind::AUX,
        _ => return None,
    };
    Some(kind)
}

/// Interned path-name identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(u32);

impl PathId {
    /// Reference-counted deactivation path.
    pub const OFF: PathId = PathId(0);
    /// Reference-counted activation path.
    pub const ON: PathId = PathId(1);
    /// "No path configured" sentinel.
    pub const NONE: PathId = PathId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == PathId::NONE
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Name pool shared by every device, so "hp_on" names the same path id on
/// any device that defines it.
#[derive(Debug)]
pub struct PathPool {
    names: Vec<String>,
}

impl PathPool {
    pub fn new() -> Self {
        Self {
            names: vec!["off".to_string(), "on".to_string()],
        }
    }

    /// Intern a name, returning its stable id.
    pub fn intern(&mut self, name: &str) -> PathId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        let id = PathId(self.names.len() as u32);
        self.names.push(name.to_string());
        id
    }

    /// Look up a name without interning it.
    pub fn lookup(&self, name: &str) -> Option<PathId> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| PathId(i as u32))
    }

    pub fn name(&self, id: PathId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn shrink(&mut self) {
        self.names.shrink_to_fit();
    }
}

impl Default for PathPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An identified, ordered sequence of control writes.
#[derive(Debug, Clone)]
pub struct Path {
    pub id: PathId,
    pub ctls: Vec<Ctl>,
}

impl Path {
    pub fn new(id: PathId) -> Self {
        Self {
            id,
            ctls: Vec::new(),
        }
    }

    /// Apply every control in insertion order.
    pub fn apply(&mut self, mixer: &mut dyn MixerBackend) {
        for ctl in &mut self.ctls {
            ctl.apply(mixer);
        }
    }
}

/// A configured audio endpoint and its activation state.
#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    pub paths: Vec<Path>,
    use_count: u32,
}

impl Device {
    pub fn new(name: String, kind: DeviceKind) -> Self {
        Self {
            name,
            kind,
            paths: Vec::new(),
            use_count: 0,
        }
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn path(&self, id: PathId) -> Option<&Path> {
        self.paths.iter().find(|p| p.id == id)
    }

    /// One walk over the path list collecting both matches, short-circuiting
    /// once everything requested has been found.
    fn find_pair(&self, first: PathId, second: PathId) -> (Option<usize>, Option<usize>) {
        let mut a = None;
        let mut b = None;
        for (i, path) in self.paths.iter().enumerate() {
            if a.is_none() && path.id == first {
                a = Some(i);
            }
            if b.is_none() && path.id == second {
                b = Some(i);
            }
            if (a.is_some() || first.is_none()) && (b.is_some() || second.is_none()) {
                break;
            }
        }
        (a, b)
    }

    /// Apply two paths in order, routing `on`/`off` through the per-device
    /// use count. This is the only place the count is touched.
    pub fn apply_path_pair(&mut self, first: PathId, second: PathId, mixer: &mut dyn MixerBackend) {
        let (first_idx, second_idx) = self.find_pair(first, second);
        self.apply_counted(first, first_idx, mixer);
        self.apply_counted(second, second_idx, mixer);
    }

    /// The counter moves whenever `on`/`off` is requested against this
    /// device; the control list runs only when the path is defined and the
    /// count crosses the first-user/last-user boundary.
    fn apply_counted(&mut self, id: PathId, found: Option<usize>, mixer: &mut dyn MixerBackend) {
        match id {
            PathId::NONE => {}
            PathId::ON => {
                let first_user = self.use_count == 0;
                self.use_count += 1;
                trace!("Device '{}' on, use count {}", self.name, self.use_count);
                if first_user {
                    if let Some(i) = found {
                        self.paths[i].apply(mixer);
                    }
                }
            }
            PathId::OFF => {
                if self.use_count == 0 {
                    warn!("Unbalanced off on device '{}'", self.name);
                    return;
                }
                self.use_count -= 1;
                trace!("Device '{}' off, use count {}", self.name, self.use_count);
                if self.use_count == 0 {
                    if let Some(i) = found {
                        self.paths[i].apply(mixer);
                    }
                }
            }
            _ => {
                if let Some(i) = found {
                    self.paths[i].apply(mixer);
                }
            }
        }
    }
}
