//! Control records and the two-phase binder
//!
//! A `<ctl>` element in the configuration is a promise to write one mixer
//! control. The value string in the document cannot be interpreted until the
//! control's mixer-side type is known, so every record starts out
//! `Unresolved` holding the raw text. Binding converts it exactly once:
//! either to `Bound` (typed value, live handle) or, if conversion fails
//! during a lazy rebind, to the terminal `Rejected` state.

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::mixer::{self, CtlId, CtlType, MixerBackend, MixerError};

/// Upper bound on a configured byte-array value.
pub const MAX_BYTE_LEN: usize = 512;

/// A typed control value, shaped by the mixer-side control type.
#[derive(Debug, Clone, PartialEq)]
pub enum CtlValue {
    /// Bool and int controls (bools are written as 0/1).
    Int(u32),
    /// Enum controls select an item by name.
    Enum(String),
    /// Byte controls carry an explicit-length byte sequence.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum CtlState {
    /// Not yet matched against the mixer; the raw value string is retained.
    Unresolved { raw: String },
    /// Matched and converted. Never converted again.
    Bound {
        id: CtlId,
        ctl_type: CtlType,
        value: CtlValue,
    },
    /// Conversion failed after the control appeared; permanently skipped.
    Rejected,
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("value '{raw}' is not an unsigned integer")]
    BadInt { raw: String },

    #[error("'{raw}' is not a byte list (comma-separated 0..255 decimals or 0xNN)")]
    BadBytes { raw: String },

    #[error("byte value of {len} bytes at index {index} overflows the control ({count} values)")]
    ByteOverflow { len: usize, index: usize, count: usize },

    #[error("index {index} out of range ({count} values)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Mixer(#[from] MixerError),
}

/// One pending mixer write, as declared by a `<ctl>` element.
#[derive(Debug, Clone)]
pub struct Ctl {
    pub name: String,
    /// Position within a multi-valued control; `None` writes every value.
    pub index: Option<u32>,
    /// Source line of the declaring element, kept for diagnostics.
    pub line: usize,
    state: CtlState,
}

impl Ctl {
    pub fn new(name: String, raw_value: String, index: Option<u32>, line: usize) -> Self {
        Self {
            name,
            index,
            line,
            state: CtlState::Unresolved { raw: raw_value },
        }
    }

    pub fn state(&self) -> &CtlState {
        &self.state
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, CtlState::Bound { .. })
    }

    /// Try to resolve this control against the mixer.
    ///
    /// Idempotent. Returns `Ok(true)` once bound, `Ok(false)` when the
    /// control is absent from the mixer (or already rejected), `Err` when the
    /// control exists but its value string does not convert. The caller
    /// decides whether that error is fatal (load) or terminal for the record
    /// (apply).
    pub fn bind(&mut self, mixer: &mut dyn MixerBackend) -> Result<bool, BindError> {
        let raw = match &self.state {
            CtlState::Bound { .. } => return Ok(true),
            CtlState::Rejected => return Ok(false),
            CtlState::Unresolved { raw } => raw.clone(),
        };

        let Some(id) = mixer.find_ctl(&self.name) else {
            return Ok(false);
        };

        let ctl_type = mixer.ctl_type(id)?;
        let num_values = mixer.num_values(id)?;
        let value = convert_value(&raw, ctl_type, num_values, self.index)?;

        trace!(
            "Bound control '{}' as {} ({} values)",
            self.name,
            ctl_type.as_str(),
            num_values
        );
        self.state = CtlState::Bound { id, ctl_type, value };
        Ok(true)
    }

    /// Apply-path binding: rescan for late controls, retry the lookup, and
    /// turn a conversion failure into the permanent `Rejected` state.
    pub fn rebind(&mut self, mixer: &mut dyn MixerBackend) -> bool {
        match self.state {
            CtlState::Bound { .. } => return true,
            CtlState::Rejected => return false,
            CtlState::Unresolved { .. } => {}
        }

        mixer.rescan();
        match self.bind(mixer) {
            Ok(true) => true,
            Ok(false) => {
                debug!("Control '{}' not present, write skipped", self.name);
                false
            }
            Err(e) => {
                warn!("Control '{}' rejected: {}", self.name, e);
                self.state = CtlState::Rejected;
                false
            }
        }
    }

    /// Perform the mixer write this record describes.
    ///
    /// Unresolved controls get one lazy rebind attempt; controls that still
    /// cannot be bound are skipped. Mixer write failures are logged and do
    /// not abort the surrounding path.
    pub fn apply(&mut self, mixer: &mut dyn MixerBackend) {
        if !self.rebind(mixer) {
            return;
        }
        let CtlState::Bound { id, value, .. } = &self.state else {
            return;
        };

        let result = match value {
            CtlValue::Int(v) => mixer.set_int(*id, self.index.map(|i| i as usize), i64::from(*v)),
            CtlValue::Enum(item) => mixer.set_enum(*id, item),
            CtlValue::Bytes(data) => write_bytes(mixer, *id, self.index, data),
        };
        if let Err(e) = result {
            warn!("Write to control '{}' failed: {}", self.name, e);
        }
    }
}

/// Byte writes are read-modify-write unless they cover the whole control.
fn write_bytes(
    mixer: &mut dyn MixerBackend,
    id: CtlId,
    index: Option<u32>,
    data: &[u8],
) -> mixer::Result<()> {
    let num_values = mixer.num_values(id)?;
    let start = index.unwrap_or(0) as usize;
    if start == 0 && data.len() == num_values {
        return mixer.set_bytes(id, data);
    }

    let mut current = mixer.get_bytes(id)?;
    if start + data.len() > current.len() {
        return Err(MixerError::IndexOutOfRange {
            id,
            index: start + data.len(),
            count: current.len(),
        });
    }
    current[start..start + data.len()].copy_from_slice(data);
    mixer.set_bytes(id, &current)
}

/// Shape a raw value string to the mixer-side control type.
fn convert_value(
    raw: &str,
    ctl_type: CtlType,
    num_values: usize,
    index: Option<u32>,
) -> Result<CtlValue, BindError> {
    if let Some(i) = index {
        if i as usize >= num_values {
            return Err(BindError::IndexOutOfRange {
                index: i as usize,
                count: num_values,
            });
        }
    }

    match ctl_type {
        CtlType::Bool | CtlType::Int => Ok(CtlValue::Int(parse_uint(raw)?)),
        CtlType::Enum => Ok(CtlValue::Enum(raw.trim().to_string())),
        CtlType::Byte => {
            let bytes = parse_byte_list(raw)?;
            let start = index.unwrap_or(0) as usize;
            if bytes.len() > MAX_BYTE_LEN || start + bytes.len() > num_values {
                return Err(BindError::ByteOverflow {
                    len: bytes.len(),
                    index: start,
                    count: num_values,
                });
            }
            Ok(CtlValue::Bytes(bytes))
        }
    }
}

/// Parse an unsigned integer, accepting decimal or `0x` hex.
pub fn parse_uint(raw: &str) -> Result<u32, BindError> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|_| BindError::BadInt {
        raw: raw.to_string(),
    })
}

fn parse_byte_list(raw: &str) -> Result<Vec<u8>, BindError> {
    raw.split(',')
        .map(|token| {
            let token = token.trim();
            let value = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
                Some(hex) => u16::from_str_radix(hex, 16).ok(),
                None => token.parse::<u16>().ok(),
            };
            match value {
                Some(v) if v <= 255 => Ok(v as u8),
                _ => Err(BindError::BadBytes {
                    raw: raw.to_string(),
                }),
            }
        })
        .collect()
}

/// Resolved binding of a stream volume control.
#[derive(Debug, Clone, Copy)]
struct VolBinding {
    id: CtlId,
    min: i64,
    max: i64,
}

/// A stream's hardware volume control descriptor
/// (`<ctl function="leftvol|rightvol" …/>`).
#[derive(Debug, Clone)]
pub struct VolCtl {
    pub name: String,
    pub index: u32,
    /// Source line of the declaring element, kept for diagnostics.
    pub line: usize,
    cfg_min: Option<i64>,
    cfg_max: Option<i64>,
    bound: Option<VolBinding>,
}

impl VolCtl {
    pub fn new(name: String, index: u32, min: Option<i64>, max: Option<i64>, line: usize) -> Self {
        Self {
            name,
            index,
            line,
            cfg_min: min,
            cfg_max: max,
            bound: None,
        }
    }

    /// Resolve the control and fix its effective range. Configured min/max
    /// win over the mixer-reported range.
    pub fn bind(&mut self, mixer: &mut dyn MixerBackend) -> Result<bool, MixerError> {
        if self.bound.is_some() {
            return Ok(true);
        }
        let Some(id) = mixer.find_ctl(&self.name) else {
            return Ok(false);
        };
        let min = match self.cfg_min {
            Some(m) => m,
            None => mixer.range_min(id)?,
        };
        let max = match self.cfg_max {
            Some(m) => m,
            None => mixer.range_max(id)?,
        };
        debug!("Volume control '{}' bound, range {}..{}", self.name, min, max);
        self.bound = Some(VolBinding { id, min, max });
        Ok(true)
    }

    /// Map a 0..100 percentage into the control range and write it.
    pub fn apply_percent(&mut self, percent: u32, mixer: &mut dyn MixerBackend) {
        if self.bound.is_none() {
            mixer.rescan();
            match self.bind(mixer) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Volume control '{}' not present, write skipped", self.name);
                    return;
                }
                Err(e) => {
                    warn!("Volume control '{}' unusable: {}", self.name, e);
                    return;
                }
            }
        }
        let Some(binding) = self.bound else { return };
        let value = percent_to_value(percent, binding.min, binding.max);
        if let Err(e) = mixer.set_int(binding.id, Some(self.index as usize), value) {
            warn!("Volume write to '{}' failed: {}", self.name, e);
        }
    }
}

/// `min + pc·(max-min)/100`, clamped to 0 and `max` at the endpoints.
pub fn percent_to_value(percent: u32, min: i64, max: i64) -> i64 {
    match percent {
        0 => 0,
        p if p >= 100 => max,
        p => min + i64::from(p) * (max - min) / 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uint_decimal_and_hex() {
        assert_eq!(parse_uint("42").unwrap(), 42);
        assert_eq!(parse_uint(" 7 ").unwrap(), 7);
        assert_eq!(parse_uint("0x10").unwrap(), 16);
        assert_eq!(parse_uint("0XFF").unwrap(), 255);
    }

    #[test]
    fn test_parse_uint_rejects_garbage() {
        assert!(parse_uint("").is_err());
        assert!(parse_uint("-1").is_err());
        assert!(parse_uint("ten").is_err());
        assert!(parse_uint("0xZZ").is_err());
    }

    #[test]
    fn test_parse_byte_list_mixed_radix() {
        let bytes = parse_byte_list("0x10, 32,0x30, 64").unwrap();
        assert_eq!(bytes, vec![16, 32, 48, 64]);
    }

    #[test]
    fn test_parse_byte_list_range() {
        assert!(parse_byte_list("0,255").is_ok());
        assert!(parse_byte_list("256").is_err());
        assert!(parse_byte_list("1,,2").is_err());
        assert!(parse_byte_list("0x1FF").is_err());
    }

    #[test]
    fn test_convert_value_int() {
        let v = convert_value("3", CtlType::Int, 2, None).unwrap();
        assert_eq!(v, CtlValue::Int(3));
        let v = convert_value("1", CtlType::Bool, 1, Some(0)).unwrap();
        assert_eq!(v, CtlValue::Int(1));
    }

    #[test]
    fn test_convert_value_enum_keeps_string() {
        let v = convert_value(" DAC_L ", CtlType::Enum, 1, None).unwrap();
        assert_eq!(v, CtlValue::Enum("DAC_L".to_string()));
    }

    #[test]
    fn test_convert_value_index_bounds() {
        assert!(convert_value("1", CtlType::Int, 2, Some(1)).is_ok());
        assert!(matches!(
            convert_value("1", CtlType::Int, 2, Some(2)),
            Err(BindError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_convert_value_byte_overflow() {
        // 4 bytes at index 4 need at least 8 values
        assert!(convert_value("1,2,3,4", CtlType::Byte, 8, Some(4)).is_ok());
        assert!(matches!(
            convert_value("1,2,3,4", CtlType::Byte, 7, Some(4)),
            Err(BindError::ByteOverflow { .. })
        ));
    }

    #[test]
    fn test_percent_to_value_interpolates() {
        assert_eq!(percent_to_value(50, 0, 100), 50);
        assert_eq!(percent_to_value(50, 10, 20), 15);
        assert_eq!(percent_to_value(25, 0, 255), 63);
    }

    #[test]
    fn test_percent_to_value_endpoints() {
        assert_eq!(percent_to_value(0, 10, 20), 0);
        assert_eq!(percent_to_value(100, 10, 20), 20);
        assert_eq!(percent_to_value(180, 10, 20), 20);
    }

    proptest::proptest! {
        #[test]
        fn prop_interpolated_volume_stays_in_range(
            percent in 1u32..100,
            min in -1000i64..1000,
            width in 0i64..10_000,
        ) {
            let max = min + width;
            let value = percent_to_value(percent, min, max);
            proptest::prop_assert!(value >= min && value <= max);
        }

        #[test]
        fn prop_parse_uint_accepts_all_decimals(value in 0u32..u32::MAX) {
            proptest::prop_assert_eq!(parse_uint(&value.to_string()).unwrap(), value);
            proptest::prop_assert_eq!(parse_uint(&format!("{value:#x}")).unwrap(), value);
        }
    }
}
