//! Mixer capability interface
//!
//! The configuration manager never talks to ALSA (or any other control API)
//! directly. The card is opened through an injected [`MixerOpener`] and all
//! control traffic goes through the [`MixerBackend`] it returns, so the whole
//! engine can be driven against an in-memory mixer in tests.

use thiserror::Error;

/// Handle to a single mixer control, stable for the life of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtlId(pub u32);

/// The four control flavours a mixer exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlType {
    Bool,
    Int,
    Enum,
    Byte,
}

impl CtlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CtlType::Bool => "bool",
            CtlType::Int => "int",
            CtlType::Enum => "enum",
            CtlType::Byte => "byte",
        }
    }
}

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("No mixer for card {0}")]
    NoSuchCard(u32),

    #[error("No such control id {0:?}")]
    NoSuchCtl(CtlId),

    #[error("Control {0:?} is not a {1} control")]
    WrongType(CtlId, &'static str),

    #[error("Value index {index} out of range for control {id:?} ({count} values)")]
    IndexOutOfRange { id: CtlId, index: usize, count: usize },

    #[error("Enum value '{0}' not accepted")]
    BadEnumValue(String),

    #[error("Mixer I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, MixerError>;

/// A live, opened mixer.
///
/// Write calls mutate hardware state; lookup calls are cheap. Implementations
/// must tolerate `find_ctl` misses (deferred binding retries them after a
/// `rescan`).
pub trait MixerBackend: Send {
    /// Look up a control by name.
    fn find_ctl(&mut self, name: &str) -> Option<CtlId>;

    /// Ask the driver to pick up dynamically added controls. Returns whether
    /// anything new appeared (callers skip the retry lookup otherwise).
    fn rescan(&mut self) -> bool;

    fn ctl_type(&self, id: CtlId) -> Result<CtlType>;

    /// Number of values carried by a multi-valued control (1 for scalars).
    fn num_values(&self, id: CtlId) -> Result<usize>;

    fn range_min(&self, id: CtlId) -> Result<i64>;

    fn range_max(&self, id: CtlId) -> Result<i64>;

    /// Write an integer (or boolean, as 0/1) value. `index` of `None` writes
    /// every value slot of the control.
    fn set_int(&mut self, id: CtlId, index: Option<usize>, value: i64) -> Result<()>;

    /// Select an enum item by its string name.
    fn set_enum(&mut self, id: CtlId, value: &str) -> Result<()>;

    /// Read the full byte array of a byte control.
    fn get_bytes(&self, id: CtlId) -> Result<Vec<u8>>;

    /// Write the full byte array of a byte control.
    fn set_bytes(&mut self, id: CtlId, data: &[u8]) -> Result<()>;
}

/// Opens mixers by card number. Name-to-card resolution happens in the
/// loader by scanning `<proc>/asound/card*/id`, so openers only ever see
/// numbers.
pub trait MixerOpener {
    fn open(&self, card: u32) -> Result<Box<dyn MixerBackend>>;
}
