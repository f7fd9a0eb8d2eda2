//! In-memory mixer backend
//!
//! A plain table of controls standing in for a sound card. Every write is
//! recorded into a shared [`Journal`] so callers can assert on the exact
//! mixer-write sequence an operation produced. Controls marked "late" stay
//! invisible until the first `rescan`, which is how the deferred-binding
//! path is exercised.

use std::sync::{Arc, Mutex};

use tracing::debug;

use tinyhal_core::domain::mixer::{
    CtlId, CtlType, MixerBackend, MixerError, MixerOpener, Result,
};

/// One observed control write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerWrite {
    Int {
        name: String,
        index: Option<usize>,
        value: i64,
    },
    Enum {
        name: String,
        item: String,
    },
    Bytes {
        name: String,
        data: Vec<u8>,
    },
}

impl MixerWrite {
    pub fn int(name: &str, index: Option<usize>, value: i64) -> Self {
        MixerWrite::Int {
            name: name.to_string(),
            index,
            value,
        }
    }

    pub fn enm(name: &str, item: &str) -> Self {
        MixerWrite::Enum {
            name: name.to_string(),
            item: item.to_string(),
        }
    }

    pub fn bytes(name: &str, data: &[u8]) -> Self {
        MixerWrite::Bytes {
            name: name.to_string(),
            data: data.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
enum CtlStore {
    Int {
        values: Vec<i64>,
        min: i64,
        max: i64,
        bool_like: bool,
    },
    Enum {
        items: Vec<String>,
        current: usize,
    },
    Bytes {
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
struct CtlDef {
    name: String,
    store: CtlStore,
    late: bool,
}

/// Declarative description of a mixer's control table.
#[derive(Debug, Clone, Default)]
pub struct MixerSpec {
    ctls: Vec<CtlDef>,
}

impl MixerSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int_ctl(mut self, name: &str, num_values: usize, min: i64, max: i64) -> Self {
        self.ctls.push(CtlDef {
            name: name.to_string(),
            store: CtlStore::Int {
                values: vec![0; num_values],
                min,
                max,
                bool_like: false,
            },
            late: false,
        });
        self
    }

    pub fn bool_ctl(mut self, name: &str) -> Self {
        self.ctls.push(CtlDef {
            name: name.to_string(),
            store: CtlStore::Int {
                values: vec![0],
                min: 0,
                max: 1,
                bool_like: true,
            },
            late: false,
        });
        self
    }

    pub fn enum_ctl(mut self, name: &str, items: &[&str]) -> Self {
        self.ctls.push(CtlDef {
            name: name.to_string(),
            store: CtlStore::Enum {
                items: items.iter().map(|s| s.to_string()).collect(),
                current: 0,
            },
            late: false,
        });
        self
    }

    pub fn byte_ctl(mut self, name: &str, num_values: usize) -> Self {
        self.ctls.push(CtlDef {
            name: name.to_string(),
            store: CtlStore::Bytes {
                data: vec![0; num_values],
            },
            late: false,
        });
        self
    }

    /// An int control that only appears after the first rescan, as a
    /// dynamically added driver control would.
    pub fn late_int_ctl(mut self, name: &str, num_values: usize, min: i64, max: i64) -> Self {
        self.ctls.push(CtlDef {
            name: name.to_string(),
            store: CtlStore::Int {
                values: vec![0; num_values],
                min,
                max,
                bool_like: false,
            },
            late: true,
        });
        self
    }
}

/// Shared, clonable write log.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<MixerWrite>>>);

impl Journal {
    pub fn writes(&self) -> Vec<MixerWrite> {
        self.0.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut w) = self.0.lock() {
            w.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, write: MixerWrite) {
        if let Ok(mut w) = self.0.lock() {
            w.push(write);
        }
    }
}

/// The in-memory mixer itself.
pub struct MemMixer {
    ctls: Vec<CtlDef>,
    scanned: bool,
    journal: Journal,
}

impl MemMixer {
    pub fn new(spec: MixerSpec) -> Self {
        Self::with_journal(spec, Journal::default())
    }

    pub fn with_journal(spec: MixerSpec, journal: Journal) -> Self {
        Self {
            ctls: spec.ctls,
            scanned: false,
            journal,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    fn def(&self, id: CtlId) -> Result<&CtlDef> {
        self.ctls
            .get(id.0 as usize)
            .filter(|d| !d.late || self.scanned)
            .ok_or(MixerError::NoSuchCtl(id))
    }

    fn def_mut(&mut self, id: CtlId) -> Result<&mut CtlDef> {
        let scanned = self.scanned;
        self.ctls
            .get_mut(id.0 as usize)
            .filter(|d| !d.late || scanned)
            .ok_or(MixerError::NoSuchCtl(id))
    }
}

impl MixerBackend for MemMixer {
    fn find_ctl(&mut self, name: &str) -> Option<CtlId> {
        self.ctls
            .iter()
            .position(|c| c.name == name && (!c.late || self.scanned))
            .map(|i| CtlId(i as u32))
    }

    fn rescan(&mut self) -> bool {
        let newly_visible = !self.scanned && self.ctls.iter().any(|c| c.late);
        self.scanned = true;
        if newly_visible {
            debug!("Rescan exposed late controls");
        }
        newly_visible
    }

    fn ctl_type(&self, id: CtlId) -> Result<CtlType> {
        Ok(match &self.def(id)?.store {
            CtlStore::Int { bool_like: true, .. } => CtlType::Bool,
            CtlStore::Int { .. } => CtlType::Int,
            CtlStore::Enum { .. } => CtlType::Enum,
            CtlStore::Bytes { .. } => CtlType::Byte,
        })
    }

    fn num_values(&self, id: CtlId) -> Result<usize> {
        Ok(match &self.def(id)?.store {
            CtlStore::Int { values, .. } => values.len(),
            CtlStore::Enum { .. } => 1,
            CtlStore::Bytes { data } => data.len(),
        })
    }

    fn range_min(&self, id: CtlId) -> Result<i64> {
        match &self.def(id)?.store {
            CtlStore::Int { min, .. } => Ok(*min),
            _ => Err(MixerError::WrongType(id, "int")),
        }
    }

    fn range_max(&self, id: CtlId) -> Result<i64> {
        match &self.def(id)?.store {
            CtlStore::Int { max, .. } => Ok(*max),
            _ => Err(MixerError::WrongType(id, "int")),
        }
    }

    fn set_int(&mut self, id: CtlId, index: Option<usize>, value: i64) -> Result<()> {
        let def = self.def_mut(id)?;
        let name = def.name.clone();
        let CtlStore::Int { values, .. } = &mut def.store else {
            return Err(MixerError::WrongType(id, "int"));
        };
        match index {
            Some(i) => {
                if i >= values.len() {
                    return Err(MixerError::IndexOutOfRange {
                        id,
                        index: i,
                        count: values.len(),
                    });
                }
                values[i] = value;
            }
            None => values.fill(value),
        }
        self.journal.push(MixerWrite::Int { name, index, value });
        Ok(())
    }

    fn set_enum(&mut self, id: CtlId, value: &str) -> Result<()> {
        let def = self.def_mut(id)?;
        let name = def.name.clone();
        let CtlStore::Enum { items, current } = &mut def.store else {
            return Err(MixerError::WrongType(id, "enum"));
        };
        let Some(pos) = items.iter().position(|i| i == value) else {
            return Err(MixerError::BadEnumValue(value.to_string()));
        };
        *current = pos;
        self.journal.push(MixerWrite::Enum {
            name,
            item: value.to_string(),
        });
        Ok(())
    }

    fn get_bytes(&self, id: CtlId) -> Result<Vec<u8>> {
        match &self.def(id)?.store {
            CtlStore::Bytes { data } => Ok(data.clone()),
            _ => Err(MixerError::WrongType(id, "byte")),
        }
    }

    fn set_bytes(&mut self, id: CtlId, data: &[u8]) -> Result<()> {
        let def = self.def_mut(id)?;
        let name = def.name.clone();
        let CtlStore::Bytes { data: stored } = &mut def.store else {
            return Err(MixerError::WrongType(id, "byte"));
        };
        if data.len() != stored.len() {
            return Err(MixerError::IndexOutOfRange {
                id,
                index: data.len(),
                count: stored.len(),
            });
        }
        stored.copy_from_slice(data);
        self.journal.push(MixerWrite::Bytes {
            name,
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// Maps card numbers to mixer definitions. All mixers opened through one
/// opener share its journal, so a test keeps observing writes after the
/// backend has been moved into the manager.
#[derive(Default)]
pub struct MemOpener {
    cards: Vec<(u32, MixerSpec)>,
    fallback: Option<MixerSpec>,
    journal: Journal,
}

impl MemOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, card: u32, spec: MixerSpec) -> Self {
        self.cards.push((card, spec));
        self
    }

    /// Serve this definition for any card number without an explicit entry.
    pub fn with_fallback(mut self, spec: MixerSpec) -> Self {
        self.fallback = Some(spec);
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl MixerOpener for MemOpener {
    fn open(&self, card: u32) -> Result<Box<dyn MixerBackend>> {
        let spec = self
            .cards
            .iter()
            .find(|(c, _)| *c == card)
            .map(|(_, s)| s.clone())
            .or_else(|| self.fallback.clone())
            .ok_or(MixerError::NoSuchCard(card))?;
        debug!("Opening in-memory mixer for card {}", card);
        Ok(Box::new(MemMixer::with_journal(spec, self.journal.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_and_type() {
        let mut mixer = MemMixer::new(
            MixerSpec::new()
                .bool_ctl("MUTE")
                .int_ctl("VOL", 2, 0, 255)
                .enum_ctl("ROUTE", &["dac", "bypass"])
                .byte_ctl("EQ", 8),
        );
        let vol = mixer.find_ctl("VOL").unwrap();
        assert_eq!(mixer.ctl_type(vol).unwrap(), CtlType::Int);
        assert_eq!(mixer.num_values(vol).unwrap(), 2);
        assert_eq!(mixer.range_max(vol).unwrap(), 255);

        let mute = mixer.find_ctl("MUTE").unwrap();
        assert_eq!(mixer.ctl_type(mute).unwrap(), CtlType::Bool);
        assert!(mixer.find_ctl("MISSING").is_none());
    }

    #[test]
    fn test_set_int_all_values_vs_indexed() {
        let mut mixer = MemMixer::new(MixerSpec::new().int_ctl("VOL", 2, 0, 255));
        let journal = mixer.journal();
        let vol = mixer.find_ctl("VOL").unwrap();

        mixer.set_int(vol, None, 10).unwrap();
        mixer.set_int(vol, Some(1), 20).unwrap();
        assert!(mixer.set_int(vol, Some(2), 30).is_err());

        assert_eq!(
            journal.writes(),
            vec![
                MixerWrite::int("VOL", None, 10),
                MixerWrite::int("VOL", Some(1), 20),
            ]
        );
    }

    #[test]
    fn test_enum_rejects_unknown_item() {
        let mut mixer = MemMixer::new(MixerSpec::new().enum_ctl("ROUTE", &["dac", "bypass"]));
        let route = mixer.find_ctl("ROUTE").unwrap();
        mixer.set_enum(route, "bypass").unwrap();
        assert!(matches!(
            mixer.set_enum(route, "adc"),
            Err(MixerError::BadEnumValue(_))
        ));
    }

    #[test]
    fn test_bytes_roundtrip_enforces_length() {
        let mut mixer = MemMixer::new(MixerSpec::new().byte_ctl("EQ", 4));
        let eq = mixer.find_ctl("EQ").unwrap();
        assert_eq!(mixer.get_bytes(eq).unwrap(), vec![0; 4]);
        mixer.set_bytes(eq, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mixer.get_bytes(eq).unwrap(), vec![1, 2, 3, 4]);
        assert!(mixer.set_bytes(eq, &[1, 2]).is_err());
    }

    #[test]
    fn test_late_ctl_needs_rescan() {
        let mut mixer = MemMixer::new(MixerSpec::new().late_int_ctl("DYN", 1, 0, 1));
        assert!(mixer.find_ctl("DYN").is_none());
        assert!(mixer.rescan());
        assert!(mixer.find_ctl("DYN").is_some());
        // second rescan reports nothing new
        assert!(!mixer.rescan());
    }

    #[test]
    fn test_opener_shares_journal() {
        let opener = MemOpener::new().with_card(0, MixerSpec::new().int_ctl("VOL", 1, 0, 10));
        let journal = opener.journal();
        let mut mixer = opener.open(0).unwrap();
        let vol = mixer.find_ctl("VOL").unwrap();
        mixer.set_int(vol, None, 5).unwrap();
        assert_eq!(journal.writes(), vec![MixerWrite::int("VOL", None, 5)]);
        assert!(opener.open(7).is_err());
    }
}
