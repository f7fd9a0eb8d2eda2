//! Schema-validating event-driven document parser
//!
//! The grammar lives in two tables: [`ELEMENTS`] describes, per element
//! kind, its tag name, legal and required attributes and the bitmask of
//! legal direct children; [`Attr`] canonicalises attribute names. A small
//! parse stack tracks the legal-child mask of the current element, and the
//! nesting rules guarantee at most one "current" device, path, stream,
//! use-case and case at any time.
//!
//! Elements sharing a tag name (`<case>` under `<codec_probe>` vs under
//! `<usecase>`, `<ctl>` in a path vs on a stream) are told apart by the
//! parent's child mask.

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, trace};

use crate::domain::control::{Ctl, VolCtl};
use crate::domain::device::{device_kind_for_name, Device, Path, PathId, PathPool};
use crate::domain::mixer::{MixerBackend, MixerOpener};
use crate::domain::routing::Model;
use crate::domain::stream::{Stream, StreamInfo, StreamType};

use super::{card_for_name, CmOptions, ConfigError, ParsedDoc};

/// Deepest legal element nesting (`audiohal > stream > usecase > case > ctl`
/// is five; one spare).
const MAX_DEPTH: usize = 6;

const DEFAULT_RATE: u32 = 44100;
const DEFAULT_PERIOD_SIZE: u32 = 1024;
const DEFAULT_PERIOD_COUNT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElemKind {
    AudioHal,
    Mixer,
    Init,
    CodecProbe,
    ProbeCase,
    Device,
    DevicePath,
    PathCtl,
    Stream,
    Enable,
    Disable,
    UseCase,
    UseCaseCase,
    StreamCtl,
}

const fn bit(kind: ElemKind) -> u16 {
    1 << (kind as u16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    Name,
    Val,
    Index,
    Card,
    Device,
    File,
    Type,
    Dir,
    Rate,
    PeriodSize,
    PeriodCount,
    Instances,
    Path,
    Function,
    Min,
    Max,
}

impl Attr {
    fn from_name(name: &str) -> Option<Attr> {
        let attr = match name {
            "name" => Attr::Name,
            "val" => Attr::Val,
            "index" => Attr::Index,
            "card" => Attr::Card,
            "device" => Attr::Device,
            "file" => Attr::File,
            "type" => Attr::Type,
            "dir" => Attr::Dir,
            "rate" => Attr::Rate,
            "period_size" => Attr::PeriodSize,
            "period_count" => Attr::PeriodCount,
            "instances" => Attr::Instances,
            "path" => Attr::Path,
            "function" => Attr::Function,
            "min" => Attr::Min,
            "max" => Attr::Max,
            _ => return None,
        };
        Some(attr)
    }
}

struct ElemSpec {
    kind: ElemKind,
    name: &'static str,
    required: &'static [Attr],
    optional: &'static [Attr],
    children: u16,
}

static ELEMENTS: &[ElemSpec] = &[
    ElemSpec {
        kind: ElemKind::AudioHal,
        name: "audiohal",
        required: &[],
        optional: &[],
        // device and stream become legal once the mixer has been accepted
        children: bit(ElemKind::Mixer) | bit(ElemKind::CodecProbe),
    },
    ElemSpec {
        kind: ElemKind::Mixer,
        name: "mixer",
        required: &[],
        optional: &[Attr::Card, Attr::Name],
        children: bit(ElemKind::Init),
    },
    ElemSpec {
        kind: ElemKind::Init,
        name: "init",
        required: &[],
        optional: &[],
        children: bit(ElemKind::PathCtl),
    },
    ElemSpec {
        kind: ElemKind::CodecProbe,
        name: "codec_probe",
        required: &[Attr::File],
        optional: &[],
        children: bit(ElemKind::ProbeCase),
    },
    ElemSpec {
        kind: ElemKind::ProbeCase,
        name: "case",
        required: &[Attr::Name, Attr::File],
        optional: &[],
        children: 0,
    },
    ElemSpec {
        kind: ElemKind::Device,
        name: "device",
        required: &[Attr::Name],
        optional: &[],
        children: bit(ElemKind::DevicePath),
    },
    ElemSpec {
        kind: ElemKind::DevicePath,
        name: "path",
        required: &[Attr::Name],
        optional: &[],
        children: bit(ElemKind::PathCtl),
    },
    ElemSpec {
        kind: ElemKind::PathCtl,
        name: "ctl",
        required: &[Attr::Name, Attr::Val],
        optional: &[Attr::Index],
        children: 0,
    },
    ElemSpec {
        kind: ElemKind::Stream,
        name: "stream",
        required: &[Attr::Type],
        optional: &[
            Attr::Name,
            Attr::Dir,
            Attr::Card,
            Attr::Device,
            Attr::Rate,
            Attr::PeriodSize,
            Attr::PeriodCount,
            Attr::Instances,
        ],
        children: bit(ElemKind::Enable)
            | bit(ElemKind::Disable)
            | bit(ElemKind::UseCase)
            | bit(ElemKind::StreamCtl),
    },
    ElemSpec {
        kind: ElemKind::Enable,
        name: "enable",
        required: &[Attr::Path],
        optional: &[],
        children: 0,
    },
    ElemSpec {
        kind: ElemKind::Disable,
        name: "disable",
        required: &[Attr::Path],
        optional: &[],
        children: 0,
    },
    ElemSpec {
        kind: ElemKind::UseCase,
        name: "usecase",
        required: &[Attr::Name],
        optional: &[],
        children: bit(ElemKind::UseCaseCase),
    },
    ElemSpec {
        kind: ElemKind::UseCaseCase,
        name: "case",
        required: &[Attr::Name],
        optional: &[],
        children: bit(ElemKind::PathCtl),
    },
    ElemSpec {
        kind: ElemKind::StreamCtl,
        name: "ctl",
        required: &[Attr::Function, Attr::Name],
        optional: &[Attr::Index, Attr::Min, Attr::Max],
        children: 0,
    },
];

// The table is laid out in ElemKind declaration order.
fn spec_of(kind: ElemKind) -> &'static ElemSpec {
    let spec = &ELEMENTS[kind as usize];
    debug_assert_eq!(spec.kind, kind);
    spec
}

/// Pick the table entry for a tag name given the parent's legal-child mask.
fn resolve(name: &str, allowed: u16, line: usize) -> Result<&'static ElemSpec, ConfigError> {
    let mut known = false;
    for spec in ELEMENTS {
        if spec.name != name {
            continue;
        }
        known = true;
        if allowed & bit(spec.kind) != 0 {
            return Ok(spec);
        }
    }
    if known {
        Err(ConfigError::Misplaced {
            line,
            name: name.to_string(),
        })
    } else {
        Err(ConfigError::UnknownElement {
            line,
            name: name.to_string(),
        })
    }
}

struct Frame {
    kind: ElemKind,
    children: u16,
}

/// Codec-probe table gathered while the element is open; evaluated on its
/// closing tag.
struct ProbeTable {
    file: PathBuf,
    cases: Vec<(String, String)>,
    line: usize,
}

#[derive(Default)]
struct ParseState {
    stack: Vec<Frame>,
    root_closed: bool,
    devices: Vec<Device>,
    streams: Vec<Stream>,
    pool: PathPool,
    mixer: Option<Box<dyn MixerBackend>>,
    init: Option<Path>,
    in_init: bool,
    probe: Option<ProbeTable>,
    cur_device: Option<usize>,
    cur_path: Option<usize>,
    cur_stream: Option<usize>,
    cur_usecase: Option<usize>,
    cur_case: Option<usize>,
}

pub(crate) enum Outcome {
    Done(ParsedDoc),
    Redirect(PathBuf),
}

pub(crate) struct DocParser<'a> {
    text: &'a str,
    doc_path: &'a FsPath,
    options: &'a CmOptions,
    opener: &'a dyn MixerOpener,
}

impl<'a> DocParser<'a> {
    pub(crate) fn new(
        text: &'a str,
        doc_path: &'a FsPath,
        options: &'a CmOptions,
        opener: &'a dyn MixerOpener,
    ) -> Self {
        Self {
            text,
            doc_path,
            options,
            opener,
        }
    }

    /// Parse the whole document. A codec-probe hit returns
    /// `Outcome::Redirect`, dropping every piece of partial state.
    pub(crate) fn run(self) -> Result<Outcome, ConfigError> {
        let mut reader = Reader::from_str(self.text);
        let mut state = ParseState::default();

        loop {
            let line = self.line_at(reader.buffer_position() as usize);
            match reader.read_event() {
                Err(e) => {
                    return Err(ConfigError::Xml {
                        line: self.line_at(reader.buffer_position() as usize),
                        msg: e.to_string(),
                    })
                }
                Ok(Event::Start(e)) => {
                    self.open(&mut state, &e, line)?;
                }
                Ok(Event::Empty(e)) => {
                    let kind = self.open(&mut state, &e, line)?;
                    state.stack.pop();
                    if let Some(redirect) = self.close(&mut state, kind)? {
                        return Ok(Outcome::Redirect(redirect));
                    }
                }
                Ok(Event::End(e)) => {
                    let Some(frame) = state.stack.pop() else {
                        return Err(ConfigError::Xml {
                            line,
                            msg: "unmatched closing tag".to_string(),
                        });
                    };
                    let name = element_name(e.name())?;
                    if spec_of(frame.kind).name != name {
                        return Err(ConfigError::Xml {
                            line,
                            msg: format!("mismatched closing tag </{name}>"),
                        });
                    }
                    if let Some(redirect) = self.close(&mut state, frame.kind)? {
                        return Ok(Outcome::Redirect(redirect));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
            }
        }

        if !state.stack.is_empty() {
            return Err(ConfigError::Xml {
                line: self.line_at(self.text.len()),
                msg: "document truncated".to_string(),
            });
        }
        let mixer = state.mixer.take().ok_or(ConfigError::MissingMixer)?;
        let model = Model {
            devices: state.devices,
            streams: state.streams,
            pool: state.pool,
        };
        Ok(Outcome::Done(ParsedDoc {
            model,
            mixer,
            init: state.init,
        }))
    }

    fn open(
        &self,
        state: &mut ParseState,
        element: &BytesStart<'_>,
        line: usize,
    ) -> Result<ElemKind, ConfigError> {
        if state.stack.len() >= MAX_DEPTH {
            return Err(ConfigError::TooDeep { line });
        }
        let name = element_name(element.name())?;
        let allowed = if state.stack.is_empty() {
            if state.root_closed {
                return Err(ConfigError::Misplaced {
                    line,
                    name: name.to_string(),
                });
            }
            bit(ElemKind::AudioHal)
        } else {
            state.stack.last().map(|f| f.children).unwrap_or(0)
        };
        let spec = resolve(name, allowed, line)?;
        let attrs = collect_attrs(element, spec, line)?;
        trace!("<{}> at line {}", spec.name, line);

        match spec.kind {
            ElemKind::AudioHal => {}
            ElemKind::Mixer => self.start_mixer(state, &attrs, line)?,
            ElemKind::Init => {
                state.in_init = true;
                state.init = Some(Path::new(PathId::NONE));
            }
            ElemKind::CodecProbe => {
                let file = attr_value(&attrs, Attr::File).unwrap_or_default();
                state.probe = Some(ProbeTable {
                    file: self.resolve_relative(file),
                    cases: Vec::new(),
                    line,
                });
            }
            ElemKind::ProbeCase => {
                if let Some(probe) = state.probe.as_mut() {
                    let codec = attr_value(&attrs, Attr::Name).unwrap_or_default();
                    let file = attr_value(&attrs, Attr::File).unwrap_or_default();
                    probe.cases.push((codec.to_string(), file.to_string()));
                }
            }
            ElemKind::Device => start_device(state, &attrs, line)?,
            ElemKind::DevicePath => start_path(state, &attrs, line)?,
            ElemKind::PathCtl => start_path_ctl(state, &attrs, line)?,
            ElemKind::Stream => start_stream(state, &attrs, line)?,
            ElemKind::Enable | ElemKind::Disable => {
                start_route_path(state, spec.kind, &attrs, line)?
            }
            ElemKind::UseCase => start_usecase(state, &attrs),
            ElemKind::UseCaseCase => start_usecase_case(state, &attrs),
            ElemKind::StreamCtl => start_stream_ctl(state, &attrs, line)?,
        }

        state.stack.push(Frame {
            kind: spec.kind,
            children: spec.children,
        });
        Ok(spec.kind)
    }

    /// End-of-element bookkeeping. Only a closing `<codec_probe>` can
    /// produce a redirect.
    fn close(&self, state: &mut ParseState, kind: ElemKind) -> Result<Option<PathBuf>, ConfigError> {
        match kind {
            ElemKind::AudioHal => state.root_closed = true,
            ElemKind::Mixer => {
                // device and stream definitions become legal, a second
                // mixer does not
                if let Some(frame) = state.stack.last_mut() {
                    frame.children =
                        bit(ElemKind::CodecProbe) | bit(ElemKind::Device) | bit(ElemKind::Stream);
                }
            }
            ElemKind::Init => {
                state.in_init = false;
                if let Some(init) = state.init.as_mut() {
                    init.ctls.shrink_to_fit();
                }
            }
            ElemKind::CodecProbe => {
                if let Some(probe) = state.probe.take() {
                    return self.finish_probe(&probe);
                }
            }
            ElemKind::Device => {
                if let Some(di) = state.cur_device.take() {
                    state.devices[di].paths.shrink_to_fit();
                }
            }
            ElemKind::DevicePath => {
                if let (Some(di), Some(pi)) = (state.cur_device, state.cur_path.take()) {
                    state.devices[di].paths[pi].ctls.shrink_to_fit();
                }
            }
            ElemKind::Stream => state.cur_stream = None,
            ElemKind::UseCase => {
                if let (Some(si), Some(ui)) = (state.cur_stream, state.cur_usecase.take()) {
                    state.streams[si].usecases[ui].cases.shrink_to_fit();
                }
            }
            ElemKind::UseCaseCase => {
                if let (Some(si), Some(ui), Some(ci)) =
                    (state.cur_stream, state.cur_usecase, state.cur_case.take())
                {
                    state.streams[si].usecases[ui].cases[ci].ctls.shrink_to_fit();
                }
            }
            ElemKind::ProbeCase
            | ElemKind::PathCtl
            | ElemKind::Enable
            | ElemKind::Disable
            | ElemKind::StreamCtl => {}
        }
        Ok(None)
    }

    fn start_mixer(
        &self,
        state: &mut ParseState,
        attrs: &[(Attr, String)],
        line: usize,
    ) -> Result<(), ConfigError> {
        let card_attr = attr_value(attrs, Attr::Card);
        let name_attr = attr_value(attrs, Attr::Name);
        let card = match (card_attr, name_attr) {
            (Some(card), None) => parse_u32(card, Attr::Card, line)?,
            (None, Some(name)) => card_for_name(&self.options.proc_root, name)?,
            _ => return Err(ConfigError::MixerCardAttrs { line }),
        };
        debug!("Opening mixer for card {}", card);
        let mixer = self
            .opener
            .open(card)
            .map_err(|source| ConfigError::MixerOpen { line, source })?;
        state.mixer = Some(mixer);
        Ok(())
    }

    /// Evaluate a closed codec-probe table: read the codec identity, pick
    /// the matching alternate document.
    fn finish_probe(&self, probe: &ProbeTable) -> Result<Option<PathBuf>, ConfigError> {
        let id_text = fs::read_to_string(&probe.file).map_err(|e| ConfigError::Io {
            path: probe.file.clone(),
            source: e,
        })?;
        let codec = id_text.lines().next().unwrap_or("").trim();
        let Some((_, alternate)) = probe.cases.iter().find(|(name, _)| name == codec) else {
            debug!("Codec '{}' has no redirect, continuing with this document", codec);
            return Ok(None);
        };

        let alternate = self.resolve_relative(alternate);
        if alternate.as_path() == self.doc_path {
            return Err(ConfigError::ProbeSelfRedirect { line: probe.line });
        }
        debug!("Codec '{}' selects {}", codec, alternate.display());
        Ok(Some(alternate))
    }

    /// Interpret a configured file name relative to the current document.
    fn resolve_relative(&self, value: &str) -> PathBuf {
        let path = PathBuf::from(value);
        if path.is_absolute() {
            return path;
        }
        match self.doc_path.parent() {
            Some(dir) => dir.join(path),
            None => path,
        }
    }

    fn line_at(&self, byte_pos: usize) -> usize {
        let end = byte_pos.min(self.text.len());
        self.text.as_bytes()[..end]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1
    }
}

fn element_name(name: quick_xml::name::QName<'_>) -> Result<&str, ConfigError> {
    std::str::from_utf8(name.into_inner()).map_err(|_| ConfigError::Xml {
        line: 0,
        msg: "element name is not utf-8".to_string(),
    })
}

/// Decode and validate an element's attributes against its table entry.
fn collect_attrs(
    element: &BytesStart<'_>,
    spec: &ElemSpec,
    line: usize,
) -> Result<Vec<(Attr, String)>, ConfigError> {
    let mut attrs = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ConfigError::Xml {
            line,
            msg: e.to_string(),
        })?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|_| ConfigError::Xml {
            line,
            msg: "attribute name is not utf-8".to_string(),
        })?;
        let Some(kind) = Attr::from_name(key) else {
            return Err(ConfigError::UnknownAttr {
                line,
                element: spec.name.to_string(),
                attr: key.to_string(),
            });
        };
        if !spec.required.contains(&kind) && !spec.optional.contains(&kind) {
            return Err(ConfigError::UnknownAttr {
                line,
                element: spec.name.to_string(),
                attr: key.to_string(),
            });
        }
        let value = attr
            .unescape_value()
            .map_err(|e| ConfigError::Xml {
                line,
                msg: e.to_string(),
            })?
            .into_owned();
        attrs.push((kind, value));
    }
    for required in spec.required {
        if !attrs.iter().any(|(k, _)| k == required) {
            return Err(ConfigError::MissingAttr {
                line,
                element: spec.name.to_string(),
                attr: attr_name(*required),
            });
        }
    }
    Ok(attrs)
}

fn attr_value<'v>(attrs: &'v [(Attr, String)], wanted: Attr) -> Option<&'v str> {
    attrs
        .iter()
        .find(|(k, _)| *k == wanted)
        .map(|(_, v)| v.as_str())
}

fn attr_name(attr: Attr) -> &'static str {
    match attr {
        Attr::Name => "name",
        Attr::Val => "val",
        Attr::Index => "index",
        Attr::Card => "card",
        Attr::Device => "device",
        Attr::File => "file",
        Attr::Type => "type",
        Attr::Dir => "dir",
        Attr::Rate => "rate",
        Attr::PeriodSize => "period_size",
        Attr::PeriodCount => "period_count",
        Attr::Instances => "instances",
        Attr::Path => "path",
        Attr::Function => "function",
        Attr::Min => "min",
        Attr::Max => "max",
    }
}

fn parse_u32(value: &str, attr: Attr, line: usize) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::BadValue {
        line,
        attr: attr_name(attr),
        value: value.to_string(),
    })
}

fn parse_i64(value: &str, attr: Attr, line: usize) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| ConfigError::BadValue {
        line,
        attr: attr_name(attr),
        value: value.to_string(),
    })
}

fn start_device(
    state: &mut ParseState,
    attrs: &[(Attr, String)],
    line: usize,
) -> Result<(), ConfigError> {
    let name = attr_value(attrs, Attr::Name).unwrap_or_default();
    let Some(kind) = device_kind_for_name(name) else {
        return Err(ConfigError::UnknownDevice {
            line,
            name: name.to_string(),
        });
    };
    if state.devices.iter().any(|d| d.name == name) {
        return Err(ConfigError::DuplicateDevice {
            line,
            name: name.to_string(),
        });
    }
    state.cur_device = Some(state.devices.len());
    state.devices.push(Device::new(name.to_string(), kind));
    Ok(())
}

fn start_path(
    state: &mut ParseState,
    attrs: &[(Attr, String)],
    line: usize,
) -> Result<(), ConfigError> {
    let name = attr_value(attrs, Attr::Name).unwrap_or_default();
    let id = state.pool.intern(name);
    let Some(di) = state.cur_device else {
        return Ok(());
    };
    if state.devices[di].paths.iter().any(|p| p.id == id) {
        return Err(ConfigError::DuplicatePath {
            line,
            name: name.to_string(),
        });
    }
    state.cur_path = Some(state.devices[di].paths.len());
    state.devices[di].paths.push(Path::new(id));
    Ok(())
}

fn start_path_ctl(
    state: &mut ParseState,
    attrs: &[(Attr, String)],
    line: usize,
) -> Result<(), ConfigError> {
    let name = attr_value(attrs, Attr::Name).unwrap_or_default().to_string();
    let value = attr_value(attrs, Attr::Val).unwrap_or_default().to_string();
    let index = match attr_value(attrs, Attr::Index) {
        Some(raw) => Some(parse_u32(raw, Attr::Index, line)?),
        None => None,
    };
    let ctl = Ctl::new(name, value, index, line);

    if state.in_init {
        if let Some(init) = state.init.as_mut() {
            init.ctls.push(ctl);
        }
    } else if let (Some(si), Some(ui), Some(ci)) =
        (state.cur_stream, state.cur_usecase, state.cur_case)
    {
        state.streams[si].usecases[ui].cases[ci].ctls.push(ctl);
    } else if let (Some(di), Some(pi)) = (state.cur_device, state.cur_path) {
        state.devices[di].paths[pi].ctls.push(ctl);
    }
    Ok(())
}

fn start_stream(
    state: &mut ParseState,
    attrs: &[(Attr, String)],
    line: usize,
) -> Result<(), ConfigError> {
    let type_attr = attr_value(attrs, Attr::Type).unwrap_or_default();
    let name = attr_value(attrs, Attr::Name).map(str::to_string);

    if let Some(name) = &name {
        if state
            .streams
            .iter()
            .any(|s| s.name.as_deref() == Some(name))
        {
            return Err(ConfigError::DuplicateStream {
                line,
                name: name.clone(),
            });
        }
    }

    let stream_type = if name.as_deref() == Some("global") {
        StreamType::Global
    } else {
        let dir = attr_value(attrs, Attr::Dir).ok_or(ConfigError::MissingAttr {
            line,
            element: "stream".to_string(),
            attr: "dir",
        })?;
        let input = match dir {
            "in" => true,
            "out" => false,
            _ => {
                return Err(ConfigError::BadValue {
                    line,
                    attr: "dir",
                    value: dir.to_string(),
                })
            }
        };
        match type_attr {
            "pcm" => {
                if input {
                    StreamType::PcmIn
                } else {
                    StreamType::PcmOut
                }
            }
            "compress" => {
                if input {
                    StreamType::CompressedIn
                } else {
                    StreamType::CompressedOut
                }
            }
            "hw" => {
                if name.is_none() {
                    return Err(ConfigError::NamelessHwStream { line });
                }
                if input {
                    StreamType::HwIn
                } else {
                    StreamType::HwOut
                }
            }
            _ => {
                return Err(ConfigError::BadValue {
                    line,
                    attr: "type",
                    value: type_attr.to_string(),
                })
            }
        }
    };

    let mut info = StreamInfo {
        stream_type,
        card: 0,
        device: 0,
        rate: DEFAULT_RATE,
        period_size: DEFAULT_PERIOD_SIZE,
        period_count: DEFAULT_PERIOD_COUNT,
    };
    if let Some(raw) = attr_value(attrs, Attr::Card) {
        info.card = parse_u32(raw, Attr::Card, line)?;
    }
    if let Some(raw) = attr_value(attrs, Attr::Device) {
        info.device = parse_u32(raw, Attr::Device, line)?;
    }
    if let Some(raw) = attr_value(attrs, Attr::Rate) {
        info.rate = parse_u32(raw, Attr::Rate, line)?;
    }
    if let Some(raw) = attr_value(attrs, Attr::PeriodSize) {
        info.period_size = parse_u32(raw, Attr::PeriodSize, line)?;
    }
    if let Some(raw) = attr_value(attrs, Attr::PeriodCount) {
        info.period_count = parse_u32(raw, Attr::PeriodCount, line)?;
    }
    let max_refs = match attr_value(attrs, Attr::Instances) {
        Some(raw) => parse_u32(raw, Attr::Instances, line)?.max(1),
        None => 1,
    };

    state.cur_stream = Some(state.streams.len());
    state.streams.push(Stream::new(name, info, max_refs));
    Ok(())
}

fn start_route_path(
    state: &mut ParseState,
    kind: ElemKind,
    attrs: &[(Attr, String)],
    line: usize,
) -> Result<(), ConfigError> {
    let name = attr_value(attrs, Attr::Path).unwrap_or_default();
    let id = state
        .pool
        .lookup(name)
        .ok_or_else(|| ConfigError::UnknownPath {
            line,
            name: name.to_string(),
        })?;
    if let Some(si) = state.cur_stream {
        match kind {
            ElemKind::Enable => state.streams[si].enable_path = id,
            _ => state.streams[si].disable_path = id,
        }
    }
    Ok(())
}

fn start_usecase(state: &mut ParseState, attrs: &[(Attr, String)]) {
    let name = attr_value(attrs, Attr::Name).unwrap_or_default().to_string();
    if let Some(si) = state.cur_stream {
        state.cur_usecase = Some(state.streams[si].usecases.len());
        state.streams[si].usecases.push(crate::domain::stream::UseCase {
            name,
            cases: Vec::new(),
        });
    }
}

fn start_usecase_case(state: &mut ParseState, attrs: &[(Attr, String)]) {
    let name = attr_value(attrs, Attr::Name).unwrap_or_default().to_string();
    if let (Some(si), Some(ui)) = (state.cur_stream, state.cur_usecase) {
        state.cur_case = Some(state.streams[si].usecases[ui].cases.len());
        state.streams[si].usecases[ui].cases.push(crate::domain::stream::Case {
            name,
            ctls: Vec::new(),
        });
    }
}

fn start_stream_ctl(
    state: &mut ParseState,
    attrs: &[(Attr, String)],
    line: usize,
) -> Result<(), ConfigError> {
    let function = attr_value(attrs, Attr::Function).unwrap_or_default();
    let name = attr_value(attrs, Attr::Name).unwrap_or_default().to_string();
    let index = match attr_value(attrs, Attr::Index) {
        Some(raw) => parse_u32(raw, Attr::Index, line)?,
        None => 0,
    };
    let min = match attr_value(attrs, Attr::Min) {
        Some(raw) => Some(parse_i64(raw, Attr::Min, line)?),
        None => None,
    };
    let max = match attr_value(attrs, Attr::Max) {
        Some(raw) => Some(parse_i64(raw, Attr::Max, line)?),
        None => None,
    };
    let vol = VolCtl::new(name, index, min, max, line);

    let Some(si) = state.cur_stream else {
        return Ok(());
    };
    match function {
        "leftvol" => state.streams[si].left_vol = Some(vol),
        "rightvol" => state.streams[si].right_vol = Some(vol),
        _ => {
            return Err(ConfigError::BadValue {
                line,
                attr: "function",
                value: function.to_string(),
            })
        }
    }
    Ok(())
}
