//! Configuration loading
//!
//! Resolves the document to load, runs the schema-validating parser (see
//! [`loader`]), follows codec-probe redirects by restarting the parse on the
//! alternate document, then eagerly binds every control and applies the
//! `<init>` path before the model becomes reachable.

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::control::{BindError, Ctl};
use super::device::Path;
use super::mixer::{MixerBackend, MixerError, MixerOpener};
use super::routing::Model;

pub mod loader;

/// Longest accepted codec-probe redirect chain. The self-redirect check
/// catches A→A; this bounds A→B→A and longer cycles.
pub const MAX_REDIRECTS: usize = 4;

/// Environment variable naming the product when no explicit document path is
/// given; the default document is `<etc_dir>/audio.<product>.xml`.
pub const PRODUCT_ENV: &str = "TINYHAL_PRODUCT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("XML error at line {line}: {msg}")]
    Xml { line: usize, msg: String },

    #[error("Unknown element <{name}> at line {line}")]
    UnknownElement { line: usize, name: String },

    #[error("Element <{name}> not allowed here (line {line})")]
    Misplaced { line: usize, name: String },

    #[error("Unknown attribute '{attr}' on <{element}> at line {line}")]
    UnknownAttr {
        line: usize,
        element: String,
        attr: String,
    },

    #[error("Missing attribute '{attr}' on <{element}> at line {line}")]
    MissingAttr {
        line: usize,
        element: String,
        attr: &'static str,
    },

    #[error("Bad value '{value}' for '{attr}' at line {line}")]
    BadValue {
        line: usize,
        attr: &'static str,
        value: String,
    },

    #[error("Element nesting too deep at line {line}")]
    TooDeep { line: usize },

    #[error("Device '{name}' defined twice (line {line})")]
    DuplicateDevice { line: usize, name: String },

    #[error("Duplicate path '{name}' on one device (line {line})")]
    DuplicatePath { line: usize, name: String },

    #[error("Duplicate stream name '{name}' (line {line})")]
    DuplicateStream { line: usize, name: String },

    #[error("'{name}' is not a recognised device (line {line})")]
    UnknownDevice { line: usize, name: String },

    #[error("Path '{name}' is not defined on any device (line {line})")]
    UnknownPath { line: usize, name: String },

    #[error("Stream of type hw needs a name (line {line})")]
    NamelessHwStream { line: usize },

    #[error("<mixer> needs exactly one of 'card' or 'name' (line {line})")]
    MixerCardAttrs { line: usize },

    #[error("No sound card named '{name}'")]
    NoCardNamed { name: String },

    #[error("Cannot open mixer (line {line}): {source}")]
    MixerOpen { line: usize, source: MixerError },

    #[error("Document declares no <mixer>")]
    MissingMixer,

    #[error("Codec probe redirects to the current document (line {line})")]
    ProbeSelfRedirect { line: usize },

    #[error("Codec probe redirect chain exceeds {0} documents")]
    TooManyRedirects(usize),

    #[error("Control '{name}' at line {line} rejected: {source}")]
    BadControl {
        line: usize,
        name: String,
        source: BindError,
    },

    #[error("No configuration path and no product identifier")]
    NoConfigPath,
}

/// Bootstrap options. Everything the manager touches in the environment is
/// injected here so tests can redirect it.
#[derive(Debug, Clone)]
pub struct CmOptions {
    /// Absolute path of the root document; when absent the default document
    /// for the product is used.
    pub config_path: Option<PathBuf>,
    /// Directory holding the default `audio.<product>.xml` documents.
    pub etc_dir: PathBuf,
    /// Root of the proc filesystem used for card-by-name resolution.
    pub proc_root: PathBuf,
    /// Product identifier; falls back to the `TINYHAL_PRODUCT` variable.
    pub product: Option<String>,
}

impl Default for CmOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            etc_dir: PathBuf::from("/etc"),
            proc_root: PathBuf::from("/proc"),
            product: None,
        }
    }
}

impl CmOptions {
    pub fn with_config(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Everything one successful document parse produces.
pub(crate) struct ParsedDoc {
    pub(crate) model: Model,
    pub(crate) mixer: Box<dyn MixerBackend>,
    pub(crate) init: Option<Path>,
}

fn resolve_document(options: &CmOptions) -> Result<PathBuf, ConfigError> {
    if let Some(path) = &options.config_path {
        return Ok(path.clone());
    }
    let product = options
        .product
        .clone()
        .or_else(|| std::env::var(PRODUCT_ENV).ok())
        .ok_or(ConfigError::NoConfigPath)?;
    Ok(options.etc_dir.join(format!("audio.{product}.xml")))
}

/// Load the configuration, following codec-probe redirects. Each redirect
/// discards all partial state and restarts the parser on the alternate
/// document.
pub(crate) fn load(
    options: &CmOptions,
    opener: &dyn MixerOpener,
) -> Result<(Model, Box<dyn MixerBackend>), ConfigError> {
    let mut doc = resolve_document(options)?;
    for _ in 0..=MAX_REDIRECTS {
        info!("Loading audio configuration from {}", doc.display());
        let text = fs::read_to_string(&doc).map_err(|e| ConfigError::Io {
            path: doc.clone(),
            source: e,
        })?;
        let parser = loader::DocParser::new(&text, &doc, options, opener);
        match parser.run()? {
            loader::Outcome::Done(parsed) => return finish(parsed),
            loader::Outcome::Redirect(next) => {
                info!("Codec probe redirect to {}", next.display());
                doc = next;
            }
        }
    }
    Err(ConfigError::TooManyRedirects(MAX_REDIRECTS))
}

/// Post-parse phase: bind every control eagerly, resolve volume ranges,
/// apply the initial path once, and shrink the tables to their final size.
fn finish(parsed: ParsedDoc) -> Result<(Model, Box<dyn MixerBackend>), ConfigError> {
    let ParsedDoc {
        mut model,
        mut mixer,
        init,
    } = parsed;

    for device in &mut model.devices {
        for path in &mut device.paths {
            for ctl in &mut path.ctls {
                bind_strict(ctl, mixer.as_mut())?;
            }
        }
    }
    for stream in &mut model.streams {
        for usecase in &mut stream.usecases {
            for case in &mut usecase.cases {
                for ctl in &mut case.ctls {
                    bind_strict(ctl, mixer.as_mut())?;
                }
            }
        }
        for vol in [&mut stream.left_vol, &mut stream.right_vol]
            .into_iter()
            .flatten()
        {
            match vol.bind(mixer.as_mut()) {
                Ok(true) => {}
                Ok(false) => debug!("Volume control '{}' not found at load, deferred", vol.name),
                Err(e) => {
                    return Err(ConfigError::BadControl {
                        line: vol.line,
                        name: vol.name.clone(),
                        source: BindError::Mixer(e),
                    })
                }
            }
        }
    }

    if let Some(mut path) = init {
        for ctl in &mut path.ctls {
            bind_strict(ctl, mixer.as_mut())?;
        }
        debug!("Applying initial path ({} controls)", path.ctls.len());
        path.apply(mixer.as_mut());
    }

    model.shrink();
    Ok((model, mixer))
}

/// Load-time binding: a missing control stays unresolved for a later rebind,
/// but a control that exists and fails conversion fails the whole load.
fn bind_strict(ctl: &mut Ctl, mixer: &mut dyn MixerBackend) -> Result<(), ConfigError> {
    match ctl.bind(mixer) {
        Ok(true) => Ok(()),
        Ok(false) => {
            debug!("Control '{}' not found at load, deferred", ctl.name);
            Ok(())
        }
        Err(source) => Err(ConfigError::BadControl {
            line: ctl.line,
            name: ctl.name.clone(),
            source,
        }),
    }
}

/// Resolve `<mixer name=…>` by scanning `<proc_root>/asound/card*/id`. The
/// lowest matching card number wins.
pub(crate) fn card_for_name(proc_root: &FsPath, wanted: &str) -> Result<u32, ConfigError> {
    let asound = proc_root.join("asound");
    let entries = fs::read_dir(&asound).map_err(|e| ConfigError::Io {
        path: asound.clone(),
        source: e,
    })?;

    let mut found: Option<u32> = None;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(card_num) = file_name
            .to_str()
            .and_then(|n| n.strip_prefix("card"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        let Ok(id) = fs::read_to_string(entry.path().join("id")) else {
            continue;
        };
        if id.trim() == wanted {
            found = Some(found.map_or(card_num, |f| f.min(card_num)));
        }
    }
    found.ok_or_else(|| ConfigError::NoCardNamed {
        name: wanted.to_string(),
    })
}
