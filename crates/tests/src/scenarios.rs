//! End-to-end routing scenarios
//!
//! Each test loads a small document against an in-memory mixer and verifies
//! the complete write sequence an operation produces, including the cases
//! where the correct behavior is to write nothing at all.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use tinyhal_core::domain::{
    AudioConfig, CmError, CmOptions, ConfigMgr, DeviceKind, SampleFormat,
};
use tinyhal_infra::{Journal, MemOpener, MixerSpec, MixerWrite};

fn write_doc(dir: &TempDir, name: &str, xml: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, xml).unwrap();
    path
}

fn load(dir: &TempDir, xml: &str, spec: MixerSpec) -> (ConfigMgr, Journal) {
    let path = write_doc(dir, "audio.test.xml", xml);
    let opener = MemOpener::new().with_card(0, spec);
    let journal = opener.journal();
    let mgr = ConfigMgr::load(&CmOptions::with_config(path), &opener).unwrap();
    (mgr, journal)
}

fn pcm_out() -> AudioConfig {
    AudioConfig {
        sample_rate: 44100,
        channels: 2,
        format: SampleFormat::S16Le,
    }
}

fn pcm_in() -> AudioConfig {
    AudioConfig {
        sample_rate: 16000,
        channels: 1,
        format: SampleFormat::S16Le,
    }
}

// ============================================================================
// SPEAKER ENABLE AND REFERENCE COUNTING
// ============================================================================

#[test]
fn test_single_speaker_enable() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(
        &dir,
        r#"<audiohal><mixer card="0"/>
           <device name="speaker">
             <path name="on"><ctl name="SPK_EN" val="1"/></path>
           </device>
           <stream type="pcm" dir="out"/>
           </audiohal>"#,
        MixerSpec::new().int_ctl("SPK_EN", 1, 0, 1),
    );

    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    assert_eq!(journal.writes(), vec![MixerWrite::int("SPK_EN", None, 1)]);

    // no off path exists, so releasing writes nothing extra
    mgr.release_stream(stream);
    assert_eq!(journal.writes(), vec![MixerWrite::int("SPK_EN", None, 1)]);
    assert_eq!(mgr.device_use_count("speaker"), Some(0));
}

#[test]
fn test_shared_speaker_reference_counting() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(
        &dir,
        r#"<audiohal><mixer card="0"/>
           <device name="speaker">
             <path name="on"><ctl name="SPK_EN" val="1"/></path>
             <path name="off"><ctl name="SPK_EN" val="0"/></path>
           </device>
           <stream type="pcm" dir="out" instances="2"/>
           </audiohal>"#,
        MixerSpec::new().int_ctl("SPK_EN", 1, 0, 1),
    );

    let first = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    let second = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(first, DeviceKind::SPEAKER).unwrap();
    mgr.apply_route(second, DeviceKind::SPEAKER).unwrap();

    // the enable sequence ran exactly once
    assert_eq!(journal.writes(), vec![MixerWrite::int("SPK_EN", None, 1)]);
    assert_eq!(mgr.device_use_count("speaker"), Some(2));

    mgr.release_stream(first);
    assert_eq!(journal.len(), 1);
    assert_eq!(mgr.device_use_count("speaker"), Some(1));

    mgr.release_stream(second);
    assert_eq!(
        journal.writes(),
        vec![
            MixerWrite::int("SPK_EN", None, 1),
            MixerWrite::int("SPK_EN", None, 0),
        ]
    );
    assert_eq!(mgr.device_use_count("speaker"), Some(0));
}

// ============================================================================
// USE-CASE DISPATCH
// ============================================================================

#[test]
fn test_use_case_dispatch() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(
        &dir,
        r#"<audiohal><mixer card="0"/>
           <stream type="pcm" dir="in">
             <usecase name="mic_ns">
               <case name="on"><ctl name="NS_ENABLE" val="1"/></case>
               <case name="off"><ctl name="NS_ENABLE" val="0"/></case>
             </usecase>
           </stream>
           </audiohal>"#,
        MixerSpec::new().int_ctl("NS_ENABLE", 1, 0, 1),
    );

    let stream = mgr.get_stream(DeviceKind::MIC, 0, &pcm_in()).unwrap();
    mgr.apply_use_case(stream, "mic_ns", "on").unwrap();
    assert_eq!(journal.writes(), vec![MixerWrite::int("NS_ENABLE", None, 1)]);

    // unknown case: refused, and nothing reaches the mixer
    let err = mgr.apply_use_case(stream, "mic_ns", "mid").unwrap_err();
    assert!(matches!(err, CmError::NoSuchCase(_, _)));
    assert_eq!(journal.len(), 1);
}

// ============================================================================
// BYTE-ARRAY CONTROLS
// ============================================================================

#[test]
fn test_byte_array_splice_with_index() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(
        &dir,
        r#"<audiohal><mixer card="0"/>
           <device name="speaker">
             <path name="on"><ctl name="FW_PATCH" index="4" val="0x10,0x20,0x30,0x40"/></path>
           </device>
           <stream type="pcm" dir="out"/>
           </audiohal>"#,
        MixerSpec::new().byte_ctl("FW_PATCH", 16),
    );

    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();

    // bytes 4..8 replaced in the read-modify-write of the full 16-byte array
    let mut expected = vec![0u8; 16];
    expected[4..8].copy_from_slice(&[0x10, 0x20, 0x30, 0x40]);
    assert_eq!(journal.writes(), vec![MixerWrite::bytes("FW_PATCH", &expected)]);
}

#[test]
fn test_byte_array_full_length_literal() {
    let dir = TempDir::new().unwrap();
    let literal: Vec<u8> = (0..16).collect();
    let values = literal
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let (mgr, journal) = load(
        &dir,
        &format!(
            r#"<audiohal><mixer card="0"/>
               <device name="speaker">
                 <path name="on"><ctl name="FW_PATCH" index="0" val="{values}"/></path>
               </device>
               <stream type="pcm" dir="out"/>
               </audiohal>"#
        ),
        MixerSpec::new().byte_ctl("FW_PATCH", 16),
    );

    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    assert_eq!(journal.writes(), vec![MixerWrite::bytes("FW_PATCH", &literal)]);
}

// ============================================================================
// CODEC PROBE AND CARD RESOLUTION
// ============================================================================

#[test]
fn test_codec_probe_redirect_discards_root_document() {
    let dir = TempDir::new().unwrap();
    let probe_file = dir.path().join("codec_id");
    fs::write(&probe_file, "cs42l42\n").unwrap();

    write_doc(
        &dir,
        "audio.cs42l42.xml",
        r#"<audiohal><mixer card="0"/>
           <device name="speaker"><path name="on"><ctl name="SPK_EN" val="1"/></path></device>
           <stream type="pcm" dir="out"/>
           </audiohal>"#,
    );
    let root = write_doc(
        &dir,
        "audio.root.xml",
        &format!(
            r#"<audiohal>
                 <codec_probe file="{}">
                   <case name="wm8994" file="audio.wm8994.xml"/>
                   <case name="cs42l42" file="audio.cs42l42.xml"/>
                 </codec_probe>
                 <mixer card="0"/>
                 <device name="earpiece"/>
               </audiohal>"#,
            probe_file.display()
        ),
    );

    let opener = MemOpener::new().with_card(0, MixerSpec::new().int_ctl("SPK_EN", 1, 0, 1));
    let mgr = ConfigMgr::load(&CmOptions::with_config(root), &opener).unwrap();

    let names = mgr
        .inspect(|model| {
            model
                .devices
                .iter()
                .map(|d| d.name.clone())
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(names, vec!["speaker".to_string()]);
    // and the alternate document is fully functional
    assert!(mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).is_some());
}

#[test]
fn test_mixer_open_by_card_name() {
    let dir = TempDir::new().unwrap();
    for (num, id) in [(0, "internal"), (4, "apple")] {
        let card_dir = dir.path().join(format!("proc/asound/card{num}"));
        fs::create_dir_all(&card_dir).unwrap();
        fs::write(card_dir.join("id"), format!("{id}\n")).unwrap();
    }

    let root = write_doc(
        &dir,
        "audio.byname.xml",
        r#"<audiohal><mixer name="apple"/></audiohal>"#,
    );
    let mut options = CmOptions::with_config(root);
    options.proc_root = dir.path().join("proc");

    // only card 4 is known to the opener, so resolution must pick it
    let opener = MemOpener::new().with_card(4, MixerSpec::new());
    assert!(ConfigMgr::load(&options, &opener).is_ok());

    // card and name together are rejected
    let both = write_doc(
        &dir,
        "audio.both.xml",
        r#"<audiohal><mixer card="0" name="apple"/></audiohal>"#,
    );
    options.config_path = Some(both);
    assert!(ConfigMgr::load(&options, &opener).is_err());
}

// ============================================================================
// DEFERRED BINDING
// ============================================================================

#[test]
fn test_control_bound_lazily_after_rescan() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(
        &dir,
        r#"<audiohal><mixer card="0"/>
           <device name="speaker">
             <path name="on"><ctl name="DYN_EN" val="1"/></path>
           </device>
           <stream type="pcm" dir="out"/>
           </audiohal>"#,
        // DYN_EN only appears once the driver is rescanned
        MixerSpec::new().late_int_ctl("DYN_EN", 1, 0, 1),
    );

    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    assert_eq!(journal.writes(), vec![MixerWrite::int("DYN_EN", None, 1)]);
}

#[test]
fn test_missing_control_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(
        &dir,
        r#"<audiohal><mixer card="0"/>
           <device name="speaker">
             <path name="on">
               <ctl name="GHOST" val="1"/>
               <ctl name="SPK_EN" val="1"/>
             </path>
           </device>
           <stream type="pcm" dir="out"/>
           </audiohal>"#,
        MixerSpec::new().int_ctl("SPK_EN", 1, 0, 1),
    );

    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    // the missing control is skipped, the next one still runs
    assert_eq!(journal.writes(), vec![MixerWrite::int("SPK_EN", None, 1)]);
}
