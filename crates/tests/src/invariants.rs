//! Universal invariant checks
//!
//! The routing engine promises that device use counts always equal the
//! number of active streams routed to the device, that reference counts stay
//! within bounds, and that route/release sequences are idempotent and
//! restorative. These tests check those promises over fixed sequences and
//! over randomly generated call traces.

use std::collections::HashSet;
use std::fs;

use proptest::prelude::*;
use tempfile::TempDir;
use tinyhal_core::domain::{
    AudioConfig, CmOptions, ConfigMgr, DeviceKind, SampleFormat, StreamHandle,
};
use tinyhal_infra::{Journal, MemOpener, MixerSpec};

const DOC: &str = r#"<audiohal>
    <mixer card="0"/>
    <device name="global">
        <path name="on"><ctl name="CLK_EN" val="1"/></path>
        <path name="off"><ctl name="CLK_EN" val="0"/></path>
    </device>
    <device name="speaker">
        <path name="on"><ctl name="SPK_EN" val="1"/></path>
        <path name="off"><ctl name="SPK_EN" val="0"/></path>
    </device>
    <device name="headphone">
        <path name="on"><ctl name="HP_EN" val="1"/></path>
        <path name="off"><ctl name="HP_EN" val="0"/></path>
    </device>
    <stream type="pcm" dir="out" instances="2"/>
    <stream type="pcm" dir="out"/>
</audiohal>"#;

fn load(dir: &TempDir) -> (ConfigMgr, Journal) {
    let path = dir.path().join("audio.test.xml");
    fs::write(&path, DOC).unwrap();
    let opener = MemOpener::new().with_card(
        0,
        MixerSpec::new()
            .int_ctl("CLK_EN", 1, 0, 1)
            .int_ctl("SPK_EN", 1, 0, 1)
            .int_ctl("HP_EN", 1, 0, 1),
    );
    let journal = opener.journal();
    let mgr = ConfigMgr::load(&CmOptions::with_config(path), &opener).unwrap();
    (mgr, journal)
}

fn pcm_out() -> AudioConfig {
    AudioConfig {
        sample_rate: 48000,
        channels: 2,
        format: SampleFormat::S16Le,
    }
}

// ============================================================================
// FIXED SEQUENCES
// ============================================================================

#[test]
fn test_routing_to_the_same_target_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (mgr, journal) = load(&dir);
    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();

    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    let after_first = journal.writes();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    assert_eq!(journal.writes(), after_first);
}

#[test]
fn test_route_then_unroute_restores_device_counters() {
    let dir = TempDir::new().unwrap();
    let (mgr, _journal) = load(&dir);
    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();

    let speaker_before = mgr.device_use_count("speaker").unwrap();
    let headphone_before = mgr.device_use_count("headphone").unwrap();

    mgr.apply_route(stream, DeviceKind::SPEAKER | DeviceKind::HEADPHONE)
        .unwrap();
    mgr.apply_route(stream, DeviceKind::empty()).unwrap();

    assert_eq!(mgr.device_use_count("speaker").unwrap(), speaker_before);
    assert_eq!(mgr.device_use_count("headphone").unwrap(), headphone_before);
    mgr.release_stream(stream);
}

#[test]
fn test_get_release_roundtrip_restores_everything() {
    let dir = TempDir::new().unwrap();
    let (mgr, _journal) = load(&dir);

    let global_before = mgr.device_use_count("global").unwrap();
    let speaker_before = mgr.device_use_count("speaker").unwrap();

    let stream = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()).unwrap();
    mgr.apply_route(stream, DeviceKind::SPEAKER).unwrap();
    mgr.release_stream(stream);

    assert_eq!(mgr.device_use_count("global").unwrap(), global_before);
    assert_eq!(mgr.device_use_count("speaker").unwrap(), speaker_before);
    assert_eq!(mgr.stream_ref_count(stream), Some(0));
    assert_eq!(mgr.stream_current_devices(stream), Some(DeviceKind::empty()));
}

// ============================================================================
// GENERATED CALL TRACES
// ============================================================================

/// Device use counts must equal the number of distinct active streams routed
/// to each device, and every stream must satisfy its reference-count bounds.
fn check_invariants(
    mgr: &ConfigMgr,
    live: &[StreamHandle],
) -> std::result::Result<(), TestCaseError> {
    let mut speaker = 0u32;
    let mut headphone = 0u32;
    let mut global = 0u32;
    let mut seen = HashSet::new();
    for handle in live {
        // two handles to the same stream entry share one routing state
        if !seen.insert(*handle) {
            continue;
        }
        global += 1;
        let current = mgr.stream_current_devices(*handle).unwrap();
        if current.intersects(DeviceKind::SPEAKER) {
            speaker += 1;
        }
        if current.intersects(DeviceKind::HEADPHONE) {
            headphone += 1;
        }
    }
    prop_assert_eq!(mgr.device_use_count("speaker"), Some(speaker));
    prop_assert_eq!(mgr.device_use_count("headphone"), Some(headphone));
    prop_assert_eq!(mgr.device_use_count("global"), Some(global));

    mgr.inspect(|model| {
        for stream in &model.streams {
            assert!(stream.ref_count() <= stream.max_refs);
            if stream.ref_count() == 0 {
                assert!(stream.current_devices().is_empty());
            }
        }
    })
    .unwrap();
    Ok(())
}

proptest! {
    #[test]
    fn prop_counters_track_any_call_trace(
        ops in proptest::collection::vec((0u8..3u8, 0u8..8u8), 1..40)
    ) {
        let dir = TempDir::new().unwrap();
        let (mgr, _journal) = load(&dir);
        let mut live: Vec<StreamHandle> = Vec::new();

        for (op, arg) in ops {
            match op {
                0 => {
                    if let Some(handle) = mgr.get_stream(DeviceKind::SPEAKER, 0, &pcm_out()) {
                        live.push(handle);
                    }
                }
                1 => {
                    if !live.is_empty() {
                        let handle = live[arg as usize % live.len()];
                        let target = match arg % 4 {
                            0 => DeviceKind::SPEAKER,
                            1 => DeviceKind::HEADPHONE,
                            2 => DeviceKind::SPEAKER | DeviceKind::HEADPHONE,
                            _ => DeviceKind::empty(),
                        };
                        mgr.apply_route(handle, target).unwrap();
                    }
                }
                _ => {
                    if !live.is_empty() {
                        let handle = live.remove(arg as usize % live.len());
                        mgr.release_stream(handle);
                    }
                }
            }
            check_invariants(&mgr, &live)?;
        }

        for handle in live.drain(..) {
            mgr.release_stream(handle);
        }
        prop_assert_eq!(mgr.device_use_count("speaker"), Some(0));
        prop_assert_eq!(mgr.device_use_count("headphone"), Some(0));
        prop_assert_eq!(mgr.device_use_count("global"), Some(0));
    }
}
