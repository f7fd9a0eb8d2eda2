//! Example walking through the configuration manager lifecycle
//!
//! Run with: cargo run --package tinyhal-core --example routing_demo

use tinyhal_core::domain::{AudioConfig, CmOptions, ConfigMgr, DeviceKind, SampleFormat};
use tinyhal_infra::{MemOpener, MixerSpec};

const DOC: &str = r#"<audiohal>
    <mixer card="0">
        <init><ctl name="CODEC_RESET" val="1"/></init>
    </mixer>
    <device name="speaker">
        <path name="on"><ctl name="SPK_EN" val="1"/></path>
        <path name="off"><ctl name="SPK_EN" val="0"/></path>
    </device>
    <device name="headphone">
        <path name="on"><ctl name="HP_EN" val="1"/></path>
        <path name="off"><ctl name="HP_EN" val="0"/></path>
    </device>
    <stream type="pcm" dir="out" rate="48000">
        <usecase name="eq">
            <case name="on"><ctl name="EQ_EN" val="1"/></case>
            <case name="off"><ctl name="EQ_EN" val="0"/></case>
        </usecase>
        <ctl function="leftvol" name="HP_VOL" index="0"/>
        <ctl function="rightvol" name="HP_VOL" index="1"/>
    </stream>
</audiohal>"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("tinyhal_core=debug,info")
        .init();

    println!("=== TinyHAL Routing Demo ===\n");

    // 1. Write the demo document and build an in-memory mixer
    println!("1. Preparing demo configuration...");
    let dir = tempfile::TempDir::new()?;
    let config_path = dir.path().join("audio.demo.xml");
    std::fs::write(&config_path, DOC)?;
    let opener = MemOpener::new().with_card(
        0,
        MixerSpec::new()
            .int_ctl("CODEC_RESET", 1, 0, 1)
            .int_ctl("SPK_EN", 1, 0, 1)
            .int_ctl("HP_EN", 1, 0, 1)
            .int_ctl("EQ_EN", 1, 0, 1)
            .int_ctl("HP_VOL", 2, 0, 255),
    );
    let journal = opener.journal();

    // 2. Load: parses, binds controls and applies the init path
    println!("\n2. Loading the configuration manager...");
    let mgr = ConfigMgr::load(&CmOptions::with_config(&config_path), &opener)?;
    println!("   ✓ Init writes: {:?}", journal.writes());
    journal.clear();

    // 3. Acquire a PCM output stream
    println!("\n3. Acquiring a pcm-out stream...");
    let config = AudioConfig {
        sample_rate: 48000,
        channels: 2,
        format: SampleFormat::S16Le,
    };
    let stream = mgr
        .get_stream(DeviceKind::SPEAKER, 0, &config)
        .ok_or("no stream available")?;
    let info = mgr.stream_info(stream).ok_or("stream info missing")?;
    println!("   ✓ Got {:?} at {} Hz", info.stream_type, info.rate);

    // 4. Route it to the speaker, then move it to the headphones
    println!("\n4. Routing speaker -> headphone...");
    mgr.apply_route(stream, DeviceKind::SPEAKER)?;
    mgr.apply_route(stream, DeviceKind::HEADPHONE)?;
    println!("   ✓ Mixer writes: {:?}", journal.writes());
    journal.clear();

    // 5. Dispatch a use case and set the hardware volume
    println!("\n5. Use case and volume...");
    mgr.apply_use_case(stream, "eq", "on")?;
    mgr.set_hw_volume(stream, 75, 75)?;
    println!("   ✓ Mixer writes: {:?}", journal.writes());
    journal.clear();

    // 6. Release: the headphone path is torn down
    println!("\n6. Releasing the stream...");
    mgr.release_stream(stream);
    println!("   ✓ Teardown writes: {:?}", journal.writes());

    println!("\n=== Demo Complete ===");
    Ok(())
}
