mod common;

use common::ScriptedTransport;
use kdash_core::convert::UnitConverter;
use kdash_core::protocol::{Command, DeviceRevision, DeviceSession};
use kdash_core::setup::Setup;
use kdash_core::telemetry::{assemble, ChannelValue, Snapshot};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn snapshot_for(transport: ScriptedTransport, setup: &Setup) -> Snapshot {
    let mut session = DeviceSession::new(transport);
    let frames = session.tick().unwrap();
    let converter = UnitConverter::from_setup(setup).unwrap();
    assemble(&frames, &converter, 1234.5, Duration::from_secs(3725))
}

fn approx(snapshot: &Snapshot, channel: &str, expected: f64) {
    let value = snapshot
        .number(channel)
        .unwrap_or_else(|| panic!("{channel} missing"));
    assert!(
        (value - expected).abs() < 0.01,
        "{channel}: {value} != {expected}"
    );
}

#[test]
fn test_kpro4_snapshot_with_defaults() {
    let snapshot = snapshot_for(ScriptedTransport::new(DeviceRevision::Kpro4), &Setup::default());

    assert_eq!(snapshot.get("rpm"), Some(&ChannelValue::Integer(850)));
    assert_eq!(snapshot.get("tps"), Some(&ChannelValue::Integer(50)));
    assert_eq!(snapshot.get("gear"), Some(&ChannelValue::Integer(3)));
    assert_eq!(snapshot.get("mil"), Some(&ChannelValue::Flag(false)));
    assert_eq!(snapshot.get("fmw"), Some(&ChannelValue::Text("1.05".into())));
    assert_eq!(snapshot.get("time"), Some(&ChannelValue::Text("01:02:05".into())));
    assert_eq!(snapshot.get("rev"), Some(&ChannelValue::Text("kpro4".into())));

    approx(&snapshot, "vss", 100.0);
    approx(&snapshot, "ect", 0.0);
    approx(&snapshot, "iat", 100.0);
    approx(&snapshot, "bat", 13.8);
    approx(&snapshot, "map", 1.0);
    approx(&snapshot, "o2", 14.7);
    approx(&snapshot, "cam", 10.0);
    approx(&snapshot, "flt", 30.0);
    approx(&snapshot, "eth", 10.0);
    approx(&snapshot, "odo", 1234.5);
    for n in 0..8 {
        approx(&snapshot, &format!("an{n}"), 2.5);
    }
}

#[test]
fn test_kpro2_omits_channels_it_lacks() {
    let snapshot = snapshot_for(ScriptedTransport::new(DeviceRevision::Kpro2), &Setup::default());

    for present in ["rpm", "vss", "ect", "iat", "bat", "tps", "map", "o2", "cam", "gear", "mil", "fmw", "ecu", "ign", "serial", "odo"] {
        assert!(snapshot.contains(present), "{present} missing");
    }
    for absent in ["an0", "an7", "eth", "flt"] {
        assert!(!snapshot.contains(absent), "{absent} should be absent");
    }
}

#[test]
fn test_preferred_units_applied() {
    let mut setup = Setup::default();
    setup.vss.unit = "mph".into();
    setup.ect.unit = "fahrenheit".into();
    setup.map.unit = "psi".into();
    setup.o2.unit = "lambda".into();
    setup.odo.unit = "miles".into();

    let snapshot = snapshot_for(ScriptedTransport::new(DeviceRevision::Kpro3), &setup);
    approx(&snapshot, "vss", 62.14);
    approx(&snapshot, "ect", 32.0);
    approx(&snapshot, "map", 14.5);
    approx(&snapshot, "o2", 1.0);
    approx(&snapshot, "odo", 767.09);
}

#[test]
fn test_status_flags_only_with_masks() {
    let transport = || ScriptedTransport::new(DeviceRevision::Kpro4);
    let plain = snapshot_for(transport(), &Setup::default());
    assert!(!plain.contains("bksw"));

    let mut setup = Setup::default();
    setup.status_bits.insert("bksw".into(), 0x08);
    setup.status_bits.insert("fanc".into(), 0x80);
    let masked = snapshot_for(transport(), &setup);
    assert_eq!(masked.get("bksw"), Some(&ChannelValue::Flag(true)));
    assert_eq!(masked.get("fanc"), Some(&ChannelValue::Flag(false)));
    assert!(!masked.contains("eps"));
}

#[test]
fn test_skipped_frame_omits_its_channels() {
    let transport = ScriptedTransport::new(DeviceRevision::Kpro4).truncating(Command::Sensors, 2);
    let snapshot = snapshot_for(transport, &Setup::default());

    assert!(!snapshot.contains("ect"));
    assert!(!snapshot.contains("iat"));
    assert!(!snapshot.contains("bat"));
    assert!(snapshot.contains("rpm"));
}

#[test]
fn test_failed_analog_conversion_drops_only_that_input() {
    let mut setup = Setup::default();
    setup.analog[1] = serde_json::from_value(serde_json::json!({
        "formula": "divider",
        "unit": "ohms",
        "params": {"r1": 2200.0}
    }))
    .unwrap();
    // full scale reads as an open circuit on the divider
    let transport = ScriptedTransport::new(DeviceRevision::Kpro4).with_value("an1", 4096);
    let snapshot = snapshot_for(transport, &setup);

    assert!(!snapshot.contains("an1"));
    approx(&snapshot, "an0", 2.5);
}
