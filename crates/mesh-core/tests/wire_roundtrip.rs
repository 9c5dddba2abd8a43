//! Round-trip and layout checks across the public codec surface.

use rand::distributions::{Alphanumeric, DistString};
use rand::{thread_rng, Rng};
use mesh_core::{
    decode_position, decode_waypoint, encode_position, encode_waypoint, PositionFlags,
    PositionMessage, WaypointFlags, WaypointMessage, WireError, MAX_DESCRIPTION_BYTES,
    MAX_ICON_BYTES, MAX_NAME_BYTES, POSITION_VERSION, POSITION_WIRE_SIZE,
    WAYPOINT_MIN_WIRE_SIZE,
};

fn random_position(rng: &mut impl Rng) -> PositionMessage {
    PositionMessage {
        flags: PositionFlags::from_bits_retain(rng.gen()),
        lat_e7: rng.gen(),
        lon_e7: rng.gen(),
        alt_m: rng.gen(),
        speed_dmps: rng.gen(),
        course_cdeg: rng.gen(),
        sats_in_view: rng.gen(),
        timestamp: rng.gen(),
    }
}

fn random_text(rng: &mut impl Rng, max: usize) -> String {
    let len = rng.gen_range(0..=max);
    Alphanumeric.sample_string(rng, len)
}

fn random_waypoint(rng: &mut impl Rng) -> WaypointMessage {
    WaypointMessage {
        flags: WaypointFlags::from_bits_retain(rng.gen()),
        id: rng.gen(),
        lat_e7: rng.gen(),
        lon_e7: rng.gen(),
        expire_ts: rng.gen(),
        locked_to: rng.gen(),
        name: random_text(rng, MAX_NAME_BYTES),
        description: random_text(rng, MAX_DESCRIPTION_BYTES),
        icon: random_text(rng, MAX_ICON_BYTES),
    }
}

#[test]
fn position_roundtrips_for_random_values() {
    let mut rng = thread_rng();
    for _ in 0..2_000 {
        let msg = random_position(&mut rng);
        let encoded = encode_position(&msg);
        assert_eq!(encoded.len(), POSITION_WIRE_SIZE);
        assert_eq!(decode_position(&encoded).unwrap(), msg);
    }
}

#[test]
fn waypoint_roundtrips_for_random_values() {
    let mut rng = thread_rng();
    for _ in 0..2_000 {
        let msg = random_waypoint(&mut rng);
        let encoded = encode_waypoint(&msg).unwrap();
        assert_eq!(encoded.len(), msg.encoded_len());
        assert_eq!(decode_waypoint(&encoded).unwrap(), msg);
    }
}

#[test]
fn position_boundaries() {
    let encoded = encode_position(&PositionMessage::default());

    assert!(matches!(
        decode_position(&encoded[..21]),
        Err(WireError::TooShort { .. })
    ));

    let mut wrong_version = encoded.to_vec();
    wrong_version[0] = 0xFF;
    assert!(matches!(
        decode_position(&wrong_version),
        Err(WireError::UnsupportedVersion { got: 0xFF, .. })
    ));

    let mut correct = [0u8; POSITION_WIRE_SIZE];
    correct[0] = POSITION_VERSION;
    assert_eq!(decode_position(&correct).unwrap(), PositionMessage::default());
}

#[test]
fn extreme_values_keep_twos_complement() {
    let msg = PositionMessage {
        lat_e7: i32::MIN,
        lon_e7: i32::MAX,
        alt_m: i16::MIN,
        speed_dmps: u16::MAX,
        course_cdeg: u16::MAX,
        sats_in_view: u8::MAX,
        timestamp: u32::MAX,
        ..Default::default()
    };
    let encoded = encode_position(&msg);
    assert_eq!(&encoded[3..7], &[0x00, 0x00, 0x00, 0x80]);
    assert_eq!(&encoded[7..11], &[0xFF, 0xFF, 0xFF, 0x7F]);
    assert_eq!(&encoded[11..13], &[0x00, 0x80]);
    assert_eq!(decode_position(&encoded).unwrap(), msg);
}

#[test]
fn waypoint_name_one_over_limit_fails() {
    let msg = WaypointMessage {
        name: "x".repeat(31),
        ..Default::default()
    };
    assert!(matches!(
        encode_waypoint(&msg),
        Err(WireError::FieldTooLong { field: "name", .. })
    ));
}

#[test]
fn waypoint_minimum_size() {
    assert_eq!(WAYPOINT_MIN_WIRE_SIZE, 29);
    let encoded = encode_waypoint(&WaypointMessage::default()).unwrap();
    assert_eq!(encoded.len(), WAYPOINT_MIN_WIRE_SIZE);
}

#[test]
fn messages_serialize_to_json_with_named_flags() {
    let msg = PositionMessage {
        flags: PositionFlags::HAS_ALTITUDE | PositionFlags::HAS_COURSE,
        alt_m: 120,
        ..Default::default()
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("HAS_ALTITUDE"));

    let restored: PositionMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, msg);

    // Missing fields default.
    let partial: WaypointMessage = serde_json::from_str(r#"{"id": 5, "name": "ford"}"#).unwrap();
    assert_eq!(partial.id, 5);
    assert_eq!(partial.flags, WaypointFlags::empty());
    assert!(partial.description.is_empty());
}
