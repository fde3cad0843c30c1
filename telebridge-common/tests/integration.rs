//! Integration tests for the telebridge-common wire layer.

use telebridge_common::{
    BridgeCommand, BridgeEvent, ClientKeys, Format, MatchReport, MetricRow, Rect, SessionState,
    TableSample, decode, decode_auto, encode,
};

#[test]
fn test_command_travels_as_cbor_and_json() {
    let cmd = BridgeCommand::WaitForImageMatch {
        template_path: "templates/home.png".to_string(),
        device_id: "emulator-26101".to_string(),
        timeout_ms: Some(4000),
        poll_interval_ms: None,
    };

    for format in [Format::Json, Format::Cbor] {
        let bytes = encode(&cmd, format).expect("encode failed");
        match decode_auto::<BridgeCommand>(&bytes).expect("decode failed") {
            BridgeCommand::WaitForImageMatch {
                template_path,
                timeout_ms,
                poll_interval_ms,
                ..
            } => {
                assert_eq!(template_path, "templates/home.png");
                assert_eq!(timeout_ms, Some(4000));
                assert_eq!(poll_interval_ms, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

#[test]
fn test_event_key_matches_event_kind() {
    let keys = ClientKeys::new("lab/bridge");
    let event = BridgeEvent::LogChunk {
        text: "boot ok\n".to_string(),
    };

    let key = keys.event_key("panel", event.kind());
    assert_eq!(key, "lab/bridge/clients/panel/events/log-chunk");
}

#[test]
fn test_cpu_sample_event_roundtrip() {
    let sample = TableSample::from_rows(
        17.0,
        vec![
            MetricRow {
                id: "101".to_string(),
                owner: "root".to_string(),
                value: 3.0,
                name: "launchpad".to_string(),
            },
            MetricRow {
                id: "230".to_string(),
                owner: "owner".to_string(),
                value: 9.0,
                name: "org.example.player".to_string(),
            },
        ],
        10,
    );
    let event = BridgeEvent::CpuSample(sample);

    let bytes = encode(&event, Format::Json).unwrap();
    let decoded: BridgeEvent = decode(&bytes, Format::Json).unwrap();

    let BridgeEvent::CpuSample(decoded) = decoded else {
        panic!("expected cpu sample");
    };
    assert_eq!(decoded.total, 17.0);
    assert_eq!(decoded.rows[0].name, "org.example.player");
}

#[test]
fn test_match_result_payload_shape() {
    let event = BridgeEvent::MatchResult {
        report: Some(MatchReport {
            success: true,
            confidence: 0.93,
            bounds: Rect {
                x: 40,
                y: 12,
                width: 64,
                height: 32,
            },
        }),
        success: true,
        message: String::new(),
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "match_result");
    assert_eq!(json["report"]["bounds"]["width"], 64);
}

#[test]
fn test_status_event_order_labels() {
    let states = [
        (SessionState::Connecting, "connecting"),
        (SessionState::Connected, "connected"),
        (SessionState::Reconnecting, "reconnecting"),
        (SessionState::Disconnected, "disconnected"),
    ];

    for (state, label) in states {
        assert_eq!(state.as_str(), label);
        let json = serde_json::to_string(&BridgeEvent::status(state, "")).unwrap();
        assert!(json.contains(label));
    }
}
