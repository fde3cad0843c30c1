use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Payload encoding used on the event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON (default; what browser-side clients speak).
    #[default]
    Json,

    /// CBOR (compact binary, for high-rate log streams).
    Cbor,
}

/// Encode a value using the given format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode a value using the given format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Guess the format of a payload.
///
/// Commands and events are always maps, so a payload whose first
/// non-whitespace byte opens a JSON object or array is JSON; anything else
/// is treated as CBOR.
pub fn detect_format(data: &[u8]) -> Format {
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => Format::Json,
        _ => Format::Cbor,
    }
}

/// Decode a payload, detecting its format first.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    decode(data, detect_format(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BridgeCommand;
    use crate::event::{BridgeEvent, SessionState};

    #[test]
    fn test_command_decodes_from_both_formats() {
        let cmd = BridgeCommand::WriteToShell {
            data: "ls -l\n".to_string(),
        };

        let json = encode(&cmd, Format::Json).unwrap();
        let cbor = encode(&cmd, Format::Cbor).unwrap();

        for payload in [json, cbor] {
            match decode_auto::<BridgeCommand>(&payload).unwrap() {
                BridgeCommand::WriteToShell { data } => assert_eq!(data, "ls -l\n"),
                other => panic!("unexpected command {other:?}"),
            }
        }
    }

    #[test]
    fn test_event_cbor_smaller_than_json() {
        let event = BridgeEvent::SessionStatus {
            status: SessionState::Connected,
            message: "Connected to mock".to_string(),
        };

        let json = encode(&event, Format::Json).unwrap();
        let cbor = encode(&event, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"{\"type\": \"list_devices\"}"), Format::Json);
        assert_eq!(detect_format(b"  \n{\"type\": \"close_session\"}"), Format::Json);
        assert_eq!(detect_format(b"\xa1\x64type"), Format::Cbor);
        assert_eq!(detect_format(b""), Format::Cbor);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decode_auto::<BridgeCommand>(b"{not json").is_err());
        assert!(decode_auto::<BridgeCommand>(b"\xff\xff").is_err());
    }
}
