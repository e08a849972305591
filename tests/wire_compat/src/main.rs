fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use peerlink_protocol::{
        ChatRecord, ControlMessage, FileMeta, TransferDirection, TransferProgress, TransferStatus,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Browser peers serialize `655360.0` as `655360`; serde keeps the `.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Decodes a control-message fixture, re-encodes it, and compares the
    /// JSON values.
    fn control_roundtrip(name: &str) -> ControlMessage {
        let text = read_fixture(name);
        let msg = ControlMessage::decode(&text)
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"))
            .unwrap_or_else(|| panic!("{name} decoded as an unknown type"));

        let encoded = msg.encode().unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            normalize_value(&load_fixture(name)),
            normalize_value(&reparsed),
            "roundtrip mismatch for {name}:\n  fixture: {text}\n  encoded: {encoded}"
        );
        msg
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}"
        );
        parsed
    }

    #[test]
    fn fixture_ping_pong() {
        assert_eq!(control_roundtrip("ping.json"), ControlMessage::Ping);
        assert_eq!(control_roundtrip("pong.json"), ControlMessage::Pong);
    }

    #[test]
    fn fixture_text() {
        assert_eq!(
            control_roundtrip("text.json"),
            ControlMessage::Text("héllo, wörld \"quoted\"".into())
        );
    }

    #[test]
    fn fixture_file_start() {
        let msg = control_roundtrip("file_start.json");
        assert_eq!(
            msg,
            ControlMessage::FileStart(FileMeta {
                id: "0b6f2d1e-4c1a-4f53-9a43-2f1c7e5d9a10".into(),
                name: "holiday photo.jpg".into(),
                size: 196_608,
                mime_type: "image/jpeg".into(),
            })
        );
    }

    #[test]
    fn fixture_ack_file_start() {
        assert_eq!(
            control_roundtrip("ack_file_start.json"),
            ControlMessage::AckFileStart(Some("0b6f2d1e-4c1a-4f53-9a43-2f1c7e5d9a10".into()))
        );
        assert_eq!(
            control_roundtrip("ack_file_start_bare.json"),
            ControlMessage::AckFileStart(None)
        );
    }

    #[test]
    fn fixture_unknown_type_is_skipped() {
        let text = read_fixture("unknown_type.json");
        assert_eq!(ControlMessage::decode(&text).unwrap(), None);
    }

    #[test]
    fn fixture_transfer_progress() {
        let progress: TransferProgress = roundtrip_test("transfer_progress.json");
        assert_eq!(progress.direction, TransferDirection::Incoming);
        assert_eq!(progress.percent, 66);
        assert_eq!(progress.status, TransferStatus::Transferring);
    }

    #[test]
    fn fixture_chat_file_record() {
        let record: ChatRecord = roundtrip_test("chat_file_record.json");
        assert_eq!(record.transfer_id(), Some("t1"));
    }

    #[test]
    fn ping_has_no_payload_key() {
        let encoded = ControlMessage::Ping.encode().unwrap();
        assert_eq!(encoded, r#"{"type":"PING"}"#);
    }
}
