use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

/// One completed transform, as persisted in the shared log file.
///
/// Field names on disk are fixed by the existing log format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformRecord {
    #[serde(rename = "stringa_ricevuta")]
    pub received_text: String,
    #[serde(rename = "stringa_bwt")]
    pub transformed_text: String,
    #[serde(rename = "tempo_secondi")]
    pub elapsed_seconds: f64,
}

impl TransformRecord {
    pub fn new(received_text: String, transformed_text: String, elapsed_seconds: f64) -> Self {
        Self {
            received_text,
            transformed_text,
            elapsed_seconds,
        }
    }
}

/// Serializes a log as a JSON array indented with four spaces, the layout of
/// the existing log files.
pub fn encode_log(records: &[TransformRecord]) -> serde_json::Result<Vec<u8>> {
    let mut encoded = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut encoded, PrettyFormatter::with_indent(b"    "));
    records.serialize(&mut serializer)?;
    Ok(encoded)
}

pub fn decode_log(bytes: &[u8]) -> serde_json::Result<Vec<TransformRecord>> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_persisted_field_names() {
        let record = TransformRecord::new("banana".into(), "annb$aa".into(), 0.5);
        let value = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(
            value,
            serde_json::json!({
                "stringa_ricevuta": "banana",
                "stringa_bwt": "annb$aa",
                "tempo_secondi": 0.5,
            })
        );
    }

    #[test]
    fn parses_existing_log_entry() {
        let raw = r#"{
            "stringa_ricevuta": "caffè",
            "stringa_bwt": "èc$aff",
            "tempo_secondi": 3.1e-06
        }"#;
        let record: TransformRecord = serde_json::from_str(raw).expect("parse record");
        assert_eq!(record.received_text, "caffè");
        assert_eq!(record.transformed_text, "èc$aff");
        assert_eq!(record.elapsed_seconds, 3.1e-06);
    }

    #[test]
    fn log_encoding_is_indented_json_array() {
        let records = vec![
            TransformRecord::new("banana".into(), "annb$aa".into(), 0.25),
            TransformRecord::new("你好".into(), "好$你".into(), 0.125),
        ];
        let encoded = encode_log(&records).expect("encode log");
        let text = String::from_utf8(encoded.clone()).expect("utf-8 log");
        assert!(text.starts_with("[\n    {\n        \"stringa_ricevuta\""));
        assert_eq!(decode_log(&encoded).expect("decode log"), records);
    }

    #[test]
    fn empty_log_encodes_as_empty_array() {
        assert_eq!(encode_log(&[]).expect("encode log"), b"[]");
    }
}
