//! Shared types for frame ingest

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Newtype wrapper for plate region IDs assigned by the upstream tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RegionId(pub i64);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-frame message published by the vision process
///
/// Only the fields the engine reads are declared. Detector extras such as
/// `ts` or `bbox` are ignored whatever their numeric type.
#[derive(Debug, Deserialize)]
pub struct FrameMessage {
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub regions: Vec<RegionMessage>,
}

/// One detected plate region with its raw OCR text
#[derive(Debug, Deserialize)]
pub struct RegionMessage {
    #[serde(default)]
    pub region_id: Option<i64>,
    #[serde(default)]
    pub text: String,
}

/// Raw OCR candidate for one region in one frame
#[derive(Debug, Clone)]
pub struct PlateCandidate {
    pub region_id: RegionId,
    pub raw_text: String,
}

/// A processed frame, ready for the engine
#[derive(Debug, Clone)]
pub struct PlateFrame {
    pub seq: u64,
    pub camera: Option<String>,
    pub candidates: Vec<PlateCandidate>,
}

impl PlateFrame {
    pub fn new(seq: u64, candidates: Vec<PlateCandidate>) -> Self {
        Self { seq, camera: None, candidates }
    }

    /// Convenience for single-region frames (region 0)
    pub fn single(seq: u64, raw_text: &str) -> Self {
        Self::new(
            seq,
            vec![PlateCandidate { region_id: RegionId::default(), raw_text: raw_text.to_string() }],
        )
    }

    /// Build from a wire message; `fallback_seq` is used when the message has none
    pub fn from_message(msg: FrameMessage, fallback_seq: u64) -> Self {
        let candidates = msg
            .regions
            .into_iter()
            .map(|r| PlateCandidate {
                region_id: RegionId(r.region_id.unwrap_or(0)),
                raw_text: r.text,
            })
            .collect();
        Self { seq: msg.seq.unwrap_or(fallback_seq), camera: msg.camera, candidates }
    }
}

/// Parse a frame message payload
///
/// Returns None for malformed JSON; the caller counts and skips it.
pub fn parse_frame_message(json: &str, fallback_seq: u64) -> Option<PlateFrame> {
    let msg: FrameMessage = serde_json::from_str(json).ok()?;
    Some(PlateFrame::from_message(msg, fallback_seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_message() {
        let json = r#"{"camera":"lane-1","seq":42,"ts":1767617600000,
            "regions":[{"region_id":3,"text":"ab-12 cd 3456","bbox":[10,20,120,40]},
                       {"text":"XY99"}]}"#;
        let frame = parse_frame_message(json, 0).unwrap();
        assert_eq!(frame.seq, 42);
        assert_eq!(frame.camera.as_deref(), Some("lane-1"));
        assert_eq!(frame.candidates.len(), 2);
        assert_eq!(frame.candidates[0].region_id, RegionId(3));
        assert_eq!(frame.candidates[0].raw_text, "ab-12 cd 3456");
        assert_eq!(frame.candidates[1].region_id, RegionId(0));
    }

    #[test]
    fn test_parse_frame_message_fractional_and_negative_bbox() {
        let float_bbox =
            r#"{"regions":[{"region_id":1,"text":"AB12CD3456","bbox":[10.5,20.0,120.0,40.0]}]}"#;
        let frame = parse_frame_message(float_bbox, 0).unwrap();
        assert_eq!(frame.candidates.len(), 1);
        assert_eq!(frame.candidates[0].raw_text, "AB12CD3456");

        let negative_bbox = r#"{"ts":1.5e12,"regions":[{"text":"AB12CD3456","bbox":[-3,20,120,40]}]}"#;
        let frame = parse_frame_message(negative_bbox, 0).unwrap();
        assert_eq!(frame.candidates[0].region_id, RegionId(0));
    }

    #[test]
    fn test_parse_frame_message_minimal() {
        let frame = parse_frame_message("{}", 7).unwrap();
        assert_eq!(frame.seq, 7);
        assert!(frame.candidates.is_empty());
    }

    #[test]
    fn test_parse_frame_message_malformed() {
        assert!(parse_frame_message("not json", 0).is_none());
        assert!(parse_frame_message(r#"{"regions":5}"#, 0).is_none());
    }
}
