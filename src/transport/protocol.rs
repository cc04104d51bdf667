//! Wire format for comparison streams
//!
//! Every frame is one JSON object. A frame without a `type` field is an
//! incremental answer; `{"type": "end"}` finishes the run.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::errors::{CompareError, Result};

/// Discriminator value of the terminal frame
pub const END_MARKER: &str = "end";

/// Request body for the comparison endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPayload {
    pub question_list: Vec<String>,
    pub version_list: Vec<String>,
    pub inputs: Value,
    pub node_id: String,
}

/// Partial result for one cell
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerFrame {
    /// Position within the request's own question list
    pub question_index: usize,
    pub version_id: String,
    pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Answer(AnswerFrame),
    End,
}

impl StreamMessage {
    pub fn answer(question_index: usize, version_id: impl Into<String>, answer: impl Into<String>) -> Self {
        StreamMessage::Answer(AnswerFrame {
            question_index,
            version_id: version_id.into(),
            answer: answer.into(),
        })
    }

    /// Encode as a wire frame
    pub fn to_frame(&self) -> String {
        match self {
            StreamMessage::Answer(frame) => json!({
                "question_index": frame.question_index,
                "version_id": frame.version_id,
                "answer": frame.answer,
            })
            .to_string(),
            StreamMessage::End => json!({ "type": END_MARKER }).to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    question_index: Option<usize>,
    #[serde(default)]
    version_id: Option<String>,
    #[serde(default)]
    answer: Option<Value>,
}

/// Decode one wire frame
pub fn decode_frame(text: &str) -> Result<StreamMessage> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| CompareError::protocol_frame(format!("malformed frame: {}", e), text))?;

    match raw.kind.as_deref() {
        Some(END_MARKER) => Ok(StreamMessage::End),
        Some(other) => Err(CompareError::protocol_frame(
            format!("unknown frame type '{}'", other),
            text,
        )),
        None => {
            let question_index = raw
                .question_index
                .ok_or_else(|| CompareError::protocol_frame("missing question_index", text))?;
            let version_id = raw
                .version_id
                .ok_or_else(|| CompareError::protocol_frame("missing version_id", text))?;
            let answer = match raw.answer {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Ok(StreamMessage::Answer(AnswerFrame {
                question_index,
                version_id,
                answer,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_without_type_is_answer() {
        let msg = decode_frame(r#"{"question_index": 1, "version_id": "vB", "answer": "4"}"#).unwrap();
        assert_eq!(msg, StreamMessage::answer(1, "vB", "4"));
    }

    #[test]
    fn test_end_marker() {
        assert_eq!(decode_frame(r#"{"type": "end"}"#).unwrap(), StreamMessage::End);
        assert_eq!(
            decode_frame(&StreamMessage::End.to_frame()).unwrap(),
            StreamMessage::End
        );
    }

    #[test]
    fn test_non_string_answer_is_stringified() {
        let msg = decode_frame(r#"{"question_index": 0, "version_id": "v", "answer": 42}"#).unwrap();
        assert_eq!(msg, StreamMessage::answer(0, "v", "42"));
    }

    #[test]
    fn test_rejects_bad_frames() {
        for frame in [
            "not json",
            r#"{"type": "progress"}"#,
            r#"{"version_id": "v", "answer": "x"}"#,
            r#"{"question_index": 0, "answer": "x"}"#,
            r#"{"question_index": -1, "version_id": "v"}"#,
        ] {
            let err = decode_frame(frame).unwrap_err();
            assert_eq!(err.category(), "protocol", "frame: {}", frame);
        }
    }
}
