//! JSON message protocol spoken with the assistant backend.
//!
//! Every frame is a JSON object tagged by `type`, with the payload fields
//! flattened next to the tag.

use serde::{Deserialize, Serialize};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// One flushed capture buffer (base64 PCM)
    Audio { audio_data: String },
    /// Session-start announcement
    Greeting,
    /// Document upload (base64 PDF)
    Pdf { pdf_base64: String },
    /// Image upload (base64)
    VisionImage { image_data: String },
    /// Keep-alive, ignored by the backend
    Ping,
}

impl Outbound {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Tag name, for logging without dumping payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Audio { .. } => "audio",
            Outbound::Greeting => "greeting",
            Outbound::Pdf { .. } => "pdf",
            Outbound::VisionImage { .. } => "vision_image",
            Outbound::Ping => "ping",
        }
    }
}

/// Messages received from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Recognized user speech
    Transcription { text: String },
    /// Assistant reply text
    LlmResponse { text: String },
    /// A speech turn begins
    TtsStart,
    /// One decodable audio segment of the current turn
    TtsChunk { audio_chunk: String },
    /// The speech turn is complete
    TtsEnd,
    /// Informational status
    Status { message: String },
    /// Recoverable failure notice
    Error { message: String },
    /// Any tag this client does not know
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_json_format_examples() {
        assert_eq!(Outbound::Greeting.to_json().unwrap(), r#"{"type":"greeting"}"#);
        assert_eq!(Outbound::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);

        let audio = Outbound::Audio {
            audio_data: "AAAA".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(audio, r#"{"type":"audio","audio_data":"AAAA"}"#);

        let pdf = Outbound::Pdf {
            pdf_base64: "JVBERi0=".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(pdf, r#"{"type":"pdf","pdf_base64":"JVBERi0="}"#);

        let image = Outbound::VisionImage {
            image_data: "iVBO".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(image, r#"{"type":"vision_image","image_data":"iVBO"}"#);
    }

    #[test]
    fn test_outbound_kind_matches_tag() {
        let messages = vec![
            Outbound::Audio {
                audio_data: String::new(),
            },
            Outbound::Greeting,
            Outbound::Pdf {
                pdf_base64: String::new(),
            },
            Outbound::VisionImage {
                image_data: String::new(),
            },
            Outbound::Ping,
        ];
        for msg in messages {
            let json = msg.to_json().unwrap();
            assert!(
                json.contains(&format!("\"type\":\"{}\"", msg.kind())),
                "kind {} not in {}",
                msg.kind(),
                json
            );
        }
    }

    #[test]
    fn test_inbound_parses_every_backend_tag() {
        assert_eq!(
            Inbound::from_json(r#"{"type":"transcription","text":"hello"}"#).unwrap(),
            Inbound::Transcription {
                text: "hello".to_string()
            }
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"llm_response","text":"hi there"}"#).unwrap(),
            Inbound::LlmResponse {
                text: "hi there".to_string()
            }
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"tts_start"}"#).unwrap(),
            Inbound::TtsStart
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"tts_chunk","audio_chunk":"UklGRg=="}"#).unwrap(),
            Inbound::TtsChunk {
                audio_chunk: "UklGRg==".to_string()
            }
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"tts_end"}"#).unwrap(),
            Inbound::TtsEnd
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"status","message":"Thinking..."}"#).unwrap(),
            Inbound::Status {
                message: "Thinking...".to_string()
            }
        );
        assert_eq!(
            Inbound::from_json(r#"{"type":"error","message":"boom"}"#).unwrap(),
            Inbound::Error {
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_inbound_unknown_tag_is_not_an_error() {
        let msg = Inbound::from_json(r#"{"type":"vision_progress","percent":40}"#).unwrap();
        assert_eq!(msg, Inbound::Unknown);
    }

    #[test]
    fn test_inbound_missing_payload_is_an_error() {
        assert!(Inbound::from_json(r#"{"type":"transcription"}"#).is_err());
        assert!(Inbound::from_json(r#"{"text":"no tag"}"#).is_err());
        assert!(Inbound::from_json("not json at all").is_err());
    }

    #[test]
    fn test_inbound_ignores_extra_fields() {
        let msg = Inbound::from_json(r#"{"type":"tts_end","turn":3}"#).unwrap();
        assert_eq!(msg, Inbound::TtsEnd);
    }

    #[test]
    fn test_inbound_text_with_special_chars() {
        let original = Inbound::LlmResponse {
            text: r#"She said "hi" \n and left"#.to_string(),
        };
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(Inbound::from_json(&json).unwrap(), original);
    }
}
