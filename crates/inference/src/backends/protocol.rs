//! Line protocol between Samnotator and an out-of-process SAM3 bridge.
//!
//! Samnotator writes one request per line on the bridge's stdin; the bridge
//! answers on stdout. Every protocol line starts with a `SAMNOTATOR_` prefix;
//! anything else is ordinary process output and is only logged.
//!
//! Result payloads are JSON, either inline or base64-encoded JSON.

use base64::Engine;
use serde::{Deserialize, Serialize};

use samnotator_project_model::Mask;

use crate::interface::{MaskOutputOptions, PvsVideoOptions};
use crate::sam3::PromptBatches;

/// Request from Samnotator (stdin).
pub const REQUEST_PREFIX: &str = "SAMNOTATOR_REQUEST:";

/// Ask the bridge to exit (stdin).
pub const SHUTDOWN_PREFIX: &str = "SAMNOTATOR_SHUTDOWN:";

/// Model loaded, ready for requests (stdout).
pub const READY_PREFIX: &str = "SAMNOTATOR_READY:";

/// `<fraction> [message]` (stdout).
pub const PROGRESS_PREFIX: &str = "SAMNOTATOR_PROGRESS:";

/// Free-form log line (stdout).
pub const LOG_PREFIX: &str = "SAMNOTATOR_LOG:";

/// Response to the last request (stdout).
pub const RESULT_PREFIX: &str = "SAMNOTATOR_RESULT:";

/// Whether the bridge should load the image or the video tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    Image,
    Video,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Image => "image",
            BridgeMode::Video => "video",
        }
    }
}

/// Prompt batches for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFramePrompt {
    pub frame_index: usize,
    pub batches: PromptBatches,
}

/// A request as sent to the bridge. Prompts are already batched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub mode: BridgeMode,
    pub frame_paths: Vec<std::path::PathBuf>,
    pub frames: Vec<BridgeFramePrompt>,
    pub video_options: Option<PvsVideoOptions>,
    pub output_options: MaskOutputOptions,
}

/// Raw model output of one batch: `masks[object][candidate]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeBatchResult {
    pub instance_ids: Vec<u32>,
    pub masks: Vec<Vec<Mask>>,
    pub scores: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFrameResult {
    pub frame_index: usize,
    #[serde(default)]
    pub batches: Vec<BridgeBatchResult>,
}

/// The bridge's answer to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub frames: Vec<BridgeFrameResult>,
}

/// A parsed line of bridge output.
#[derive(Debug, PartialEq)]
pub enum BridgeLine<'a> {
    Ready(&'a str),
    Progress {
        fraction: f32,
        message: Option<&'a str>,
    },
    Log(&'a str),
    Result(Result<BridgeResponse, String>),
    /// Regular process output (not a protocol message).
    Other(&'a str),
}

/// Parse one line of bridge stdout.
pub fn parse_line(line: &str) -> BridgeLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix(READY_PREFIX) {
        return BridgeLine::Ready(rest.trim());
    }
    if let Some(rest) = line.strip_prefix(LOG_PREFIX) {
        return BridgeLine::Log(rest);
    }
    if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
        return BridgeLine::Result(decode_payload(rest));
    }
    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let rest = rest.trim();
        let (value, message) = match rest.split_once(char::is_whitespace) {
            Some((value, message)) => (value, Some(message.trim()).filter(|m| !m.is_empty())),
            None => (rest, None),
        };
        if let Ok(fraction) = value.parse::<f32>() {
            return BridgeLine::Progress {
                fraction: fraction.clamp(0.0, 1.0),
                message,
            };
        }
    }

    BridgeLine::Other(line)
}

/// Decode a result payload, inline JSON or base64 JSON.
pub fn decode_payload(payload: &str) -> Result<BridgeResponse, String> {
    let payload = payload.trim();
    if payload.starts_with('{') {
        return serde_json::from_str(payload).map_err(|e| format!("invalid result JSON: {e}"));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| format!("invalid base64 result payload: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid result JSON: {e}"))
}

/// Request line, without the trailing newline.
pub fn encode_request(request: &BridgeRequest) -> Result<String, serde_json::Error> {
    Ok(format!("{REQUEST_PREFIX}{}", serde_json::to_string(request)?))
}

/// Result line with a base64 payload, as a bridge would print it.
pub fn encode_result_base64(response: &BridgeResponse) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(response)?;
    Ok(format!(
        "{RESULT_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(json)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ready_and_log() {
        assert_eq!(parse_line("SAMNOTATOR_READY:\n"), BridgeLine::Ready(""));
        assert_eq!(
            parse_line("SAMNOTATOR_LOG:loading weights"),
            BridgeLine::Log("loading weights")
        );
        assert_eq!(
            parse_line("Some warning from torch"),
            BridgeLine::Other("Some warning from torch")
        );
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_line("SAMNOTATOR_PROGRESS:0.25 frame 3/12"),
            BridgeLine::Progress {
                fraction: 0.25,
                message: Some("frame 3/12")
            }
        );
        assert_eq!(
            parse_line("SAMNOTATOR_PROGRESS:2"),
            BridgeLine::Progress {
                fraction: 1.0,
                message: None
            }
        );
        assert!(matches!(
            parse_line("SAMNOTATOR_PROGRESS:half"),
            BridgeLine::Other(_)
        ));
    }

    #[test]
    fn test_result_inline_and_base64() {
        let response = BridgeResponse {
            error: None,
            frames: vec![BridgeFrameResult {
                frame_index: 0,
                batches: vec![BridgeBatchResult {
                    instance_ids: vec![0],
                    masks: vec![vec![Mask::from_fn(2, 2, |x, y| x == y)]],
                    scores: vec![vec![0.5]],
                }],
            }],
        };

        let inline = format!("{RESULT_PREFIX}{}", serde_json::to_string(&response).unwrap());
        assert_eq!(parse_line(&inline), BridgeLine::Result(Ok(response.clone())));

        let encoded = encode_result_base64(&response).unwrap();
        assert_eq!(parse_line(&encoded), BridgeLine::Result(Ok(response)));

        assert!(matches!(
            parse_line("SAMNOTATOR_RESULT:!!!"),
            BridgeLine::Result(Err(_))
        ));
    }

    #[test]
    fn test_error_response() {
        match parse_line(r#"SAMNOTATOR_RESULT:{"error":"CUDA out of memory"}"#) {
            BridgeLine::Result(Ok(r)) => {
                assert_eq!(r.error.as_deref(), Some("CUDA out of memory"));
                assert!(r.frames.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_encode_request_prefix() {
        let request = BridgeRequest {
            mode: BridgeMode::Image,
            frame_paths: vec!["a.png".into()],
            frames: vec![],
            video_options: None,
            output_options: MaskOutputOptions::default(),
        };
        let line = encode_request(&request).unwrap();
        assert!(line.starts_with(REQUEST_PREFIX));
        assert!(!line.contains('\n'));
        assert!(line.contains("\"mode\":\"image\""));
    }
}
