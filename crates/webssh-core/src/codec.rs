//! JSON text framing for the bridge channel, plus incremental UTF-8 decoding
//! of terminal output.

use crate::error::WebSshResult;
use crate::messages::{ClientMessage, ServerMessage};

/// Parse one inbound text frame.
///
/// Malformed JSON or a missing `type` yields [`WebSshError::ProtocolError`];
/// a well-formed frame with an unrecognised tag yields
/// [`ClientMessage::Unknown`].
///
/// [`WebSshError::ProtocolError`]: crate::WebSshError::ProtocolError
pub fn decode_client(frame: &str) -> WebSshResult<ClientMessage> {
    Ok(serde_json::from_str(frame)?)
}

/// Serialize one outbound message into a text frame.
pub fn encode_server(msg: &ServerMessage) -> WebSshResult<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a byte stream into text chunk by chunk.
///
/// Multi-byte sequences split across reads are carried over to the next
/// chunk. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    pending: Vec<u8>,
}

impl OutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, holding back an incomplete trailing sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = &bytes[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush any held-back bytes as replacement characters.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Number of bytes waiting for the rest of their sequence.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WebSshError;

    #[test]
    fn decode_input() {
        let msg = decode_client(r#"{"type":"input","data":"ls\n"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                data: "ls\n".into()
            }
        );
    }

    #[test]
    fn decode_input_without_data() {
        let msg = decode_client(r#"{"type":"input"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Input { data: String::new() });
    }

    #[test]
    fn decode_resize_defaults() {
        let msg = decode_client(r#"{"type":"resize"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize { cols: 80, rows: 24 });

        let msg = decode_client(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize { cols: 120, rows: 40 });
    }

    #[test]
    fn decode_ping_and_unknown() {
        assert_eq!(decode_client(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert_eq!(
            decode_client(r#"{"type":"telemetry","x":1}"#).unwrap(),
            ClientMessage::Unknown
        );
    }

    #[test]
    fn decode_malformed_is_protocol_error() {
        for frame in ["not json", r#"{"data":"x"}"#, r#"{"type":"resize","cols":-1}"#] {
            match decode_client(frame) {
                Err(WebSshError::ProtocolError(_)) => {}
                other => panic!("expected protocol error for {frame:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn encode_server_frames() {
        assert_eq!(
            encode_server(&ServerMessage::Connected).unwrap(),
            r#"{"type":"connected"}"#
        );
        assert_eq!(encode_server(&ServerMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            encode_server(&ServerMessage::output("hi")).unwrap(),
            r#"{"type":"output","data":"hi"}"#
        );
        assert_eq!(
            encode_server(&ServerMessage::disconnected("remote closed")).unwrap(),
            r#"{"type":"disconnected","reason":"remote closed"}"#
        );
        assert_eq!(
            encode_server(&ServerMessage::error("nope")).unwrap(),
            r#"{"type":"error","message":"nope"}"#
        );
    }

    #[test]
    fn output_decoder_carries_split_sequences() {
        let bytes = "héllo".as_bytes();
        // 'é' is two bytes at offsets 1..3; split in the middle.
        let mut dec = OutputDecoder::new();
        assert_eq!(dec.decode(&bytes[..2]), "h");
        assert_eq!(dec.pending_bytes(), 1);
        assert_eq!(dec.decode(&bytes[2..]), "éllo");
        assert_eq!(dec.pending_bytes(), 0);
    }

    #[test]
    fn output_decoder_replaces_invalid_bytes() {
        let mut dec = OutputDecoder::new();
        assert_eq!(dec.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn output_decoder_finish_flushes_pending() {
        let mut dec = OutputDecoder::new();
        assert_eq!(dec.decode(b"x\xe2\x82"), "x");
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert_eq!(dec.pending_bytes(), 0);
    }
}
