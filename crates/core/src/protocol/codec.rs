//! Frame encoding and incremental decoding.

use crate::config::ProtocolConfig;

use super::envelope::{InboundMessage, RequestEnvelope, ResponseEnvelope};
use super::error::ProtocolError;

/// Serializes envelopes into wire records.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    record_separator: String,
    message_separator: String,
    data_prefix: String,
    ready_sentinel: String,
}

impl FrameEncoder {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            record_separator: config.record_separator.clone(),
            message_separator: config.message_separator.clone(),
            data_prefix: config.data_prefix.clone(),
            ready_sentinel: config.ready_sentinel.clone(),
        }
    }

    /// Encodes a request as one JSON line followed by the record separator.
    pub fn encode_request(&self, envelope: &RequestEnvelope) -> Result<Vec<u8>, ProtocolError> {
        let mut record = serde_json::to_string(envelope)?;
        record.push_str(&self.record_separator);
        Ok(record.into_bytes())
    }

    /// Encodes a data message the way a worker emits it.
    pub fn encode_response(&self, envelope: &ResponseEnvelope) -> Result<Vec<u8>, ProtocolError> {
        let body = serde_json::to_string(&envelope.fields)?;
        Ok(format!("{}{}{}\n", self.data_prefix, body, self.message_separator).into_bytes())
    }

    pub fn encode_log(&self, text: &str) -> Vec<u8> {
        format!("{}{}\n", text, self.message_separator).into_bytes()
    }

    pub fn encode_ready(&self) -> Vec<u8> {
        format!("{}{}\n", self.ready_sentinel, self.message_separator).into_bytes()
    }
}

/// Incremental decoder for the worker's stdout.
///
/// Bytes are buffered until a message separator arrives, so reads may be split
/// anywhere, including inside the separator or a multi-byte character.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    separator: Vec<u8>,
    data_prefix: String,
    ready_sentinel: String,
    ready_seen: bool,
}

impl FrameDecoder {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            buffer: Vec::new(),
            separator: config.message_separator.as_bytes().to_vec(),
            data_prefix: config.data_prefix.clone(),
            ready_sentinel: config.ready_sentinel.clone(),
            ready_seen: false,
        }
    }

    /// Appends newly read bytes and returns every message completed by them.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<InboundMessage> {
        self.buffer.extend_from_slice(bytes);
        normalize_newlines(&mut self.buffer);

        let mut messages = Vec::new();
        // Workers may print the sentinel as a plain line, without a separator.
        if !self.ready_seen && self.take_ready_line() {
            self.ready_seen = true;
            messages.push(InboundMessage::Ready);
        }

        while let Some(pos) = find(&self.buffer, &self.separator) {
            let segment: Vec<u8> = self.buffer.drain(..pos + self.separator.len()).collect();
            let text = String::from_utf8_lossy(&segment[..pos]);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            messages.push(self.classify(text));
        }
        messages
    }

    /// Flushes an unterminated tail at end of stream. It is never treated as data.
    pub fn finish(&mut self) -> Option<InboundMessage> {
        let tail = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        if tail.is_empty() {
            None
        } else {
            Some(InboundMessage::Log(tail))
        }
    }

    /// Bytes waiting for a separator.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    fn classify(&mut self, message: &str) -> InboundMessage {
        if message
            .lines()
            .any(|line| line.trim_start().starts_with(&self.ready_sentinel))
        {
            self.ready_seen = true;
            return InboundMessage::Ready;
        }

        match message.strip_prefix(&self.data_prefix) {
            Some(body) => match ResponseEnvelope::parse(body.trim()) {
                Ok(envelope) => InboundMessage::Data(envelope),
                Err(reason) => InboundMessage::Malformed { reason },
            },
            None => InboundMessage::Log(message.to_string()),
        }
    }

    /// Removes the first complete line starting with the ready sentinel.
    fn take_ready_line(&mut self) -> bool {
        let sentinel = self.ready_sentinel.as_bytes();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = trim_ascii_start(&self.buffer[start..end]);
            if line.starts_with(sentinel) {
                self.buffer.drain(start..=end);
                return true;
            }
            start = end + 1;
        }
        false
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let skip = bytes.iter().take_while(|b| b.is_ascii_whitespace()).count();
    &bytes[skip..]
}

/// Rewrites `\r\n` to `\n`. A trailing lone `\r` is kept until its pair arrives.
fn normalize_newlines(buffer: &mut Vec<u8>) {
    if !buffer.windows(2).any(|w| w == b"\r\n") {
        return;
    }
    let mut out = Vec::with_capacity(buffer.len());
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] == b'\r' && buffer.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(buffer[i]);
        i += 1;
    }
    *buffer = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn protocol() -> ProtocolConfig {
        ProtocolConfig::default()
    }

    fn response(id: &str) -> ResponseEnvelope {
        let value = json!({"id": id, "code": 0, "fnames": [format!("{}.mid", id)]});
        ResponseEnvelope::parse(&value.to_string()).unwrap()
    }

    fn stream(encoder: &FrameEncoder, count: usize) -> (Vec<u8>, Vec<InboundMessage>) {
        let mut bytes = Vec::new();
        let mut expected = Vec::new();
        for i in 0..count {
            let env = response(&format!("item-{}", i));
            bytes.extend(encoder.encode_response(&env).unwrap());
            expected.push(InboundMessage::Data(env));
            if i % 2 == 0 {
                bytes.extend(encoder.encode_log(&format!("progress {}", i)));
                expected.push(InboundMessage::Log(format!("progress {}", i)));
            }
        }
        (bytes, expected)
    }

    #[test]
    fn test_decode_single_chunk() {
        let config = protocol();
        let encoder = FrameEncoder::new(&config);
        let (bytes, expected) = stream(&encoder, 3);

        let mut decoder = FrameDecoder::new(&config);
        assert_eq!(decoder.decode(&bytes), expected);
        assert!(decoder.buffered().iter().all(|b| b.is_ascii_whitespace()));
    }

    #[test]
    fn test_decode_any_chunking_yields_same_messages() {
        let config = protocol();
        let encoder = FrameEncoder::new(&config);
        let (bytes, expected) = stream(&encoder, 5);

        for chunk_size in [1, 2, 3, 5, 7, 11, 64] {
            let mut decoder = FrameDecoder::new(&config);
            let decoded: Vec<_> = bytes
                .chunks(chunk_size)
                .flat_map(|chunk| decoder.decode(chunk))
                .collect();
            assert_eq!(decoded, expected, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_decode_split_inside_separator() {
        let config = protocol();
        let mut decoder = FrameDecoder::new(&config);

        let first = decoder.decode(br#"<<DATA>>{"id":"a","code":0,"fnames":[]}<<EN"#);
        assert!(first.is_empty());
        let second = decoder.decode(b"D>>\n");
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], InboundMessage::Data(env) if env.id == "a"));
    }

    #[test]
    fn test_decode_normalizes_crlf_across_chunks() {
        let config = protocol();
        let mut decoder = FrameDecoder::new(&config);

        let mut decoded = decoder.decode(b"line one\r");
        decoded.extend(decoder.decode(b"\nline two<<END>>\r\n"));
        assert_eq!(
            decoded,
            vec![InboundMessage::Log("line one\nline two".to_string())]
        );
    }

    #[test]
    fn test_malformed_data_does_not_corrupt_stream() {
        let config = protocol();
        let mut decoder = FrameDecoder::new(&config);

        let decoded = decoder.decode(
            b"<<DATA>>{not json<<END>>\n<<DATA>>{\"id\":\"b\",\"code\":0,\"fnames\":[]}<<END>>\n",
        );
        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[0], InboundMessage::Malformed { .. }));
        assert!(matches!(&decoded[1], InboundMessage::Data(env) if env.id == "b"));
    }

    #[test]
    fn test_ready_sentinel_takes_priority() {
        let config = protocol();
        let mut decoder = FrameDecoder::new(&config);

        let decoded = decoder.decode(b"<<READY>> listening\nstarting model<<END>>\n");
        assert_eq!(
            decoded,
            vec![
                InboundMessage::Ready,
                InboundMessage::Log("starting model".to_string())
            ]
        );

        let mut decoder = FrameDecoder::new(&config);
        let encoder = FrameEncoder::new(&config);
        assert_eq!(decoder.decode(&encoder.encode_ready()), vec![InboundMessage::Ready]);
    }

    #[test]
    fn test_finish_flushes_tail_as_log() {
        let config = protocol();
        let mut decoder = FrameDecoder::new(&config);
        assert!(decoder.decode(b"<<DATA>>{\"id\":\"x\"}").is_empty());
        assert!(matches!(decoder.finish(), Some(InboundMessage::Log(_))));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_encode_request_is_single_record() {
        let config = protocol();
        let encoder = FrameEncoder::new(&config);
        let env = RequestEnvelope::new("a", json!({"note": "two\nlines"})).unwrap();
        let bytes = encoder.encode_request(&env).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with(&config.record_separator));
        let body = text.strip_suffix(&config.record_separator).unwrap();
        assert!(!body.contains('\n'));
    }
}
