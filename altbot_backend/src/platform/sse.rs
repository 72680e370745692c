//! Incremental decoder for `text/event-stream` bodies.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame completed by it. Partial lines
    /// stay buffered, so chunks may split anywhere including inside a UTF-8
    /// sequence.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.handle_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn handle_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // heartbeat
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: upd").is_empty());
        assert!(decoder.push(b"ate\ndata: {\"id\":").is_empty());
        let frames = decoder.push(b"\"1\"}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "update".into(),
                data: "{\"id\":\"1\"}".into()
            }]
        );
    }

    #[test]
    fn heartbeats_and_crlf_are_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b":thump\r\n\r\nevent: delete\r\ndata: 42\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "delete");
        assert_eq!(frames[0].data, "42");
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        let payload = "data: caf\u{e9}\n\n".as_bytes();
        let split = payload.len() - 3;
        assert!(decoder.push(&payload[..split]).is_empty());
        let frames = decoder.push(&payload[split..]);
        assert_eq!(frames[0].data, "caf\u{e9}");
        assert_eq!(frames[0].event, "message");
    }
}
