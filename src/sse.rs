/// Incremental decoder for Server-Sent Events payloads (`data: ...`).
///
/// Bytes arrive in arbitrary network chunks, so partial lines are buffered
/// until their newline shows up. Multi-line `data:` fields are joined with
/// `\n` and an event is dispatched on a blank line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data_buf: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event payload completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim_end_matches('\r');
            self.process_line(line, &mut events);
        }

        events
    }

    /// Flush whatever is left once the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let mut events = Vec::new();
            self.process_line(line.trim_end_matches('\r'), &mut events);
            if let Some(event) = events.pop() {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if let Some(event) = self.take_event() {
                events.push(event);
            }
            return;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            self.data_buf.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            self.data_buf.push('\n');
        }
        // `event:`, `id:`, `retry:` and comments carry nothing we use
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_buf.is_empty() {
            return None;
        }
        let data = self.data_buf.trim_end_matches('\n').to_string();
        self.data_buf.clear();
        Some(data)
    }
}
