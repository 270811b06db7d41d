//! Incremental server-sent-events decoding shared by the streaming providers.

/// Accumulates raw bytes from an HTTP body and yields complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        // Normalize CRLF framing so the event boundary search stays simple.
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }

    /// Pop the next complete event.
    ///
    /// Returns `Some(None)` for a complete event without a data line (comments,
    /// pings) and `None` once no complete event remains buffered.
    pub fn next_event(&mut self) -> Option<Option<String>> {
        let end = self.buffer.find("\n\n")?;
        let event: String = self.buffer.drain(..end + 2).collect();

        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| {
                line.strip_prefix("data:")
                    .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            })
            .collect();

        if data.is_empty() {
            Some(None)
        } else {
            Some(Some(data.join("\n")))
        }
    }

    /// Whether any partial event is still buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty()
    }
}
