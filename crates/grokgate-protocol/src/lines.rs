use bytes::Bytes;

/// Incremental decoder for a newline-delimited byte stream.
///
/// Network reads split lines, and even multi-byte characters, arbitrarily;
/// partial lines are buffered until the terminating newline arrives and an
/// incomplete UTF-8 suffix is carried into the next read.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: String,
    carry: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // An incomplete trailing sequence may finish in the next read.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // Invalid bytes mid-stream never become valid; decode lossily
            // rather than dropping the read.
            Err(_) => {
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                return self.push_str(&text);
            }
        };
        let tail = self.carry.split_off(valid);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = tail;
        self.push_str(&text)
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }

        lines
    }

    /// Drain whatever remains after the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if !self.carry.is_empty() {
            let tail = String::from_utf8_lossy(&self.carry).into_owned();
            self.carry.clear();
            self.buffer.push_str(&tail);
        }
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        if line.is_empty() { None } else { Some(line) }
    }
}
