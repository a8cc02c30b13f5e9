use crate::config::DEFAULT_BUFFER_CAPACITY;

/// Capped FIFO of received bytes.
///
/// The length never exceeds the capacity: a chunk that does not fit is
/// dropped whole rather than partially appended.
#[derive(Debug, Clone)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(DEFAULT_BUFFER_CAPACITY)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. Oldest bytes are dropped if the contents no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        if self.data.len() > capacity {
            let excess = self.data.len() - capacity;
            self.data.drain(..excess);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append `chunk` if it fits entirely. Returns whether it was appended.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.data.len() + chunk.len() > self.capacity {
            return false;
        }
        self.data.extend_from_slice(chunk);
        true
    }

    /// Remove and return the first `n` bytes, or `None` if fewer are buffered.
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.data.len() < n {
            return None;
        }
        Some(self.data.drain(..n).collect())
    }

    /// Remove the first line including its terminator and return it without
    /// the terminator. `None` if no complete line is buffered.
    pub fn take_line(&mut self, terminator: &[u8]) -> Option<Vec<u8>> {
        let end = find(&self.data, terminator)?;
        let mut line: Vec<u8> = self.data.drain(..end + terminator.len()).collect();
        line.truncate(end);
        Some(line)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Drop everything up to and including the last terminator, keeping a
    /// trailing partial line. Unchanged if there is no terminator.
    pub fn clear_to_last_line(&mut self, terminator: &[u8]) {
        if let Some(start) = rfind(&self.data, terminator) {
            self.data.drain(..start + terminator.len());
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
