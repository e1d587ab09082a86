//! Text coalescing for incremental synthesis
//!
//! Generated tokens are tiny; synthesizing each one separately is slow and
//! sounds choppy. The batcher accumulates text until it is long enough or
//! reaches a terminator, then hands the whole buffer out as one flush.

/// Decides when an accumulated buffer becomes a synthesis sub-request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush once the buffer holds at least this many characters
    pub min_chars: usize,
    /// Flush as soon as the buffer contains any of these characters
    pub terminators: Vec<char>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            min_chars: 20,
            terminators: vec!['.'],
        }
    }
}

impl FlushPolicy {
    /// Whether `buffer` should be flushed now
    #[must_use]
    pub fn should_flush(&self, buffer: &str) -> bool {
        buffer.chars().count() >= self.min_chars || buffer.contains(self.terminators.as_slice())
    }
}

/// Accumulates text chunks into flushable batches
#[derive(Debug, Default)]
pub struct ChunkBatcher {
    policy: FlushPolicy,
    buffer: String,
}

impl ChunkBatcher {
    #[must_use]
    pub const fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            buffer: String::new(),
        }
    }

    /// Append a chunk; returns the coalesced buffer if it is ready to flush
    pub fn push(&mut self, text: &str) -> Option<String> {
        self.buffer.push_str(text);

        if self.policy.should_flush(&self.buffer) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Take whatever remains at end of stream, regardless of size
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Drop any partial buffer
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.chars().count();
        self.buffer.clear();
        dropped
    }

    /// Characters currently buffered
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
