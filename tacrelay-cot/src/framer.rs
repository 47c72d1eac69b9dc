//! Stateful stream framer: chunked socket reads in, complete CoT messages out

use crate::wellformed::is_well_formed;

/// Buffer size at which a warning is logged (peer is lagging its delimiter).
pub const DEFAULT_SOFT_CAP: usize = 512 * 1024;

/// Buffer size at which the buffer is cleared outright. A peer that reaches
/// this never sent a delimiter across megabytes of traffic; buffering further
/// would trade bounded memory for data we already know is unusable.
pub const DEFAULT_HARD_CAP: usize = 2 * 1024 * 1024;

/// Counters accumulated over the lifetime of one framer (one connection).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramerStats {
    /// Complete, well-formed messages handed to the caller
    pub extracted: u64,
    /// Delimited candidates dropped (not UTF-8, or not well-formed XML)
    pub discarded: u64,
    /// Times the buffer hit the hard cap and was cleared
    pub overflows: u64,
}

/// Per-connection byte accumulator.
///
/// Owned exclusively by one connection's read loop; nothing here is shared or
/// locked. Feed it whatever the socket produced and it returns every complete
/// message found, keeping any trailing partial fragment for the next call.
pub struct StreamFramer {
    buffer: Vec<u8>,
    soft_cap: usize,
    hard_cap: usize,
    soft_warned: bool,
    stats: FramerStats,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::with_caps(DEFAULT_SOFT_CAP, DEFAULT_HARD_CAP)
    }

    /// Framer with explicit buffer thresholds. `soft_cap` is clamped to at
    /// most `hard_cap`.
    pub fn with_caps(soft_cap: usize, hard_cap: usize) -> Self {
        Self {
            buffer: Vec::new(),
            soft_cap: soft_cap.min(hard_cap),
            hard_cap,
            soft_warned: false,
            stats: FramerStats::default(),
        }
    }

    /// Append `bytes` and extract every complete newline-delimited message.
    ///
    /// Returned messages are validated CoT documents without their trailing
    /// delimiter. Invalid candidates are counted in `stats().discarded` and
    /// dropped; a read may therefore legally yield an empty vec even when it
    /// contained delimiters.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut start = 0usize;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let candidate = &self.buffer[start..end];
            // Tolerate CRLF senders
            let candidate = candidate.strip_suffix(b"\r").unwrap_or(candidate);

            match std::str::from_utf8(candidate) {
                Ok(text) if is_well_formed(text) => {
                    self.stats.extracted += 1;
                    messages.push(text.to_string());
                }
                Ok(text) => {
                    self.stats.discarded += 1;
                    tracing::debug!(
                        len = text.len(),
                        "discarding malformed CoT candidate"
                    );
                }
                Err(_) => {
                    self.stats.discarded += 1;
                    tracing::debug!(len = candidate.len(), "discarding non-UTF-8 candidate");
                }
            }
            start = end + 1;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }

        self.enforce_caps();
        messages
    }

    /// Bytes currently held waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    fn enforce_caps(&mut self) {
        if self.buffer.len() > self.hard_cap {
            tracing::warn!(
                buffered = self.buffer.len(),
                hard_cap = self.hard_cap,
                "frame buffer exceeded hard cap, clearing (peer never sent a delimiter)"
            );
            self.buffer.clear();
            self.buffer.shrink_to_fit();
            self.stats.overflows += 1;
            self.soft_warned = false;
        } else if self.buffer.len() > self.soft_cap {
            if !self.soft_warned {
                tracing::warn!(
                    buffered = self.buffer.len(),
                    soft_cap = self.soft_cap,
                    "frame buffer exceeded soft cap"
                );
                self.soft_warned = true;
            }
        } else {
            self.soft_warned = false;
        }
    }
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}
